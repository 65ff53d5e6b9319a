//! Checkpoint management — persist and restore model + optimizer state.
//!
//! Layout: one `checkpoint-{epoch:04}.json` per saved epoch under
//! `<working_dir>/checkpoint/`. Retention is bounded: after every save the
//! oldest-by-epoch files beyond `keep` are pruned. Single-process training;
//! no concurrent writers.

use crate::error::HarnessError;
use crate::model::{Model, ModelState};
use crate::optim::{Optimizer, OptimizerState};
use crate::training::early_stopping::EarlyStopSnapshot;
use chrono::{DateTime, Utc};
use mlforge_core::persistence;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// One persisted checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: String,
    pub epoch: usize,
    /// Cumulative trained batches at save time.
    pub step: usize,
    pub score: f64,
    pub early_stopping: EarlyStopSnapshot,
    pub model_state: ModelState,
    pub optimizer_state: OptimizerState,
    /// Content hash over the restorable payload; verified on load.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// State handed back to the trainer on resume.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub epoch: usize,
    pub step: usize,
    pub score: f64,
    pub early_stopping: EarlyStopSnapshot,
}

fn payload_hash(
    epoch: usize,
    step: usize,
    score: f64,
    model_state: &ModelState,
    optimizer_state: &OptimizerState,
) -> Result<String, HarnessError> {
    let payload = serde_json::to_vec(&(epoch, step, score, model_state, optimizer_state))?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(working_dir: &Path) -> Self {
        Self {
            checkpoint_dir: working_dir.join("checkpoint"),
        }
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    fn path_for(&self, epoch: usize) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{CHECKPOINT_PREFIX}{epoch:04}.json"))
    }

    /// Epochs with a checkpoint on disk, ascending. Unrelated files in the
    /// directory are ignored.
    pub fn list_epochs(&self) -> Result<Vec<usize>, HarnessError> {
        if !self.checkpoint_dir.exists() {
            return Ok(Vec::new());
        }
        let mut epochs = Vec::new();
        let entries = std::fs::read_dir(&self.checkpoint_dir)
            .map_err(|e| HarnessError::storage(format!("cannot list checkpoints: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| HarnessError::storage(e.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(epoch) = name
                .strip_prefix(CHECKPOINT_PREFIX)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<usize>().ok())
            {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    /// Most recent checkpoint epoch, or `None` on a fresh run.
    pub fn latest(&self) -> Result<Option<usize>, HarnessError> {
        Ok(self.list_epochs()?.last().copied())
    }

    /// Write a checkpoint for `epoch`, then prune the oldest entries
    /// beyond `keep`.
    pub fn save(
        &self,
        model: &dyn Model,
        optimizer: &dyn Optimizer,
        epoch: usize,
        step: usize,
        score: f64,
        early_stopping: EarlyStopSnapshot,
        keep: usize,
    ) -> Result<(), HarnessError> {
        let model_state = model.state_dict();
        let optimizer_state = optimizer.state_dict();
        let hash = payload_hash(epoch, step, score, &model_state, &optimizer_state)?;
        let record = CheckpointRecord {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            step,
            score,
            early_stopping,
            model_state,
            optimizer_state,
            hash,
            created_at: Utc::now(),
        };

        let path = self.path_for(epoch);
        persistence::atomic_write_json(&path, &record)
            .map_err(|e| HarnessError::storage(format!("cannot write {}: {e}", path.display())))?;
        info!(epoch, score, path = %path.display(), "Saved checkpoint");

        self.prune(keep)
    }

    fn prune(&self, keep: usize) -> Result<(), HarnessError> {
        let epochs = self.list_epochs()?;
        if epochs.len() <= keep {
            return Ok(());
        }
        for &epoch in &epochs[..epochs.len() - keep] {
            let path = self.path_for(epoch);
            std::fs::remove_file(&path).map_err(|e| {
                HarnessError::storage(format!("cannot prune {}: {e}", path.display()))
            })?;
            debug!(epoch, "Pruned checkpoint");
        }
        Ok(())
    }

    /// Restore model and optimizer state in place from `epoch`.
    pub fn load(
        &self,
        model: &mut dyn Model,
        optimizer: &mut dyn Optimizer,
        epoch: usize,
    ) -> Result<RestoredState, HarnessError> {
        let path = self.path_for(epoch);
        let record: CheckpointRecord = persistence::load_json(&path)
            .map_err(|e| HarnessError::checkpoint_load(format!("{}: {e}", path.display())))?
            .ok_or_else(|| {
                HarnessError::checkpoint_load(format!("no checkpoint for epoch {epoch}"))
            })?;

        let expected = payload_hash(
            record.epoch,
            record.step,
            record.score,
            &record.model_state,
            &record.optimizer_state,
        )?;
        if expected != record.hash {
            return Err(HarnessError::checkpoint_load(format!(
                "hash mismatch in {}",
                path.display()
            )));
        }

        model.load_state_dict(&record.model_state)?;
        optimizer.load_state_dict(&record.optimizer_state)?;
        info!(epoch = record.epoch, score = record.score, "Restored checkpoint");
        Ok(RestoredState {
            epoch: record.epoch,
            step: record.step,
            score: record.score,
            early_stopping: record.early_stopping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinearClassifier;
    use crate::optim::Sgd;
    use mlforge_core::{Params, ScoreMode};
    use serde_json::json;
    use tempfile::TempDir;

    fn model() -> LinearClassifier {
        let mut params = Params::new();
        params.insert("in_features".into(), json!(2));
        params.insert("out_features".into(), json!(2));
        LinearClassifier::from_params(params).unwrap()
    }

    fn sgd() -> Sgd {
        let mut params = Params::new();
        params.insert("lr".into(), json!(0.1));
        Sgd::from_params(params).unwrap()
    }

    fn snapshot(score: f64) -> EarlyStopSnapshot {
        EarlyStopSnapshot {
            mode: ScoreMode::Max,
            best_score: Some(score),
            counter: 0,
        }
    }

    #[test]
    fn test_retention_keeps_two_most_recent() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        let m = model();
        let opt = sgd();

        for epoch in [1usize, 2, 3] {
            cm.save(&m, &opt, epoch, epoch * 10, epoch as f64, snapshot(epoch as f64), 2)
                .unwrap();
        }

        assert_eq!(cm.list_epochs().unwrap(), vec![2, 3]);
        assert_eq!(cm.latest().unwrap(), Some(3));

        let mut m2 = model();
        let mut opt2 = sgd();
        let err = cm.load(&mut m2, &mut opt2, 1).unwrap_err();
        assert!(matches!(err, HarnessError::CheckpointLoad(_)));
    }

    #[test]
    fn test_load_accepts_reparsed_float_precision() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        let mut m = model();
        // values whose shortest decimal form exercises exact f64 parsing
        let awkward = [-0.0013145209538611147, 0.1 + 0.2, 1.0 / 3.0, f64::MIN_POSITIVE];
        for p in m.parameters_mut() {
            for (value, a) in p.values.iter_mut().zip(awkward.iter().cycle()) {
                *value = *a;
            }
        }
        let opt = sgd();
        cm.save(&m, &opt, 0, 0, 2.0 / 3.0, snapshot(2.0 / 3.0), 2)
            .unwrap();

        let mut m2 = model();
        let mut opt2 = sgd();
        let restored = cm.load(&mut m2, &mut opt2, 0).unwrap();
        assert_eq!(restored.score, 2.0 / 3.0);
        assert_eq!(m2.state_dict(), m.state_dict());
    }

    #[test]
    fn test_latest_on_fresh_dir_is_none() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        assert_eq!(cm.latest().unwrap(), None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        let mut m = model();
        for p in m.parameters_mut() {
            p.values.fill(1.5);
        }
        let opt = sgd();
        cm.save(&m, &opt, 4, 123, 88.5, snapshot(88.5), 2).unwrap();

        let mut restored_model = model();
        let mut restored_opt = sgd();
        let restored = cm.load(&mut restored_model, &mut restored_opt, 4).unwrap();
        assert_eq!(restored.epoch, 4);
        assert_eq!(restored.step, 123);
        assert_eq!(restored.score, 88.5);
        assert_eq!(restored.early_stopping.best_score, Some(88.5));
        assert_eq!(restored_model.state_dict(), m.state_dict());
    }

    #[test]
    fn test_corrupt_checkpoint_fails_load() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        let m = model();
        let opt = sgd();
        cm.save(&m, &opt, 1, 0, 0.5, snapshot(0.5), 2).unwrap();

        let path = dir.path().join("checkpoint").join("checkpoint-0001.json");
        std::fs::write(&path, "not json").unwrap();

        let mut m2 = model();
        let mut opt2 = sgd();
        let err = cm.load(&mut m2, &mut opt2, 1).unwrap_err();
        assert!(matches!(err, HarnessError::CheckpointLoad(_)));
    }

    #[test]
    fn test_tampered_payload_fails_hash_check() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        let m = model();
        let opt = sgd();
        cm.save(&m, &opt, 1, 0, 0.5, snapshot(0.5), 2).unwrap();

        let path = dir.path().join("checkpoint").join("checkpoint-0001.json");
        let text = std::fs::read_to_string(&path).unwrap();
        let mut record: serde_json::Value = serde_json::from_str(&text).unwrap();
        record["score"] = json!(99.9);
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        let mut m2 = model();
        let mut opt2 = sgd();
        let err = cm.load(&mut m2, &mut opt2, 1).unwrap_err();
        assert!(matches!(err, HarnessError::CheckpointLoad(_)));
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let dir = TempDir::new().unwrap();
        let cm = CheckpointManager::new(dir.path());
        std::fs::create_dir_all(cm.checkpoint_dir()).unwrap();
        std::fs::write(cm.checkpoint_dir().join("notes.txt"), "hi").unwrap();
        assert_eq!(cm.latest().unwrap(), None);
    }
}
