//! Dataset trait and the built-in dataset factories.

use crate::data::Example;
use crate::error::HarnessError;
use mlforge_core::registry::typed_params;
use mlforge_core::{CoreError, Params};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

/// Random-access source of labelled examples.
pub trait Dataset: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Example, HarnessError>;
}

/// Dataset whose examples are listed literally in the config params.
pub struct InMemoryDataset {
    examples: Vec<Example>,
}

#[derive(Debug, Deserialize)]
struct InMemoryParams {
    #[serde(default)]
    examples: Vec<Example>,
    /// Split marker; consumed by the builder, accepted here so split params
    /// can be overlaid wholesale.
    #[serde(default)]
    #[allow(dead_code)]
    train: bool,
}

impl InMemoryDataset {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }

    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: InMemoryParams = typed_params("in_memory", params)?;
        Ok(Self::new(p.examples))
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.examples.len()
    }

    fn get(&self, index: usize) -> Result<Example, HarnessError> {
        self.examples
            .get(index)
            .cloned()
            .ok_or_else(|| HarnessError::data(format!("index {index} out of bounds")))
    }
}

/// Dataset loaded eagerly from a JSON-lines file, one example per line:
/// `{"features": [...], "target": N}`.
pub struct JsonlDataset {
    examples: Vec<Example>,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct JsonlParams {
    path: PathBuf,
    #[serde(default)]
    #[allow(dead_code)]
    train: bool,
}

impl JsonlDataset {
    pub fn from_params(params: Params) -> Result<Self, CoreError> {
        let p: JsonlParams = typed_params("jsonl", params)?;
        let text = std::fs::read_to_string(&p.path)
            .map_err(|e| CoreError::config(format!("cannot read {}: {e}", p.path.display())))?;

        let mut examples = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let example: Example = serde_json::from_str(line).map_err(|e| {
                CoreError::config(format!(
                    "{}:{}: malformed example: {e}",
                    p.path.display(),
                    line_no + 1
                ))
            })?;
            examples.push(example);
        }
        debug!(path = %p.path.display(), rows = examples.len(), "Loaded JSONL dataset");
        Ok(Self {
            examples,
            path: p.path,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Dataset for JsonlDataset {
    fn len(&self) -> usize {
        self.examples.len()
    }

    fn get(&self, index: usize) -> Result<Example, HarnessError> {
        self.examples
            .get(index)
            .cloned()
            .ok_or_else(|| HarnessError::data(format!("index {index} out of bounds")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_from_params() {
        let mut params = Params::new();
        params.insert(
            "examples".into(),
            json!([
                {"features": [0.0, 1.0], "target": 1},
                {"features": [1.0, 0.0], "target": 0},
            ]),
        );
        params.insert("train".into(), json!(true));

        let ds = InMemoryDataset::from_params(params).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).unwrap().target, 0);
        assert!(ds.get(2).is_err());
    }

    #[test]
    fn test_jsonl_dataset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(
            &path,
            "{\"features\": [1.0], \"target\": 0}\n\n{\"features\": [2.0], \"target\": 1}\n",
        )
        .unwrap();

        let mut params = Params::new();
        params.insert("path".into(), json!(path));
        let ds = JsonlDataset::from_params(params).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0).unwrap().features, vec![1.0]);
    }

    #[test]
    fn test_jsonl_malformed_line_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"features\": [1.0]}\n").unwrap();

        let mut params = Params::new();
        params.insert("path".into(), json!(path));
        let err = JsonlDataset::from_params(params).map(|_| ()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
