//! Logging sinks — pluggable, optional scalar writers.
//!
//! The loop treats writers as opaque: anything exposing `add_scalar` and
//! `log_record` can be wired in. Which writers are enabled is decided by
//! the `logger_hook` params at build time.

use crate::error::HarnessError;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub trait SummaryWriter: Send {
    /// Record one tagged scalar at a step.
    fn add_scalar(&mut self, tag: &str, value: f64, step: i64) -> Result<(), HarnessError>;

    /// Record a whole mapping of scalars at a step.
    fn log_record(
        &mut self,
        scalars: &BTreeMap<String, f64>,
        step: i64,
    ) -> Result<(), HarnessError>;

    fn flush(&mut self) -> Result<(), HarnessError> {
        Ok(())
    }
}

/// Append-only `events.jsonl` in the working directory, one JSON object
/// per event.
pub struct JsonlWriter {
    out: BufWriter<File>,
}

impl JsonlWriter {
    pub fn create(working_dir: &Path) -> Result<Self, HarnessError> {
        std::fs::create_dir_all(working_dir)
            .map_err(|e| HarnessError::storage(format!("cannot create working dir: {e}")))?;
        let path = working_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HarnessError::storage(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    fn write_line(&mut self, value: serde_json::Value) -> Result<(), HarnessError> {
        serde_json::to_writer(&mut self.out, &value)?;
        self.out
            .write_all(b"\n")
            .map_err(|e| HarnessError::storage(format!("event write failed: {e}")))?;
        Ok(())
    }
}

impl SummaryWriter for JsonlWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: i64) -> Result<(), HarnessError> {
        self.write_line(json!({
            "tag": tag,
            "value": value,
            "step": step,
            "ts": chrono::Utc::now().to_rfc3339(),
        }))
    }

    fn log_record(
        &mut self,
        scalars: &BTreeMap<String, f64>,
        step: i64,
    ) -> Result<(), HarnessError> {
        self.write_line(json!({
            "scalars": scalars,
            "step": step,
            "ts": chrono::Utc::now().to_rfc3339(),
        }))
    }

    fn flush(&mut self) -> Result<(), HarnessError> {
        self.out
            .flush()
            .map_err(|e| HarnessError::storage(format!("event flush failed: {e}")))
    }
}

/// Emits scalars through `tracing`.
pub struct ConsoleWriter;

impl SummaryWriter for ConsoleWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: i64) -> Result<(), HarnessError> {
        info!(tag = %tag, value, step, "scalar");
        Ok(())
    }

    fn log_record(
        &mut self,
        scalars: &BTreeMap<String, f64>,
        step: i64,
    ) -> Result<(), HarnessError> {
        info!(step, scalars = ?scalars, "record");
        Ok(())
    }
}

/// The set of enabled writers for a run.
#[derive(Default)]
pub struct WriterSet {
    writers: Vec<Box<dyn SummaryWriter>>,
}

impl WriterSet {
    pub fn new(writers: Vec<Box<dyn SummaryWriter>>) -> Self {
        Self { writers }
    }

    pub fn push(&mut self, writer: Box<dyn SummaryWriter>) {
        self.writers.push(writer);
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: i64) -> Result<(), HarnessError> {
        for writer in &mut self.writers {
            writer.add_scalar(tag, value, step)?;
        }
        Ok(())
    }

    pub fn log_record(
        &mut self,
        scalars: &BTreeMap<String, f64>,
        step: i64,
    ) -> Result<(), HarnessError> {
        for writer in &mut self.writers {
            writer.log_record(scalars, step)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), HarnessError> {
        for writer in &mut self.writers {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_writer_appends_events() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonlWriter::create(dir.path()).unwrap();
        writer.add_scalar("train/loss", 0.5, 3).unwrap();
        writer
            .log_record(&BTreeMap::from([("avg_score".to_string(), 91.0)]), 1)
            .unwrap();
        writer.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["tag"], "train/loss");
        assert_eq!(first["step"], 3);
    }

    #[test]
    fn test_writer_set_fans_out() {
        let dir = TempDir::new().unwrap();
        let mut set = WriterSet::default();
        assert!(set.is_empty());
        set.push(Box::new(JsonlWriter::create(dir.path()).unwrap()));
        set.push(Box::new(ConsoleWriter));
        set.add_scalar("test/score", 1.0, 0).unwrap();
        set.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
