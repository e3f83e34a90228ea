use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::dispatch::ResponseEnvelope;
use crate::model::{EventFields, EventPayload};

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Output I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot serialize {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes posted payloads as `<seq>_<transactionId>-<eventId>.json` and
/// their response envelopes with an `-out` suffix on the same stem.
pub struct OutputSink {
    dir: PathBuf,
}

impl OutputSink {
    /// Creates the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| OutputError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn payload_path(&self, seq: usize, transaction_id: &str, event_id: &str) -> PathBuf {
        self.dir.join(format!("{}_{}-{}.json", seq, transaction_id, event_id))
    }

    pub fn envelope_path(&self, seq: usize, transaction_id: &str, event_id: &str) -> PathBuf {
        self.dir.join(format!("{}_{}-{}-out.json", seq, transaction_id, event_id))
    }

    pub fn write_payload(&self, seq: usize, leg: &EventPayload) -> Result<PathBuf, OutputError> {
        let path = self.payload_path(seq, leg.transaction_id(), leg.event_id());
        write_pretty(&path, leg)?;
        debug!(path = %path.display(), "Payload written");
        Ok(path)
    }

    pub fn write_envelope(&self, seq: usize, envelope: &ResponseEnvelope) -> Result<PathBuf, OutputError> {
        let path = self.envelope_path(seq, &envelope.transaction_id, &envelope.event_id);
        write_pretty(&path, envelope)?;
        debug!(path = %path.display(), "Response envelope written");
        Ok(path)
    }
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| OutputError::Encode {
        what: path.display().to_string(),
        source,
    })?;
    fs::write(path, json).map_err(|source| OutputError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScenarioEvent;
    use serde_json::{Value, json};

    #[test]
    fn test_payload_file_named_by_seq_and_ids() {
        let dir = std::env::temp_dir().join(format!("output_test_{}", uuid::Uuid::new_v4()));
        let sink = OutputSink::new(&dir).unwrap();

        let Value::Object(map) = json!({"transactionId": "t9", "eventId": "e3", "eventType": "paymentRT"}) else {
            unreachable!()
        };
        let path = sink.write_payload(4, &EventPayload::Scenario(ScenarioEvent(map))).unwrap();

        assert_eq!(path, dir.join("4_t9-e3.json"));
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains('\n'), "expected indented JSON");
        let back: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(back["eventType"], "paymentRT");

        assert_eq!(sink.envelope_path(4, "t9", "e3"), dir.join("4_t9-e3-out.json"));
        fs::remove_dir_all(dir).unwrap();
    }
}
