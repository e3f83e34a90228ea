//! Scenario replay: pre-built transaction pairs read from JSON files.
//!
//! A scenario file is an array of exactly two objects. Index 0 is the
//! inbound leg and index 1 the outbound leg; the position decides, not any
//! field inside the objects.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::context::RunContext;
use crate::model::{EventFields, EventPayload, ScenarioEvent, TransactionPair};

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Scenario I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Scenario file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed scenario {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("{failed} of {total} scenario files failed validation")]
    InvalidFiles { failed: usize, total: usize },
}

/// Lists the `*.json` files directly under `dir`, sorted by name.
pub fn scan_input_dir(dir: &Path) -> Result<Vec<PathBuf>, ScenarioError> {
    let io_err = |source| ScenarioError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if path.is_file() && is_json {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Checks every file before anything is posted. Each file is logged as
/// `=> Pass` or `=> FAIL`; any failure fails the whole set.
pub fn validate_files(files: &[PathBuf]) -> Result<(), ScenarioError> {
    let mut failed = 0;
    for path in files {
        match read_legs(path) {
            Ok(_) => info!("Validating {} => Pass", path.display()),
            Err(e) => {
                error!("Validating {} => FAIL: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(ScenarioError::InvalidFiles {
            failed,
            total: files.len(),
        });
    }
    Ok(())
}

/// Reads a scenario file and refreshes its identifiers so replays never
/// collide with earlier runs.
pub fn load_transaction_from_file(path: &Path, ctx: &RunContext) -> Result<TransactionPair, ScenarioError> {
    let [inbound, outbound] = read_legs(path)?;
    Ok(refresh_pair(inbound, outbound, ctx))
}

/// Parses a scenario document held in memory.
pub fn parse_transaction(raw: &str, ctx: &RunContext) -> Result<TransactionPair, ScenarioError> {
    let [inbound, outbound] = parse_legs(raw, "<inline>")?;
    Ok(refresh_pair(inbound, outbound, ctx))
}

fn read_legs(path: &Path) -> Result<[ScenarioEvent; 2], ScenarioError> {
    let display = path.display().to_string();
    let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: display.clone(),
        source,
    })?;
    parse_legs(&raw, &display)
}

fn parse_legs(raw: &str, path: &str) -> Result<[ScenarioEvent; 2], ScenarioError> {
    let malformed = |reason: String| ScenarioError::Malformed {
        path: path.to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(raw).map_err(|source| ScenarioError::Json {
        path: path.to_string(),
        source,
    })?;
    let Value::Array(items) = value else {
        return Err(malformed("top-level value is not an array".to_string()));
    };
    if items.len() != 2 {
        return Err(malformed(format!("expected 2 events, found {}", items.len())));
    }

    let mut legs = Vec::with_capacity(2);
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => legs.push(ScenarioEvent(map)),
            other => {
                return Err(malformed(format!("element {} is {}, not an object", idx, kind(&other))));
            }
        }
    }
    legs.try_into()
        .map_err(|_: Vec<ScenarioEvent>| malformed("expected exactly 2 events".to_string()))
}

fn refresh_pair(mut inbound: ScenarioEvent, mut outbound: ScenarioEvent, ctx: &RunContext) -> TransactionPair {
    let transaction_id = ctx.id.new_id();
    let event_time = ctx.event_time();
    let is_payment = inbound.event_type().is_payment() || outbound.event_type().is_payment();
    let today = ctx.event_date();

    for leg in [&mut inbound, &mut outbound] {
        leg.set("eventId", ctx.id.new_id());
        leg.set("transactionId", transaction_id.clone());
        leg.set("eventTime", event_time.clone());
        leg.set("creationDate", event_time.clone());
        if is_payment {
            leg.set("requestExecutionDate", today.clone());
            leg.set("settlementDate", today.clone());
        }
    }

    TransactionPair::new(EventPayload::Scenario(outbound), EventPayload::Scenario(inbound))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Direction;
    use serde_json::json;

    const ADD_PAYEE: &str = r#"[
        {"eventType": "addPayeeRT", "direction": "inbound", "transactionId": "X", "eventId": "in-1", "payeeName": "Bob"},
        {"eventType": "addPayeeNRT", "direction": "outbound", "transactionId": "X", "eventId": "out-1"}
    ]"#;

    fn ctx() -> RunContext {
        RunContext::new_simulated(1_709_288_430_000)
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scenario_test_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_identifiers_refreshed() {
        let pair = parse_transaction(ADD_PAYEE, &ctx()).unwrap();

        assert_ne!(pair.inbound.transaction_id(), "X");
        assert_eq!(pair.inbound.transaction_id(), pair.outbound.transaction_id());
        assert_ne!(pair.inbound.event_id(), "in-1");
        assert_ne!(pair.outbound.event_id(), "out-1");
        assert_ne!(pair.inbound.event_id(), pair.outbound.event_id());
    }

    #[test]
    fn test_position_decides_direction() {
        let pair = parse_transaction(ADD_PAYEE, &ctx()).unwrap();
        let EventPayload::Scenario(inbound) = &pair.inbound else {
            panic!("expected scenario leg");
        };
        assert_eq!(inbound.str_field("payeeName"), Some("Bob"));
        assert_eq!(pair.post_order(), [Direction::Outbound, Direction::Inbound]);
    }

    #[test]
    fn test_add_payee_legs_get_no_dates() {
        let pair = parse_transaction(ADD_PAYEE, &ctx()).unwrap();
        let EventPayload::Scenario(outbound) = &pair.outbound else {
            panic!("expected scenario leg");
        };
        assert_eq!(outbound.str_field("eventTime"), Some("2024-03-01T10:20:30"));
        assert_eq!(outbound.str_field("settlementDate"), None);
        assert_eq!(outbound.str_field("requestExecutionDate"), None);
    }

    #[test]
    fn test_payment_legs_get_dates() {
        let raw = json!([
            {"eventType": "paymentRT", "settlementDate": "1999-01-01"},
            {"eventType": "other"}
        ])
        .to_string();
        let pair = parse_transaction(&raw, &ctx()).unwrap();
        for leg in [&pair.inbound, &pair.outbound] {
            let EventPayload::Scenario(event) = leg else {
                panic!("expected scenario leg");
            };
            assert_eq!(event.str_field("settlementDate"), Some("2024-03-01"));
            assert_eq!(event.str_field("requestExecutionDate"), Some("2024-03-01"));
        }
    }

    #[test]
    fn test_malformed_shapes_rejected() {
        for raw in [r#"{"a": 1}"#, r#"[{"a": 1}]"#, r#"[{}, {}, {}]"#, r#"[{}, 3]"#] {
            let err = parse_transaction(raw, &ctx()).unwrap_err();
            assert!(matches!(err, ScenarioError::Malformed { .. }), "{raw}: {err}");
        }
        let err = parse_transaction("[{", &ctx()).unwrap_err();
        assert!(matches!(err, ScenarioError::Json { .. }));
    }

    #[test]
    fn test_scan_picks_sorted_json_only() {
        let dir = temp_dir();
        fs::write(dir.join("b.json"), ADD_PAYEE).unwrap();
        fs::write(dir.join("a.json"), ADD_PAYEE).unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::create_dir(dir.join("nested.json")).unwrap();

        let files = scan_input_dir(&dir).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_validation_counts_failures() {
        let dir = temp_dir();
        fs::write(dir.join("good.json"), ADD_PAYEE).unwrap();
        fs::write(dir.join("bad.json"), "not json").unwrap();

        let files = scan_input_dir(&dir).unwrap();
        let err = validate_files(&files).unwrap_err();
        assert!(matches!(err, ScenarioError::InvalidFiles { failed: 1, total: 2 }));

        fs::remove_file(dir.join("bad.json")).unwrap();
        let files = scan_input_dir(&dir).unwrap();
        assert!(validate_files(&files).is_ok());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = std::env::temp_dir().join(format!("missing_{}", uuid::Uuid::new_v4()));
        assert!(matches!(scan_input_dir(&dir), Err(ScenarioError::Io { .. })));
    }
}
