//! JSON persistence for learned state.
//!
//! The pipeline saves its adjusted thresholds and stage counters on
//! graceful stop and restores them at startup. A missing file means a
//! fresh start; a corrupt file is a fatal configuration error — better
//! to refuse to start than to run on garbage thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::PipelineError;
use crate::types::{StageCounts, ThresholdState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub thresholds: ThresholdState,
    pub counts: StageCounts,
    pub saved_at: DateTime<Utc>,
}

/// Save learned state, overwriting any previous snapshot.
pub fn save(path: &str, state: &PersistedState) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| PipelineError::execution(format!("failed to serialize state: {e}")))?;
    fs::write(path, json)
        .map_err(|e| PipelineError::execution(format!("failed to write {path}: {e}")))?;
    info!(path, version = state.thresholds.version, "State saved");
    Ok(())
}

/// Load a previously saved snapshot. `Ok(None)` when no file exists.
pub fn load(path: &str) -> Result<Option<PersistedState>, PipelineError> {
    if !Path::new(path).exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| PipelineError::fatal(format!("failed to read state file {path}: {e}")))?;
    let state: PersistedState = serde_json::from_str(&contents)
        .map_err(|e| PipelineError::fatal(format!("corrupt state file {path}: {e}")))?;
    state.thresholds.validate()?;
    info!(path, version = state.thresholds.version, "State restored");
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> String {
        std::env::temp_dir()
            .join(format!("hermes_state_{}.json", Uuid::new_v4()))
            .to_string_lossy()
            .into_owned()
    }

    fn make_state() -> PersistedState {
        PersistedState {
            thresholds: ThresholdState {
                execute_threshold: 0.72,
                reject_threshold: 0.22,
                weights: crate::types::WeightVector::default(),
                version: 9,
            },
            counts: StageCounts {
                opportunities_received: 42,
                ..Default::default()
            },
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = temp_path();
        save(&path, &make_state()).unwrap();

        let restored = load(&path).unwrap().unwrap();
        assert_eq!(restored.thresholds.version, 9);
        assert_eq!(restored.counts.opportunities_received, 42);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_fresh_start() {
        assert!(load(&temp_path()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let path = temp_path();
        fs::write(&path, "{not json").unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.is_fatal());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_invalid_thresholds_in_file_are_fatal() {
        let path = temp_path();
        let mut state = make_state();
        state.thresholds.reject_threshold = 0.9;
        let json = serde_json::to_string(&state).unwrap();
        fs::write(&path, json).unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.is_fatal());

        let _ = fs::remove_file(&path);
    }
}
