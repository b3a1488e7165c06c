//! Checkpoint layer (C7): an embedded `sled` key-value store keyed by
//! `"{endpointId}/{unitId}/{sinkId}"`, the same embedding choice
//! `beiju-mmoldb`'s `src/chron.rs` cache makes for lightweight persistent
//! state that doesn't need a server round-trip.

use std::path::Path;

use ucl_core::{IngestionUnitState, UclError, UclResult, UnitState};

pub struct CheckpointStore {
    db: sled::Db,
}

fn key(endpoint_id: &str, unit_id: &str, sink_id: &str) -> String {
    format!("{endpoint_id}/{unit_id}/{sink_id}")
}

impl CheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> UclResult<Self> {
        let db = sled::open(path).map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
        Ok(Self { db })
    }

    /// In-memory store for tests and single-process dry runs.
    pub fn open_temporary() -> UclResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
        Ok(Self { db })
    }

    /// Atomic replace of the state row (§4.7).
    pub fn upsert_ingestion_unit_state(&self, state: &IngestionUnitState) -> UclResult<()> {
        let key = key(&state.endpoint_id, &state.unit_id, &state.sink_id);
        let bytes = serde_json::to_vec(state)
            .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
        self.db
            .flush()
            .map_err(|e| UclError::staging_write_failed(e.to_string()).with_cause(e))?;
        Ok(())
    }

    /// Append-last-wins: overwrites cursor/checkpointBlob/lastRunId on the
    /// existing row, leaving `state` untouched.
    pub fn save_ingestion_checkpoint(
        &self,
        endpoint_id: &str,
        unit_id: &str,
        sink_id: &str,
        cursor: Option<String>,
        checkpoint_blob: Option<Vec<u8>>,
        last_run_id: Option<String>,
    ) -> UclResult<()> {
        let mut state = self
            .get_ingestion_unit_state(endpoint_id, unit_id, sink_id)?
            .unwrap_or_else(|| IngestionUnitState::idle(endpoint_id, unit_id, sink_id));
        state.cursor = cursor;
        state.checkpoint_blob = checkpoint_blob;
        state.last_run_id = last_run_id;
        state.last_run_at = Some(chrono::Utc::now());
        self.upsert_ingestion_unit_state(&state)
    }

    /// Transitions the unit's `state` in place, leaving cursor/checkpoint
    /// blob untouched (§4.7's `idle → running → (succeeded|failed|paused)`).
    /// Creates an idle row first if none exists yet.
    pub fn set_unit_state(
        &self,
        endpoint_id: &str,
        unit_id: &str,
        sink_id: &str,
        state: UnitState,
        last_run_id: Option<String>,
        last_error: Option<String>,
    ) -> UclResult<()> {
        let mut row = self
            .get_ingestion_unit_state(endpoint_id, unit_id, sink_id)?
            .unwrap_or_else(|| IngestionUnitState::idle(endpoint_id, unit_id, sink_id));
        row.state = state;
        if last_run_id.is_some() {
            row.last_run_id = last_run_id;
            row.last_run_at = Some(chrono::Utc::now());
        }
        row.last_error = last_error;
        self.upsert_ingestion_unit_state(&row)
    }

    pub fn get_ingestion_unit_state(
        &self,
        endpoint_id: &str,
        unit_id: &str,
        sink_id: &str,
    ) -> UclResult<Option<IngestionUnitState>> {
        let key = key(endpoint_id, unit_id, sink_id);
        let bytes = self
            .db
            .get(key.as_bytes())
            .map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
        bytes
            .map(|ivec| {
                serde_json::from_slice(&ivec).map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))
            })
            .transpose()
    }

    /// Clears cursor and checkpoint blob but leaves `state` as-is (still
    /// `idle` if it was idle) — `ResetCheckpoint` never mutates run state.
    pub fn reset_checkpoint(&self, endpoint_id: &str, unit_id: &str, sink_id: &str) -> UclResult<()> {
        if let Some(mut state) = self.get_ingestion_unit_state(endpoint_id, unit_id, sink_id)? {
            state.cursor = None;
            state.checkpoint_blob = None;
            self.upsert_ingestion_unit_state(&state)?;
        }
        Ok(())
    }

    /// Read for UI: every state row under `endpointId`.
    pub fn list_ingestion_unit_states(&self, endpoint_id: &str) -> UclResult<Vec<IngestionUnitState>> {
        let prefix = format!("{endpoint_id}/");
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(|entry| {
                let (_, value) = entry.map_err(|e| UclError::staging_unavailable(e.to_string()).with_cause(e))?;
                serde_json::from_slice(&value).map_err(|e| UclError::schema_drift(e.to_string()).with_cause(e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucl_core::UnitState;

    #[test]
    fn upsert_then_get_round_trips() {
        let store = CheckpointStore::open_temporary().unwrap();
        let state = IngestionUnitState::idle("ep-1", "unit-1", "sink-1");
        store.upsert_ingestion_unit_state(&state).unwrap();

        let fetched = store.get_ingestion_unit_state("ep-1", "unit-1", "sink-1").unwrap().unwrap();
        assert_eq!(fetched.state, UnitState::Idle);
    }

    #[test]
    fn reset_checkpoint_clears_cursor_but_not_state() {
        let store = CheckpointStore::open_temporary().unwrap();
        store
            .save_ingestion_checkpoint("ep-1", "unit-1", "sink-1", Some("cursor-5".to_string()), None, Some("run-1".to_string()))
            .unwrap();

        store.reset_checkpoint("ep-1", "unit-1", "sink-1").unwrap();
        let state = store.get_ingestion_unit_state("ep-1", "unit-1", "sink-1").unwrap().unwrap();
        assert!(state.cursor.is_none());
        assert_eq!(state.state, UnitState::Idle);
    }

    #[test]
    fn list_ingestion_unit_states_scopes_to_endpoint() {
        let store = CheckpointStore::open_temporary().unwrap();
        store.upsert_ingestion_unit_state(&IngestionUnitState::idle("ep-1", "u1", "s1")).unwrap();
        store.upsert_ingestion_unit_state(&IngestionUnitState::idle("ep-1", "u2", "s1")).unwrap();
        store.upsert_ingestion_unit_state(&IngestionUnitState::idle("ep-2", "u1", "s1")).unwrap();

        let states = store.list_ingestion_unit_states("ep-1").unwrap();
        assert_eq!(states.len(), 2);
    }
}
