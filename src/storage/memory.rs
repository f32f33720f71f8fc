//! In-process recording store. Records live for the lifetime of the
//! process; nothing is written to disk.

use crate::analysis::AnalysisError;
use crate::storage::{NewRecording, RecordingRecord, RecordingStore};
use chrono::Utc;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryRecordingStore {
    records: RwLock<Vec<RecordingRecord>>,
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored recordings across all users.
    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> AnalysisError {
    AnalysisError::Persistence("recording store lock poisoned".to_string())
}

impl RecordingStore for InMemoryRecordingStore {
    fn save(&self, recording: NewRecording) -> Result<RecordingRecord, AnalysisError> {
        let record = RecordingRecord {
            id: recording.id,
            user_uid: recording.user_uid,
            name: recording.name,
            created_at: Utc::now(),
            duration_millis: recording.duration_millis,
            snoring_count: recording.snoring_count,
            loudest_snore_db: recording.loudest_snore_db,
            apnea_events_count: recording.apnea_events_count,
            snoring_absolute_timestamps: recording.snoring_absolute_timestamps,
            file_url: recording.file_url,
        };

        self.records.write().map_err(|_| poisoned())?.push(record.clone());
        tracing::debug!("Stored recording {} for user {}", record.id, record.user_uid);
        Ok(record)
    }

    fn list_for_user(&self, user_uid: &str) -> Result<Vec<RecordingRecord>, AnalysisError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut matching: Vec<RecordingRecord> = records
            .iter()
            .filter(|record| record.user_uid == user_uid)
            .cloned()
            .collect();
        // insertion order breaks ties between equal timestamps
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}
