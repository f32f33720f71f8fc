//! # Recording Storage
//!
//! Persistence contract for analysis results. The HTTP layer saves one
//! record per analyzed upload and reads them back for the recordings list
//! and the per-user statistics.
//!
//! ## Key Rust Concepts:
//! - **Trait object store**: `Arc<dyn RecordingStore>` lives in `AppState`,
//!   so a database-backed store can replace the in-memory one without
//!   touching the handlers
//! - **Typed failures**: every method returns `AnalysisError::Persistence`
//!   on failure; a failed save never invalidates the analysis itself

pub mod memory;   // In-process store
pub mod uploads;  // Kept audio files

pub use memory::InMemoryRecordingStore;
pub use uploads::AudioArchive;

use crate::analysis::{AnalysisError, AnalysisResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Everything needed to persist one analyzed upload.
///
/// The id is assigned up front so the audio file can be named after the
/// record before the record is saved.
#[derive(Debug, Clone)]
pub struct NewRecording {
    pub id: Uuid,
    pub user_uid: String,
    pub name: String,
    pub duration_millis: u64,
    pub snoring_count: usize,
    pub loudest_snore_db: f64,
    pub apnea_events_count: usize,
    pub snoring_absolute_timestamps: Vec<DateTime<Utc>>,
    /// Download path of the kept audio, if it was written
    pub file_url: Option<String>,
}

impl NewRecording {
    /// Build from an analysis result.
    ///
    /// `duration_millis` is the client-reported duration when given,
    /// otherwise the decoded clip duration.
    pub fn from_result(
        user_uid: &str,
        name: &str,
        duration_millis: Option<u64>,
        result: &AnalysisResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_uid: user_uid.to_string(),
            name: name.to_string(),
            duration_millis: duration_millis.unwrap_or(result.duration_millis),
            snoring_count: result.snoring_count,
            loudest_snore_db: result.loudest_snore_db,
            apnea_events_count: result.apnea_events_count,
            snoring_absolute_timestamps: result.snoring_absolute_timestamps.clone(),
            file_url: None,
        }
    }
}

/// A stored recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingRecord {
    pub id: Uuid,
    pub user_uid: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub duration_millis: u64,
    pub snoring_count: usize,
    pub loudest_snore_db: f64,
    pub apnea_events_count: usize,
    pub snoring_absolute_timestamps: Vec<DateTime<Utc>>,
    pub file_url: Option<String>,
}

/// Per-user aggregate over all stored recordings.
///
/// Every float is rounded to 2 decimals; a user without recordings gets
/// all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingStats {
    /// Distinct UTC dates with at least one recording
    pub total_days: usize,
    /// Recorded minutes per recorded day
    pub avg_duration: f64,
    /// Mean apnea events per recording
    pub avg_apnea_count: f64,
    /// Loudest score over all recordings
    pub max_snore_db: f64,
}

impl RecordingStats {
    /// Aggregate a user's records.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a RecordingRecord>,
    {
        let mut days = std::collections::BTreeSet::new();
        let mut count = 0usize;
        let mut total_millis = 0u64;
        let mut total_apnea = 0usize;
        let mut max_snore_db = 0.0f64;

        for record in records {
            days.insert(record.created_at.date_naive());
            count += 1;
            total_millis += record.duration_millis;
            total_apnea += record.apnea_events_count;
            max_snore_db = max_snore_db.max(record.loudest_snore_db);
        }

        if count == 0 {
            return Self::default();
        }

        let total_days = days.len();
        Self {
            total_days,
            avg_duration: round2(total_millis as f64 / 60_000.0 / total_days as f64),
            avg_apnea_count: round2(total_apnea as f64 / count as f64),
            max_snore_db: round2(max_snore_db),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Persistence contract for recordings.
pub trait RecordingStore: Send + Sync {
    /// Store a recording and return it with its id and creation time.
    fn save(&self, recording: NewRecording) -> Result<RecordingRecord, AnalysisError>;

    /// A user's recordings, newest first.
    fn list_for_user(&self, user_uid: &str) -> Result<Vec<RecordingRecord>, AnalysisError>;

    /// Aggregate statistics over a user's recordings.
    fn stats_for_user(&self, user_uid: &str) -> Result<RecordingStats, AnalysisError> {
        let records = self.list_for_user(user_uid)?;
        Ok(RecordingStats::from_records(&records))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Store whose every call fails.
    pub struct UnavailableStore;

    impl RecordingStore for UnavailableStore {
        fn save(&self, _recording: NewRecording) -> Result<RecordingRecord, AnalysisError> {
            Err(AnalysisError::Persistence("database is down".to_string()))
        }

        fn list_for_user(&self, _user_uid: &str) -> Result<Vec<RecordingRecord>, AnalysisError> {
            Err(AnalysisError::Persistence("database is down".to_string()))
        }
    }
}
