use std::fmt;
use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a job, generated at intake and never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn generate() -> Self {
        JobKey(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        JobKey(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Probing,
    Encoding,
    Evaluating,
    Escalating,
    Completed,
    Failed,
    TimedOut,
    /// Reported for unknown keys only; never stored
    NotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut)
    }

    /// Whether `next` is a legal successor of `self`.
    /// Re-asserting the current non-terminal status is allowed (message/progress refresh).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if next == NotFound || self.is_terminal() || *self == NotFound {
            return false;
        }
        if *self == next {
            return true;
        }
        if matches!(next, Failed | TimedOut) {
            return true;
        }

        matches!(
            (*self, next),
            (Queued, Probing)
                | (Probing, Encoding)
                | (Probing, Completed)
                | (Encoding, Evaluating)
                | (Encoding, Completed)
                | (Evaluating, Escalating)
                | (Evaluating, Completed)
                | (Escalating, Evaluating)
                | (Escalating, Completed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Probing => "probing",
            JobStatus::Encoding => "encoding",
            JobStatus::Evaluating => "evaluating",
            JobStatus::Escalating => "escalating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::NotFound => "not_found",
        };
        f.write_str(s)
    }
}

/// State of one submitted job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub message: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub source_bytes: Option<u64>,
    pub target_bytes: Option<u64>,
    /// Percent saved; negative when the output grew
    pub compression_ratio: Option<f64>,
    pub source_duration_seconds: Option<f64>,
    /// Profile whose output was accepted; None for copy fallback
    pub profile: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        key: JobKey,
        source_path: PathBuf,
        target_path: PathBuf,
        source_bytes: u64,
        budget: chrono::Duration,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            key,
            status: JobStatus::Queued,
            progress_percent: 0,
            message: "Queued for compression".to_string(),
            source_path,
            target_path,
            source_bytes: Some(source_bytes),
            target_bytes: None,
            compression_ratio: None,
            source_duration_seconds: None,
            profile: None,
            attempts: 0,
            started_at,
            deadline: started_at + budget,
            finished_at: None,
        }
    }

    /// Record final sizes and derive the ratio
    pub fn set_sizes(&mut self, source_bytes: u64, target_bytes: u64) {
        self.source_bytes = Some(source_bytes);
        self.target_bytes = Some(target_bytes);
        self.compression_ratio = Some(compression_ratio(source_bytes, target_bytes));
    }
}

/// `(source - target) / source * 100`; 0 for an empty source
pub fn compression_ratio(source_bytes: u64, target_bytes: u64) -> f64 {
    if source_bytes == 0 {
        return 0.0;
    }
    (source_bytes as f64 - target_bytes as f64) / source_bytes as f64 * 100.0
}

/// What pollers see
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
}

impl ProgressReport {
    pub fn not_found() -> Self {
        Self {
            status: JobStatus::NotFound,
            progress: 0,
            message: "Conversion not found".to_string(),
            original_size: None,
            converted_size: None,
            compression_ratio: None,
        }
    }
}

impl From<&JobRecord> for ProgressReport {
    fn from(record: &JobRecord) -> Self {
        // Sizes are only meaningful once an attempt has finished
        let finished = record.target_bytes.is_some();
        Self {
            status: record.status,
            progress: record.progress_percent,
            message: record.message.clone(),
            original_size: if finished { record.source_bytes } else { None },
            converted_size: record.target_bytes,
            compression_ratio: record.compression_ratio,
        }
    }
}
