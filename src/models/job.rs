use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a job in the relay pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Resolved,
    Rejected,
}

impl JobStatus {
    /// Whether a delivery attempt has finished with this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Resolved | JobStatus::Rejected)
    }
}

/// The persisted outcome of a job.
///
/// `result_url` is non-empty exactly when the status is `Resolved`; build
/// records through [`JobRecord::pending`], [`JobRecord::resolved`] and
/// [`JobRecord::rejected`] to keep that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(rename = "resultURL")]
    pub result_url: String,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn pending(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            result_url: String::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn resolved(job_id: Uuid, result_url: impl Into<String>) -> Self {
        Self {
            job_id,
            status: JobStatus::Resolved,
            result_url: result_url.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn rejected(job_id: Uuid) -> Self {
        Self {
            job_id,
            status: JobStatus::Rejected,
            result_url: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Sort records newest first, the order the read path exposes.
pub fn sort_by_recency(records: &mut [JobRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Payload carried by the work queue. Only the job id travels; the result
/// store owns everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: Uuid,
}

impl QueueMessage {
    pub fn new(job_id: Uuid) -> Self {
        Self { job_id }
    }
}
