//! Core data model for the studiora job system.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::Error;

/// The closed set of asynchronous job types the platform runs.
///
/// Handler registration is keyed on this enum so the compiler enforces
/// that every type has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Ingest an uploaded study material (pages, chunks, sections).
    MaterialUpload,
    /// Synthesize a lesson from ingested material via the generation provider.
    LessonGeneration,
    /// Grade a learner's check-in answers via the generation provider.
    CheckInEvaluation,
}

impl JobType {
    /// All job types, in registration order.
    pub const ALL: [JobType; 3] = [
        JobType::MaterialUpload,
        JobType::LessonGeneration,
        JobType::CheckInEvaluation,
    ];

    /// Stable string form used in the database and in queue routing.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::MaterialUpload => "material_upload",
            JobType::LessonGeneration => "lesson_generation",
            JobType::CheckInEvaluation => "check_in_evaluation",
        }
    }

    /// The named queue this job type is delivered on.
    ///
    /// Generation-provider work shares one queue with a conservative retry
    /// policy; uploads get their own queue with more retry headroom.
    pub fn queue(&self) -> QueueName {
        match self {
            JobType::MaterialUpload => QueueName::Upload,
            JobType::LessonGeneration | JobType::CheckInEvaluation => QueueName::Generation,
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "material_upload" => Ok(JobType::MaterialUpload),
            "lesson_generation" => Ok(JobType::LessonGeneration),
            "check_in_evaluation" => Ok(JobType::CheckInEvaluation),
            other => Err(Error::InvalidInput(format!("unknown job type: {other}"))),
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job.
///
/// Transitions form a strict state machine:
/// `Queued → Processing → { Completed | Failed }`. Terminal states are
/// final; a late update from a stale worker is a no-op, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether this status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of trackable asynchronous work.
///
/// A job belongs to exactly one tenant for its entire lifetime; nothing in
/// the system mutates `tenant_id` after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Opaque structured input for the handler.
    pub payload: Option<JsonValue>,
    /// Present only when `status == Completed`.
    pub result: Option<JsonValue>,
    /// Present only when `status == Failed`.
    pub error_message: Option<String>,
    /// 0–100, monotone non-decreasing while processing.
    pub progress_percent: i32,
    /// Structured per-phase detail; updates merge rather than overwrite.
    pub progress_metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filters and pagination for listing a tenant's jobs.
#[derive(Debug, Clone, Default)]
pub struct ListJobsRequest {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Compact per-job status row returned by batch polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress_percent: i32,
    pub error_message: Option<String>,
}

/// Named durable queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Upload,
    Generation,
}

impl QueueName {
    /// All queues, in worker start order.
    pub const ALL: [QueueName; 2] = [QueueName::Upload, QueueName::Generation];

    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Upload => "upload",
            QueueName::Generation => "generation",
        }
    }
}

impl std::str::FromStr for QueueName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(QueueName::Upload),
            "generation" => Ok(QueueName::Generation),
            other => Err(Error::InvalidInput(format!("unknown queue: {other}"))),
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budget and backoff shape for one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Total delivery attempts, the first included.
    pub max_attempts: i32,
    /// Base delay before the first redelivery; doubles per attempt.
    pub base_delay: Duration,
}

impl QueuePolicy {
    /// Built-in policy for a queue.
    ///
    /// Generation retries are expensive provider calls and rarely succeed
    /// from a second identical attempt, hence the smaller budget and the
    /// longer base delay.
    pub fn for_queue(queue: QueueName) -> Self {
        match queue {
            QueueName::Upload => Self {
                max_attempts: defaults::UPLOAD_MAX_ATTEMPTS,
                base_delay: Duration::from_secs(defaults::UPLOAD_BACKOFF_BASE_SECS),
            },
            QueueName::Generation => Self {
                max_attempts: defaults::GENERATION_MAX_ATTEMPTS,
                base_delay: Duration::from_secs(defaults::GENERATION_BACKOFF_BASE_SECS),
            },
        }
    }

    /// Built-in policy for a queue with environment overrides applied.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `QUEUE_UPLOAD_ATTEMPTS` | `3` |
    /// | `QUEUE_UPLOAD_BACKOFF_SECS` | `2` |
    /// | `QUEUE_GENERATION_ATTEMPTS` | `2` |
    /// | `QUEUE_GENERATION_BACKOFF_SECS` | `5` |
    pub fn from_env(queue: QueueName) -> Self {
        let base = Self::for_queue(queue);
        let (attempts_var, backoff_var) = match queue {
            QueueName::Upload => ("QUEUE_UPLOAD_ATTEMPTS", "QUEUE_UPLOAD_BACKOFF_SECS"),
            QueueName::Generation => (
                "QUEUE_GENERATION_ATTEMPTS",
                "QUEUE_GENERATION_BACKOFF_SECS",
            ),
        };

        let max_attempts = std::env::var(attempts_var)
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .map(|v| v.max(1))
            .unwrap_or(base.max_attempts);
        let base_delay = std::env::var(backoff_var)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(base.base_delay);

        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before redelivering after the given failed attempt (1-based).
    pub fn backoff(&self, failed_attempt: i32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).clamp(0, 16) as u32;
        self.base_delay.saturating_mul(2u32.saturating_pow(exponent))
    }
}

/// A claimed delivery from a durable queue.
///
/// Owned by the queue alone; tenant code observes jobs, never entries.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub queue: QueueName,
    /// Delivery attempt number, 1-based after a claim.
    pub attempt: i32,
    pub max_attempts: i32,
    /// Next time the entry becomes claimable. After a claim this holds the
    /// lease deadline: if the worker vanishes, redelivery happens then.
    pub scheduled_at: DateTime<Utc>,
}

/// What happened to an entry after its delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Attempts remain; the entry was rescheduled.
    Requeued { next_at: DateTime<Utc> },
    /// Budget exhausted; the entry moved to the dead-letter state.
    Dead,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Admissions left in the current window (0 when rejected).
    pub remaining: u64,
    /// How long the caller should wait before retrying; set on rejection.
    pub retry_after: Option<Duration>,
}

impl Admission {
    /// An admission granted with the given remaining budget.
    pub fn granted(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    /// A rejection with a retry hint.
    pub fn rejected(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_round_trip() {
        for jt in JobType::ALL {
            let parsed: JobType = jt.as_str().parse().unwrap();
            assert_eq!(jt, parsed);
        }
    }

    #[test]
    fn job_type_unknown_is_error() {
        assert!("embedding".parse::<JobType>().is_err());
        assert!("".parse::<JobType>().is_err());
    }

    #[test]
    fn job_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = status.as_str().parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn queue_routing() {
        assert_eq!(JobType::MaterialUpload.queue(), QueueName::Upload);
        assert_eq!(JobType::LessonGeneration.queue(), QueueName::Generation);
        assert_eq!(JobType::CheckInEvaluation.queue(), QueueName::Generation);
    }

    #[test]
    fn queue_policies() {
        let upload = QueuePolicy::for_queue(QueueName::Upload);
        assert_eq!(upload.max_attempts, 3);
        assert_eq!(upload.base_delay, Duration::from_secs(2));

        let generation = QueuePolicy::for_queue(QueueName::Generation);
        assert_eq!(generation.max_attempts, 2);
        assert_eq!(generation.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn queue_policy_from_env_defaults_match_builtins() {
        // The override variables are unset in the test environment.
        for queue in QueueName::ALL {
            assert_eq!(QueuePolicy::from_env(queue), QueuePolicy::for_queue(queue));
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = QueuePolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_attempt_zero_clamps_to_base() {
        let policy = QueuePolicy::for_queue(QueueName::Upload);
        assert_eq!(policy.backoff(0), policy.base_delay);
    }

    #[test]
    fn admission_constructors() {
        let ok = Admission::granted(4);
        assert!(ok.allowed);
        assert_eq!(ok.remaining, 4);
        assert!(ok.retry_after.is_none());

        let no = Admission::rejected(Duration::from_secs(60));
        assert!(!no.allowed);
        assert_eq!(no.remaining, 0);
        assert_eq!(no.retry_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn job_serde_round_trip() {
        let job = Job {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            job_type: JobType::MaterialUpload,
            status: JobStatus::Queued,
            payload: Some(serde_json::json!({"material_id": "m1"})),
            result: None,
            error_message: None,
            progress_percent: 0,
            progress_metadata: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"material_upload\""));
        assert!(json.contains("\"queued\""));

        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.job_type, job.job_type);
        assert_eq!(back.status, job.status);
    }
}
