use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a job's `schedule` string is interpreted (spec.md §3 "Cron job").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// `schedule` is an ISO-8601 instant; fires once then deactivates.
    At,
    /// `schedule` is a duration matching `^\d+[smhd]$`.
    Every,
    /// `schedule` is a standard 5-field cron expression.
    Cron,
}

/// A persisted cron job (spec.md §3 "Cron job", §4.10). `id` is unique;
/// `scheduleType` determines the syntax of `schedule`. A disabled job
/// occupies no runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub schedule: String,
    pub prompt: String,
    pub delivery: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// One line of `cron/runs/<jobId>.jsonl` (spec.md §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line of `heartbeat/runs.jsonl` (spec.md §4.9 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRun {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
