//! Proactive scheduling: cron jobs (C10) and the heartbeat (C9), both
//! persisted as plain files under `DATA_DIR` rather than a database.
//!
//! Neither [`CronService`] nor [`HeartbeatRunner`] depends on
//! `halcyon-agent` or `halcyon-channels` directly — each calls back into a
//! small host trait ([`CronHost`], [`HeartbeatHost`]) that `halcyon-gateway`
//! implements on top of the RequestQueue, SessionRouter, and Extractor.

pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod schedule;
pub mod types;

pub use engine::{CronHost, CronService};
pub use error::{Result, SchedulerError};
pub use heartbeat::{HeartbeatConfig, HeartbeatHost, HeartbeatRunner, HeartbeatTickOutcome};
pub use schedule::{compute_next_run, parse_timezone};
pub use types::{CronJob, HeartbeatRun, JobRun, ScheduleType};
