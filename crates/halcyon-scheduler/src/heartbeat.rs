//! HeartbeatRunner (C9, spec.md §4.9): a periodic proactive tick, decoupled
//! from the agent/session machinery behind [`HeartbeatHost`] so this crate
//! never depends on `halcyon-agent` or `halcyon-channels` directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use halcyon_core::ConfigStore;

use crate::types::HeartbeatRun;

/// Result of running one heartbeat tick. `response` is `None` when the
/// instruction produced nothing worth delivering (spec.md §4.9: an empty
/// response is treated as a no-op, not a failure).
pub struct HeartbeatTickOutcome {
    pub response: Option<String>,
    pub delivery_target: String,
}

/// The agent/session side of a heartbeat tick. Implemented in
/// `halcyon-gateway`, which owns the RequestQueue, SessionRouter, and
/// Extractor this needs to log turns, run the instruction, and extract.
#[async_trait]
pub trait HeartbeatHost: Send + Sync {
    /// Run `instruction` with an optional model override, logging the
    /// exchange against the last-known DM session (or outside any session
    /// if none exists yet) and firing extraction afterward.
    async fn tick(&self, instruction: &str, model_override: Option<&str>) -> HeartbeatTickOutcome;
}

pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// `HH:MM`, inclusive start of the active-hours window. Equal to `end`
    /// means "always active" (spec.md §4.9, invariant 9).
    pub active_start: String,
    pub active_end: String,
    pub instruction_path: PathBuf,
}

pub struct HeartbeatRunner {
    config: HeartbeatConfig,
    config_store: Arc<ConfigStore>,
    host: Arc<dyn HeartbeatHost>,
    runs_path: PathBuf,
}

impl HeartbeatRunner {
    /// Where the instruction text lives, for the ManagementAPI's
    /// content get/put routes (spec.md §4.13).
    pub fn instruction_path(&self) -> &Path {
        &self.config.instruction_path
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn active_window(&self) -> (&str, &str) {
        (&self.config.active_start, &self.config.active_end)
    }

    pub fn new(
        data_dir: impl AsRef<Path>,
        config: HeartbeatConfig,
        config_store: Arc<ConfigStore>,
        host: Arc<dyn HeartbeatHost>,
    ) -> Self {
        Self {
            config,
            config_store,
            host,
            runs_path: data_dir.as_ref().join("heartbeat/runs.jsonl"),
        }
    }

    /// Ticks on `config.interval`, after an initial 30s delay so the gateway
    /// has time to finish restoring channels before the first heartbeat goes
    /// out (spec.md §4.9).
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("heartbeat disabled, runner not starting");
            return;
        }
        info!("heartbeat runner started");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => {}
            _ = shutdown.changed() => { return; }
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.tick().await; // first tick fires immediately after the 30s delay
        loop {
            self.run_tick_if_active().await;
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat runner shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_tick_if_active(&self) {
        if !in_active_window(&self.config.active_start, &self.config.active_end, Utc::now()) {
            return;
        }

        let instruction = match std::fs::read_to_string(&self.config.instruction_path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return,
            Err(_) => return,
        };

        let model_override = self.config_store.load_heartbeat_model();
        let started_at = Utc::now();
        let outcome = self.host.tick(instruction.trim(), model_override.as_deref()).await;

        let run = match &outcome.response {
            Some(text) => HeartbeatRun {
                started_at,
                completed_at: Utc::now(),
                success: true,
                response: Some(text.clone()),
                error: None,
            },
            None => HeartbeatRun {
                started_at,
                completed_at: Utc::now(),
                success: false,
                response: None,
                error: Some("empty response".to_string()),
            },
        };

        if run.success {
            info!(target = %outcome.delivery_target, "heartbeat tick delivered");
        } else {
            warn!("heartbeat tick produced no response, skipping delivery");
        }

        if let Err(e) = append_run(&self.runs_path, &run) {
            error!(error = %e, "failed to append heartbeat run record");
        }
    }

    /// Most recent `limit` runs, newest first (management API, spec.md §4.13).
    pub async fn runs(&self, limit: usize) -> Vec<HeartbeatRun> {
        let Ok(text) = std::fs::read_to_string(&self.runs_path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect::<Vec<HeartbeatRun>>()
            .into_iter()
            .rev()
            .take(limit)
            .collect()
    }
}

/// Supports overnight windows (e.g. `22:00`-`06:00`) as well as same-day
/// ones. `start == end` means always active (spec.md §4.9).
fn in_active_window(start: &str, end: &str, now: chrono::DateTime<Utc>) -> bool {
    let (Some(start), Some(end)) = (parse_hm(start), parse_hm(end)) else {
        return true;
    };
    if start == end {
        return true;
    }
    let now = now.time();
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

fn parse_hm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

fn append_run(path: &Path, run: &HeartbeatRun) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(run).expect("HeartbeatRun always serializes");
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_day_window_is_exclusive_of_end() {
        let noon = chrono::DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(in_active_window("09:00", "17:00", noon));

        let past_end = chrono::DateTime::parse_from_rfc3339("2026-01-01T17:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!in_active_window("09:00", "17:00", past_end));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let late = chrono::DateTime::parse_from_rfc3339("2026-01-01T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(in_active_window("22:00", "06:00", late));

        let early = chrono::DateTime::parse_from_rfc3339("2026-01-01T05:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(in_active_window("22:00", "06:00", early));

        let midday = chrono::DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(!in_active_window("22:00", "06:00", midday));
    }

    #[test]
    fn equal_start_and_end_means_always_active() {
        let any = Utc::now();
        assert!(in_active_window("00:00", "00:00", any));
    }

    #[tokio::test]
    async fn tick_appends_a_run_record_for_an_empty_response() {
        struct EmptyHost;
        #[async_trait]
        impl HeartbeatHost for EmptyHost {
            async fn tick(&self, _instruction: &str, _model_override: Option<&str>) -> HeartbeatTickOutcome {
                HeartbeatTickOutcome { response: None, delivery_target: "cli:main".to_string() }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let instruction_path = dir.path().join("heartbeat/instructions.md");
        std::fs::create_dir_all(instruction_path.parent().unwrap()).unwrap();
        std::fs::write(&instruction_path, "check in on the user").unwrap();

        let runner = HeartbeatRunner::new(
            dir.path(),
            HeartbeatConfig {
                enabled: true,
                interval: Duration::from_secs(900),
                active_start: "00:00".to_string(),
                active_end: "00:00".to_string(),
                instruction_path,
            },
            Arc::new(ConfigStore::new(dir.path())),
            Arc::new(EmptyHost),
        );

        runner.run_tick_if_active().await;
        let text = std::fs::read_to_string(dir.path().join("heartbeat/runs.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"success\":false"));
    }

    #[tokio::test]
    async fn missing_instruction_file_skips_silently() {
        struct PanicHost;
        #[async_trait]
        impl HeartbeatHost for PanicHost {
            async fn tick(&self, _instruction: &str, _model_override: Option<&str>) -> HeartbeatTickOutcome {
                panic!("should never be called when the instruction file is absent");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let runner = HeartbeatRunner::new(
            dir.path(),
            HeartbeatConfig {
                enabled: true,
                interval: Duration::from_secs(900),
                active_start: "00:00".to_string(),
                active_end: "00:00".to_string(),
                instruction_path: dir.path().join("heartbeat/instructions.md"),
            },
            Arc::new(ConfigStore::new(dir.path())),
            Arc::new(PanicHost),
        );

        runner.run_tick_if_active().await;
        assert!(!dir.path().join("heartbeat/runs.jsonl").exists());
    }
}
