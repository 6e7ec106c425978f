//! CronService (C10, spec.md §4.10): file-persisted jobs, ticked once a
//! second, executed through a host-supplied callback so this crate never
//! depends on `halcyon-agent`'s RequestQueue directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use halcyon_core::atomic::write_atomic;

use crate::error::{Result, SchedulerError};
use crate::schedule::compute_next_run;
use crate::types::{CronJob, JobRun, ScheduleType};

/// The host side of a cron execution: run `prompt` through the RequestQueue
/// and deliver the text response to `delivery`. Implemented in
/// `halcyon-gateway`, where both RequestQueue and ChannelHub live.
#[async_trait]
pub trait CronHost: Send + Sync {
    async fn run_prompt(&self, prompt: &str) -> String;
    async fn deliver(&self, delivery: &str, text: &str);
}

struct JobRuntime {
    job: CronJob,
    next_run: Option<chrono::DateTime<Utc>>,
}

pub struct CronService {
    jobs_path: PathBuf,
    runs_dir: PathBuf,
    jobs: RwLock<Vec<JobRuntime>>,
    host: Arc<dyn CronHost>,
    tz: Tz,
}

impl CronService {
    /// `tz` is the wall-clock zone `cron`/`every` schedules are evaluated
    /// in (spec.md §4.10); callers resolve it once at startup from
    /// `cron_timezone`/`user_timezone` via [`crate::schedule::parse_timezone`].
    pub fn new(data_dir: impl AsRef<Path>, host: Arc<dyn CronHost>, tz: Tz) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            jobs_path: data_dir.join("cron/jobs.json"),
            runs_dir: data_dir.join("cron/runs"),
            jobs: RwLock::new(Vec::new()),
            host,
            tz,
        }
    }

    /// Load `jobs.json` (zero value if missing/corrupt) and schedule every
    /// enabled job (spec.md §4.10 "On start() every enabled job is scheduled").
    pub async fn start(&self) -> Result<()> {
        std::fs::create_dir_all(&self.runs_dir)?;
        let jobs = load_jobs(&self.jobs_path);
        let now = Utc::now();
        let mut runtimes = Vec::with_capacity(jobs.len());
        for job in jobs {
            let next_run = if job.enabled {
                match compute_next_run(&job, now, self.tz) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "could not schedule job, leaving unscheduled");
                        None
                    }
                }
            } else {
                None
            };
            runtimes.push(JobRuntime { job, next_run });
        }
        *self.jobs.write().await = runtimes;
        Ok(())
    }

    pub async fn add_job(
        &self,
        name: String,
        schedule_type: ScheduleType,
        schedule: String,
        prompt: String,
        delivery: String,
    ) -> Result<CronJob> {
        let job = CronJob {
            id: Uuid::new_v4().to_string(),
            name,
            schedule_type,
            schedule,
            prompt,
            delivery,
            enabled: true,
            created_at: Utc::now(),
        };
        let next_run = compute_next_run(&job, Utc::now(), self.tz)?;
        let mut jobs = self.jobs.write().await;
        jobs.push(JobRuntime { job: job.clone(), next_run });
        self.persist(&jobs)?;
        info!(job_id = %job.id, "cron job added");
        Ok(job)
    }

    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| j.job.id != id);
        if jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.persist(&jobs)?;
        info!(job_id = %id, "cron job removed");
        Ok(())
    }

    pub async fn list_jobs(&self) -> Vec<CronJob> {
        self.jobs.read().await.iter().map(|r| r.job.clone()).collect()
    }

    pub async fn runs(&self, id: &str, limit: usize) -> Vec<JobRun> {
        read_jsonl(&self.runs_dir.join(format!("{id}.jsonl")))
            .into_iter()
            .rev()
            .take(limit)
            .collect()
    }

    /// Force a run outside the schedule (spec.md §4.10 `triggerJob`).
    pub async fn trigger_job(&self, id: &str) -> Result<()> {
        let job = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .find(|r| r.job.id == id)
                .map(|r| r.job.clone())
                .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?
        };
        self.execute(&job).await;
        Ok(())
    }

    /// Main event loop. Polls every second until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("cron service started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<CronJob> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .filter(|r| r.job.enabled && r.next_run.is_some_and(|n| n <= now))
                .map(|r| r.job.clone())
                .collect()
        };

        for job in due {
            self.execute(&job).await;
            self.reschedule(&job.id, now).await;
        }
    }

    async fn reschedule(&self, id: &str, from: chrono::DateTime<Utc>) {
        let mut jobs = self.jobs.write().await;
        if let Some(runtime) = jobs.iter_mut().find(|r| r.job.id == id) {
            match compute_next_run(&runtime.job, from, self.tz) {
                Ok(Some(next)) => runtime.next_run = Some(next),
                Ok(None) => {
                    // schedule exhausted (an `at` job): deactivate.
                    runtime.job.enabled = false;
                    runtime.next_run = None;
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "failed to reschedule job, deactivating");
                    runtime.job.enabled = false;
                    runtime.next_run = None;
                }
            }
        }
        if let Err(e) = self.persist(&jobs) {
            error!(error = %e, "failed to persist cron jobs after tick");
        }
    }

    async fn execute(&self, job: &CronJob) {
        let started_at = Utc::now();
        info!(job_id = %job.id, %job.name, "executing cron job");
        let response = self.host.run_prompt(&job.prompt).await;
        let success = response != "(no response)";
        self.host.deliver(&job.delivery, &response).await;

        let run = JobRun {
            started_at,
            completed_at: Utc::now(),
            success,
            response: success.then(|| response.clone()),
            error: (!success).then(|| response.clone()),
        };
        if let Err(e) = append_jsonl(&self.runs_dir.join(format!("{}.jsonl", job.id)), &run) {
            error!(job_id = %job.id, error = %e, "failed to append cron run record");
        }
    }

    fn persist(&self, jobs: &[JobRuntime]) -> Result<()> {
        let plain: Vec<&CronJob> = jobs.iter().map(|r| &r.job).collect();
        let text = serde_json::to_string_pretty(&plain)?;
        write_atomic(&self.jobs_path, &text)?;
        Ok(())
    }
}

fn load_jobs(path: &Path) -> Vec<CronJob> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt cron jobs.json, starting empty");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn append_jsonl<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines().filter_map(|l| serde_json::from_str(l).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeHost {
        delivered: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl CronHost for FakeHost {
        async fn run_prompt(&self, prompt: &str) -> String {
            format!("ran: {prompt}")
        }
        async fn deliver(&self, delivery: &str, text: &str) {
            self.delivered.lock().unwrap().push((delivery.to_string(), text.to_string()));
        }
    }

    #[tokio::test]
    async fn add_persist_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost { delivered: Mutex::new(Vec::new()) });
        let svc = CronService::new(dir.path(), host.clone(), Tz::UTC);
        svc.start().await.unwrap();
        svc.add_job(
            "daily check-in".to_string(),
            ScheduleType::Cron,
            "0 9 * * *".to_string(),
            "summarize today".to_string(),
            "cli:main".to_string(),
        )
        .await
        .unwrap();

        let reloaded = CronService::new(dir.path(), host, Tz::UTC);
        reloaded.start().await.unwrap();
        let jobs = reloaded.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "daily check-in");
    }

    #[tokio::test]
    async fn trigger_job_runs_and_delivers_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost { delivered: Mutex::new(Vec::new()) });
        let svc = CronService::new(dir.path(), host.clone(), Tz::UTC);
        svc.start().await.unwrap();
        let job = svc
            .add_job(
                "manual".to_string(),
                ScheduleType::At,
                (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                "do it now".to_string(),
                "cli:main".to_string(),
            )
            .await
            .unwrap();

        svc.trigger_job(&job.id).await.unwrap();
        let delivered = host.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "cli:main");

        let runs = svc.runs(&job.id, 10).await;
        assert_eq!(runs.len(), 1);
        assert!(runs[0].success);
    }

    #[tokio::test]
    async fn remove_unknown_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost { delivered: Mutex::new(Vec::new()) });
        let svc = CronService::new(dir.path(), host, Tz::UTC);
        svc.start().await.unwrap();
        assert!(svc.remove_job("nonexistent").await.is_err());
    }
}
