//! RestartManager (C11, spec.md §4.11): process restart via an external
//! supervisor, with a "successor protocol" — a persisted sentinel lets the
//! process that starts back up pick up the originating delivery target and
//! notify whoever asked for the restart that it's back.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use halcyon_core::atomic::write_atomic;

const RESTART_COMMAND_ENV: &str = "HALCYON_RESTART_COMMAND";
const DEFAULT_RESTART_COMMAND: &str = "systemctl --user restart halcyon";

/// spec.md §3 "Restart sentinel": `{reason, timestamp, sessionKey?,
/// deliveryTarget?, replyTo?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartSentinel {
    pub reason: String,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub session_key: Option<String>,
    pub delivery_target: Option<String>,
    pub reply_to: Option<String>,
}

/// Persists to `<dataDir>/restart-sentinel.json` (spec.md §6 on-disk layout).
pub struct RestartManager {
    sentinel_path: PathBuf,
}

impl RestartManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self { sentinel_path: data_dir.as_ref().join("restart-sentinel.json") }
    }

    /// Write the sentinel, then hand off to the external supervisor. A
    /// caller that gets `Ok(())` back should expect the process to be
    /// killed imminently, not necessarily before this call returns.
    pub fn trigger_restart(
        &self,
        reason: &str,
        session_key: Option<&str>,
        delivery_target: Option<&str>,
        reply_to: Option<&str>,
    ) -> std::io::Result<()> {
        self.write_sentinel(reason, session_key, delivery_target, reply_to)?;
        info!(reason, delivery_target = ?delivery_target, "restart sentinel written, invoking supervisor");
        spawn_supervisor_restart()
    }

    fn write_sentinel(
        &self,
        reason: &str,
        session_key: Option<&str>,
        delivery_target: Option<&str>,
        reply_to: Option<&str>,
    ) -> std::io::Result<()> {
        let sentinel = RestartSentinel {
            reason: reason.to_string(),
            requested_at: chrono::Utc::now(),
            session_key: session_key.map(str::to_string),
            delivery_target: delivery_target.map(str::to_string),
            reply_to: reply_to.map(str::to_string),
        };
        let text = serde_json::to_string_pretty(&sentinel).expect("sentinel always serializes");
        write_atomic(&self.sentinel_path, &text)
    }

    /// Read-once-and-delete. `None` means a normal (non-restart) startup.
    /// A malformed sentinel is deleted and treated as absent rather than
    /// blocking startup (spec.md §7 "Persisted-state corruption").
    pub fn consume(&self) -> Option<RestartSentinel> {
        let text = std::fs::read_to_string(&self.sentinel_path).ok()?;
        let _ = std::fs::remove_file(&self.sentinel_path);
        match serde_json::from_str(&text) {
            Ok(sentinel) => Some(sentinel),
            Err(e) => {
                warn!(error = %e, "corrupt restart sentinel, ignoring");
                None
            }
        }
    }
}

/// Ask whatever external supervisor manages this process to restart it: a
/// detached self-deleting shell script, so the restart command runs after
/// this process has had a moment to exit.
fn spawn_supervisor_restart() -> std::io::Result<()> {
    let command = std::env::var(RESTART_COMMAND_ENV).unwrap_or_else(|_| DEFAULT_RESTART_COMMAND.to_string());
    let script_path = std::env::temp_dir().join(format!("halcyon-restart-{}.sh", uuid::Uuid::new_v4()));
    std::fs::write(&script_path, format!("sleep 1\n{command}\nrm -f \"$0\"\n"))?;
    Command::new("sh").arg(&script_path).spawn()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_is_read_once() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = RestartManager::new(dir.path());
        mgr.write_sentinel("upgrade", Some("main:discord:dm:1"), Some("discord:dm:1"), None).unwrap();

        let first = mgr.consume().unwrap();
        assert_eq!(first.reason, "upgrade");
        assert_eq!(first.delivery_target.as_deref(), Some("discord:dm:1"));
        assert_eq!(first.session_key.as_deref(), Some("main:discord:dm:1"));
        assert!(mgr.consume().is_none());
    }

    #[test]
    fn absent_sentinel_consumes_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = RestartManager::new(dir.path());
        assert!(mgr.consume().is_none());
    }

    #[test]
    fn corrupt_sentinel_is_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("restart-sentinel.json"), "not json").unwrap();
        let mgr = RestartManager::new(dir.path());
        assert!(mgr.consume().is_none());
    }
}
