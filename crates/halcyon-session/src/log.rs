//! Append-only per-session transcript (spec.md §4.1). One JSONL file per
//! session, named by the reversible hex encoding of the session key.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::Result;
use crate::key::SessionKey;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub key: SessionKey,
    pub message_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub path: PathBuf,
}

/// Append-only JSONL transcript store under `<root>/sessions/`.
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let dir = root.into().join("sessions");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.jsonl", key.to_hex()))
    }

    /// Migrate a sanitized-legacy filename to the hex form if the hex file
    /// doesn't exist yet. Legacy files are named by replacing `:` with `_`
    /// in the formatted key.
    fn migrate_legacy(&self, key: &SessionKey) -> Result<()> {
        let hex_path = self.path_for(key);
        if hex_path.exists() {
            return Ok(());
        }
        let legacy_name = format!("{}.jsonl", key.format().replace(':', "_"));
        let legacy_path = self.dir.join(legacy_name);
        if legacy_path.exists() {
            fs::rename(&legacy_path, &hex_path)?;
        }
        Ok(())
    }

    #[instrument(skip(self, turn), fields(key = %key))]
    pub fn append(&self, key: &SessionKey, turn: &Turn) -> Result<()> {
        self.migrate_legacy(key)?;
        let path = self.path_for(key);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(turn)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    pub fn read(&self, key: &SessionKey) -> Result<Vec<Turn>> {
        self.migrate_legacy(key)?;
        read_turns(&self.path_for(key))
    }

    pub fn exists(&self, key: &SessionKey) -> bool {
        self.path_for(key).exists() || {
            let legacy_name = format!("{}.jsonl", key.format().replace(':', "_"));
            self.dir.join(legacy_name).exists()
        }
    }

    pub fn clear(&self, key: &SessionKey) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            File::create(&path)?;
        }
        Ok(())
    }

    /// Scan the session directory. Filenames that don't hex-decode to a
    /// valid key are skipped rather than erroring (spec.md §4.1).
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(key) = SessionKey::from_hex(stem) else {
                continue;
            };
            let turns = read_turns(&path)?;
            out.push(SessionSummary {
                key,
                message_count: turns.len(),
                last_activity: turns.last().map(|t| t.timestamp),
                path,
            });
        }
        Ok(out)
    }
}

/// Best-effort line parse: a truncated final line (crash mid-write) is
/// logged and dropped rather than failing the whole read.
fn read_turns(path: &Path) -> Result<Vec<Turn>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut turns = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Turn>(&line) {
            Ok(turn) => turns.push(turn),
            Err(e) => warn!(error = %e, "skipping unparsable session log line (likely partial write)"),
        }
    }
    Ok(turns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(content: &str) -> Turn {
        Turn { role: "user".to_string(), content: content.to_string(), timestamp: Utc::now() }
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path()).unwrap();
        let key = SessionKey::new("main", "cli", "main");
        log.append(&key, &turn("hello")).unwrap();
        log.append(&key, &turn("world")).unwrap();
        let turns = log.read(&key).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].content, "world");
    }

    #[test]
    fn exists_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path()).unwrap();
        let key = SessionKey::new("main", "cli", "main");
        assert!(!log.exists(&key));
        log.append(&key, &turn("hi")).unwrap();
        assert!(log.exists(&key));
        log.clear(&key).unwrap();
        assert_eq!(log.read(&key).unwrap().len(), 0);
    }

    #[test]
    fn list_skips_undecodable_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path()).unwrap();
        let key = SessionKey::new("main", "cli", "main");
        log.append(&key, &turn("hi")).unwrap();
        std::fs::write(dir.path().join("sessions/not-hex-zzz.jsonl"), "garbage").unwrap();
        let summaries = log.list().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].key, key);
        assert_eq!(summaries[0].message_count, 1);
    }

    #[test]
    fn partial_last_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path()).unwrap();
        let key = SessionKey::new("main", "cli", "main");
        log.append(&key, &turn("hi")).unwrap();
        let path = dir.path().join(format!("sessions/{}.jsonl", key.to_hex()));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"role\":\"user\",\"conte").unwrap();
        let turns = log.read(&key).unwrap();
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn migrates_legacy_filename_to_hex() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path()).unwrap();
        let key = SessionKey::new("main", "cli", "main");
        let legacy_path = dir.path().join("sessions/main_cli_main.jsonl");
        std::fs::write(&legacy_path, serde_json::to_string(&turn("legacy")).unwrap() + "\n").unwrap();
        assert!(log.exists(&key));
        let turns = log.read(&key).unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "legacy");
        assert!(!legacy_path.exists());
    }
}
