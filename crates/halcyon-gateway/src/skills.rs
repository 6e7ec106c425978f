//! Skills store: flat markdown files under `DATA_DIR/skills/` (spec.md
//! §4.13 names the routes; SPEC_FULL.md §11 "Skills store" decides the
//! minimal shape, since nothing else in spec.md defines or reads a skill).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use halcyon_core::atomic::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

pub struct SkillStore {
    dir: PathBuf,
}

impl SkillStore {
    pub fn new(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = data_dir.as_ref().join("skills");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.md"))
    }

    pub fn list(&self) -> Vec<Skill> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut skills: Vec<Skill> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let name = path.file_stem()?.to_str()?.to_string();
                self.get(&name)
            })
            .collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    pub fn get(&self, name: &str) -> Option<Skill> {
        let path = self.path_for(name);
        let text = std::fs::read_to_string(&path).ok()?;
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let updated_at = modified.map(DateTime::<Utc>::from).unwrap_or_else(Utc::now);
        Some(Skill { name: name.to_string(), content: text, updated_at })
    }

    /// Create or overwrite. `name` must already be a bare identifier — the
    /// caller (the HTTP handler) rejects path separators before this runs.
    pub fn put(&self, name: &str, content: &str) -> std::io::Result<Skill> {
        write_atomic(&self.path_for(name), content)?;
        self.get(name).ok_or_else(|| {
            warn!(name, "skill written but could not be re-read immediately");
            std::io::Error::new(std::io::ErrorKind::Other, "skill write did not round-trip")
        })
    }

    pub fn delete(&self, name: &str) -> bool {
        std::fs::remove_file(self.path_for(name)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_list_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SkillStore::new(dir.path()).unwrap();
        store.put("greeting", "say hello warmly").unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("greeting").unwrap().content, "say hello warmly");
        assert!(store.delete("greeting"));
        assert!(store.get("greeting").is_none());
    }

    #[test]
    fn unknown_skill_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SkillStore::new(dir.path()).unwrap();
        assert!(store.get("nope").is_none());
    }
}
