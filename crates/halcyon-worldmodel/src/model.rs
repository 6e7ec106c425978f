use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use halcyon_archive::Archive;

use crate::error::Result;
use crate::parse::ParsedDocument;

/// Fixed section schema (spec.md §3 "WorldModel document"). `applyUpdates`
/// never auto-creates a section outside this list.
pub const SECTIONS: &[&str] = &[
    "Identity",
    "Current Task",
    "Active Projects",
    "Key Technical Decisions",
    "Preferences & Patterns",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Replace,
    Add,
    Remove,
}

/// `{action, section, field, value?}` (spec.md §3 "WorldModel update").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub action: UpdateAction,
    pub section: String,
    pub field: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Single markdown document under the fixed schema above. `load()` caches
/// after the first read; every write goes through an atomic tmp+rename
/// (spec.md §4.4).
pub struct WorldModel {
    path: PathBuf,
    cache: RwLock<Option<String>>,
    archive: std::sync::Arc<Archive>,
}

impl WorldModel {
    pub fn new(path: impl Into<PathBuf>, archive: std::sync::Arc<Archive>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
            archive,
        }
    }

    /// Cached after first read; if the file is missing, instantiate from
    /// the built-in template and persist it.
    pub fn load(&self) -> Result<String> {
        if let Some(text) = self.cache.read().unwrap().clone() {
            return Ok(text);
        }
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let template = builtin_template();
                self.save(&template)?;
                return self.load();
            }
            Err(e) => return Err(e.into()),
        };
        *self.cache.write().unwrap() = Some(text.clone());
        Ok(text)
    }

    /// Atomic write: `<path>.tmp` then rename over `<path>`. Rewrites the
    /// `Last updated:` header line to the current timestamp. Updates cache.
    pub fn save(&self, text: &str) -> Result<()> {
        let mut doc = ParsedDocument::parse(text);
        doc.header = format!("Last updated: {}", chrono::Utc::now().to_rfc3339());
        let rendered = doc.render();
        halcyon_core::atomic::write_atomic(&self.path, &rendered)?;
        *self.cache.write().unwrap() = Some(rendered);
        Ok(())
    }

    /// Wholesale save, bypassing the update-merge algorithm.
    pub fn replace_content(&self, text: &str) -> Result<()> {
        self.save(text)
    }

    /// Parse current text into `(header, section -> lines)`, apply each
    /// update, rebuild, save. Unknown sections are skipped with a warning
    /// (spec.md §4.4).
    pub fn apply_updates(&self, updates: &[Update]) -> Result<()> {
        let current = self.load()?;
        let mut doc = ParsedDocument::parse(&current);

        for update in updates {
            if !SECTIONS.contains(&update.section.as_str()) {
                warn!(section = %update.section, "apply_updates: unknown section, skipping");
                continue;
            }
            // Ensure the section node exists even if it was absent from the
            // on-disk text but is part of the fixed schema.
            if doc.section(&update.section).is_none() {
                doc.sections.push(crate::parse::Section {
                    name: update.section.clone(),
                    lines: Vec::new(),
                });
            }
            self.apply_one(&mut doc, update)?;
        }

        self.save(&doc.render())
    }

    fn apply_one(&self, doc: &mut ParsedDocument, update: &Update) -> Result<()> {
        let section = doc.section_mut(&update.section).expect("ensured above");
        match update.action {
            UpdateAction::Replace => {
                let value = update.value.clone().unwrap_or_default();
                let line = format!("- {}: {}", update.field, value);
                match section.find_field(&update.field) {
                    Some(idx) => section.lines[idx] = line,
                    None => section.lines.push(line),
                }
            }
            UpdateAction::Add => {
                let value = update.value.clone().unwrap_or_default();
                section.lines.push(format!("- {}: {}", update.field, value));
            }
            UpdateAction::Remove => {
                if let Some(idx) = section.find_field(&update.field) {
                    let removed_value = crate::parse::field_value(&section.lines[idx])
                        .unwrap_or_default();
                    section.lines.remove(idx);
                    self.archive.archive_world_model_item(
                        &update.section,
                        &update.field,
                        &removed_value,
                        "removed via apply_updates",
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn builtin_template() -> String {
    let mut out = format!("Last updated: {}\n", chrono::Utc::now().to_rfc3339());
    for section in SECTIONS {
        out.push_str(&format!("\n## {section}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, WorldModel) {
        let dir = tempfile::tempdir().unwrap();
        let archive = std::sync::Arc::new(Archive::open_in_memory().unwrap());
        let wm = WorldModel::new(dir.path().join("world-model.md"), archive);
        (dir, wm)
    }

    #[test]
    fn load_missing_file_instantiates_template() {
        let (_dir, wm) = fixture();
        let text = wm.load().unwrap();
        for section in SECTIONS {
            assert!(text.contains(&format!("## {section}")));
        }
    }

    #[test]
    fn s4_replace_update_leaves_exactly_one_line() {
        let (_dir, wm) = fixture();
        wm.replace_content("Last updated: x\n\n## Current Task\n- Working on: X\n")
            .unwrap();
        wm.apply_updates(&[Update {
            action: UpdateAction::Replace,
            section: "Current Task".to_string(),
            field: "Working on".to_string(),
            value: Some("Y".to_string()),
        }])
        .unwrap();
        let text = wm.load().unwrap();
        let occurrences = text.matches("Working on:").count();
        assert_eq!(occurrences, 1);
        assert!(text.contains("Working on: Y"));
        assert!(!text.contains("Working on: X"));
    }

    #[test]
    fn invariant6_idempotent_remove() {
        let (_dir, wm) = fixture();
        wm.replace_content("Last updated: x\n\n## Current Task\n- Working on: X\n")
            .unwrap();
        let remove = Update {
            action: UpdateAction::Remove,
            section: "Current Task".to_string(),
            field: "Working on".to_string(),
            value: None,
        };
        wm.apply_updates(std::slice::from_ref(&remove)).unwrap();
        let after_first = wm.load().unwrap();
        wm.apply_updates(std::slice::from_ref(&remove)).unwrap();
        let after_second = wm.load().unwrap();
        // content minus the `Last updated:` line is unchanged
        let strip_header = |s: &str| s.lines().skip(1).collect::<Vec<_>>().join("\n");
        assert_eq!(strip_header(&after_first), strip_header(&after_second));
    }

    #[test]
    fn unknown_section_is_skipped_not_created() {
        let (_dir, wm) = fixture();
        wm.apply_updates(&[Update {
            action: UpdateAction::Add,
            section: "Nonexistent".to_string(),
            field: "x".to_string(),
            value: Some("y".to_string()),
        }])
        .unwrap();
        let text = wm.load().unwrap();
        assert!(!text.contains("## Nonexistent"));
    }
}
