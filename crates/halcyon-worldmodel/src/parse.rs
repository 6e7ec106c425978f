//! Markdown parsing for the WorldModel document (spec.md §4.4).
//!
//! Section boundary: a line matching `^## (.+)$`. Everything before the
//! first such line is the header. A field line within a section matches
//! `^\s*- <field>:\s`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub header: String,
    pub sections: Vec<Section>,
}

impl ParsedDocument {
    pub fn parse(text: &str) -> Self {
        let mut header_lines = Vec::new();
        let mut sections: Vec<Section> = Vec::new();

        for line in text.lines() {
            if let Some(name) = section_heading(line) {
                sections.push(Section {
                    name,
                    lines: Vec::new(),
                });
            } else if let Some(section) = sections.last_mut() {
                section.lines.push(line.to_string());
            } else {
                header_lines.push(line.to_string());
            }
        }

        Self {
            header: header_lines.join("\n"),
            sections,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.header.clone();
        for section in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("## {}\n", section.name));
            out.push_str(&section.lines.join("\n"));
            out.push('\n');
        }
        out
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

impl Section {
    /// Index of the first `- <field>: ...` line for `field`, if present.
    pub fn find_field(&self, field: &str) -> Option<usize> {
        self.lines.iter().position(|line| field_of(line).as_deref() == Some(field))
    }
}

fn section_heading(line: &str) -> Option<String> {
    let rest = line.strip_prefix("## ")?;
    if rest.trim().is_empty() {
        None
    } else {
        Some(rest.trim().to_string())
    }
}

/// Extract the field name from a `- <field>: <value>` line, if it matches.
pub fn field_of(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("- ")?;
    let (field, colon_rest) = rest.split_once(':')?;
    // require whitespace (or end of line) right after the colon, per the
    // `^\s*- <field>:\s` rule.
    if colon_rest.is_empty() || colon_rest.starts_with(char::is_whitespace) {
        Some(field.to_string())
    } else {
        None
    }
}

pub fn field_value(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("- ")?;
    let (_, value) = rest.split_once(':')?;
    Some(value.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Last updated: 2026-01-01T00:00:00Z\n\n## Current Task\n- Working on: X\n\n## Preferences & Patterns\n- Likes: tea\n";

    #[test]
    fn parses_header_and_sections() {
        let doc = ParsedDocument::parse(DOC);
        assert!(doc.header.contains("Last updated:"));
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.sections[0].name, "Current Task");
    }

    #[test]
    fn finds_field_within_section() {
        let doc = ParsedDocument::parse(DOC);
        let section = doc.section("Current Task").unwrap();
        assert_eq!(section.find_field("Working on"), Some(0));
        assert_eq!(field_value(&section.lines[0]), Some("X".to_string()));
    }

    #[test]
    fn field_of_rejects_non_field_lines() {
        assert_eq!(field_of("not a field line"), None);
        assert_eq!(field_of("- no colon here"), None);
        assert_eq!(field_of("- Working on: X"), Some("Working on".to_string()));
    }
}
