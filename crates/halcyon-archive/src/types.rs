use serde::{Deserialize, Serialize};

/// Role of a single turn (spec.md §3 "Turn").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One user/assistant/system message (spec.md §3 "Turn").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Monotonic milliseconds.
    pub timestamp: i64,
    pub session_key: String,
}

/// A row in the Archive's primary table (spec.md §3 "Archive record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub session_key: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    pub tags: Option<String>,
}

/// A removed world-model line, kept for audit (spec.md §3 "WorldModel update").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldModelHistoryEntry {
    pub id: i64,
    pub section: String,
    pub field: String,
    pub value: String,
    pub reason: String,
    pub removed_at: String,
}
