use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies which agent instance handles a session. The single built-in
/// agent is always named `main` (see the session-key convention decision
/// in DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn main() -> Self {
        Self("main".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A model reference, `provider/model` (spec.md §3). Not validated against
/// a provider registry here — that lives on the far side of the opaque
/// `AgentRuntime` interface — only shape-checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef(pub String);

impl ModelRef {
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        if s.trim().is_empty() || !s.contains('/') {
            return Err(crate::error::GatewayError::InvalidModelRef(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn provider(&self) -> &str {
        self.0.split_once('/').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// The model-id half, i.e. everything after the first `/`.
    pub fn model(&self) -> &str {
        self.0.split_once('/').map(|(_, m)| m).unwrap_or("")
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `name -> ref` mapping, lowercase keys, non-recursive resolution
/// (spec.md §4.12).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasMap(pub std::collections::HashMap<String, String>);

impl AliasMap {
    /// Resolve `input` as an alias first (case-insensitive), falling back
    /// to treating it as a literal model reference. Aliases never resolve
    /// to other aliases.
    pub fn resolve<'a>(&'a self, input: &'a str) -> &'a str {
        self.0
            .get(&input.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or(input)
    }

    pub fn set(&mut self, name: &str, model_ref: &str) {
        self.0.insert(name.to_ascii_lowercase(), model_ref.to_string());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }
}

/// Ordered list of model refs tried in sequence after a primary failure
/// (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackChain(pub Vec<String>);

impl FallbackChain {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
