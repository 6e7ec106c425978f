use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Hierarchical session key `(agent, channel, target)`, rendered
/// canonically as `agent:channel:target` (spec.md §3). `target` may itself
/// contain colons (`dm:<userId>`, `channel:<channelId>`, `email:<addr>`).
/// Parsing splits on the first two colons only. Keys are the *only*
/// identity for a conversation.
///
/// This is the boundary format chosen for the session-key open question
/// (see DESIGN.md): the agent segment is always present, even for the
/// single built-in agent (`"main"`). A key with fewer than two colons is
/// rejected rather than reinterpreted as a two-segment form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub agent: String,
    pub channel: String,
    pub target: String,
}

impl SessionKey {
    pub fn new(agent: impl Into<String>, channel: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            channel: channel.into(),
            target: target.into(),
        }
    }

    pub fn format(&self) -> String {
        format!("{}:{}:{}", self.agent, self.channel, self.target)
    }

    /// Parse `agent:channel:target`, splitting on the first two colons
    /// only. Fails loudly (rather than silently reinterpreting) on any
    /// other shape, including the two-segment `channel:target` form.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let agent = parts.next().filter(|s| !s.is_empty());
        let channel = parts.next().filter(|s| !s.is_empty());
        let target = parts.next().filter(|s| !s.is_empty());

        match (agent, channel, target) {
            (Some(agent), Some(channel), Some(target)) => Ok(Self {
                agent: agent.to_string(),
                channel: channel.to_string(),
                target: target.to_string(),
            }),
            _ => Err(SessionError::InvalidKey(format!(
                "expected agent:channel:target (three non-empty segments, first two colons only): {s}"
            ))),
        }
    }

    /// Hex-encode the key for use as a filename (spec.md §3: "Filename
    /// derivation MUST be reversible").
    pub fn to_hex(&self) -> String {
        hex::encode(self.format().as_bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| SessionError::InvalidKey(format!("bad hex filename: {e}")))?;
        let s = String::from_utf8(bytes)
            .map_err(|e| SessionError::InvalidKey(format!("hex filename is not UTF-8: {e}")))?;
        Self::parse(&s)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_key() {
        let key = SessionKey::new("main", "discord", "dm:42");
        let s = key.format();
        assert_eq!(s, "main:discord:dm:42");
        let parsed = SessionKey::parse(&s).expect("parse failed");
        assert_eq!(parsed, key);
    }

    #[test]
    fn target_may_contain_colons() {
        let key = SessionKey::new("main", "discord", "channel:123:thread:5");
        let parsed = SessionKey::parse(&key.format()).unwrap();
        assert_eq!(parsed.target, "channel:123:thread:5");
    }

    #[test]
    fn invariant1_hex_roundtrip_is_reversible() {
        let key = SessionKey::new("main", "cli", "main");
        let hex = key.to_hex();
        let decoded = SessionKey::from_hex(&hex).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn rejects_two_segment_legacy_form_at_ingress() {
        // the rejected two-segment `channel:target` convention omits the
        // agent segment entirely — only one colon, not the required two.
        assert!(SessionKey::parse("discord:42").is_err());
    }

    #[test]
    fn rejects_missing_target() {
        assert!(SessionKey::parse("main:discord").is_err());
    }
}
