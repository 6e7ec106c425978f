//! Builds the per-call LLM message sequence (spec.md §4.5). This REPLACES
//! whatever history the runtime's own scratch has accumulated — the
//! assembler is the source of truth, installed as the runtime's
//! `transformContext` hook.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use halcyon_session::{SessionBuffer, SessionKey};
use halcyon_worldmodel::WorldModel;

use crate::provider::{Message, Role};
use crate::runtime::ScratchMessage;

const WORLD_MODEL_ACK: &str = "Understood. I have my world model loaded.";

pub struct ContextAssembler {
    world_model: Arc<WorldModel>,
    buffer: Arc<SessionBuffer>,
    current_session: RwLock<Option<SessionKey>>,
}

impl ContextAssembler {
    pub fn new(world_model: Arc<WorldModel>, buffer: Arc<SessionBuffer>) -> Self {
        Self { world_model, buffer, current_session: RwLock::new(None) }
    }

    /// Called by SessionRouter before each inbound message is processed.
    pub fn set_current_session(&self, key: Option<SessionKey>) {
        *self.current_session.write().unwrap() = key;
    }

    /// The `transformContext` hook body (spec.md §4.5). Tolerates an empty
    /// session key (startup) by returning the scratch unchanged.
    pub fn transform(&self, scratch: &[ScratchMessage]) -> Vec<Message> {
        let Some(key) = self.current_session.read().unwrap().clone() else {
            return scratch.iter().map(|s| s.message.clone()).collect();
        };

        let mut out = Vec::new();

        let world_model_text = match self.world_model.load() {
            Ok(text) => text,
            Err(_) => String::new(),
        };
        out.push(Message {
            role: Role::User,
            content: format!(
                "<world_model>\n{world_model_text}\n</world_model>\n\n<instruction to use for context, not to echo>"
            ),
        });
        out.push(Message { role: Role::Assistant, content: WORLD_MODEL_ACK.to_string() });

        let buffered = self.buffer.get_turns(&key);
        let newest_buffered: Option<DateTime<Utc>> = buffered.last().map(|t| t.timestamp);
        for turn in &buffered {
            out.push(Message { role: role_from_str(&turn.role), content: turn.content.clone() });
        }

        let current_turn: Vec<&ScratchMessage> = match newest_buffered {
            Some(newest) => scratch.iter().filter(|s| s.timestamp > newest).collect(),
            None => scratch.iter().collect(),
        };

        if current_turn.is_empty() {
            if let Some(last) = scratch.last() {
                out.push(last.message.clone());
            }
        } else {
            for s in current_turn {
                out.push(s.message.clone());
            }
        }

        out
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halcyon_archive::Archive;
    use halcyon_session::log::Turn as SessionTurn;

    fn fixture() -> (tempfile::TempDir, ContextAssembler) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Arc::new(Archive::open_in_memory().unwrap());
        let wm = Arc::new(WorldModel::new(dir.path().join("world-model.md"), archive));
        let buffer = Arc::new(SessionBuffer::new(10));
        (dir, ContextAssembler::new(wm, buffer))
    }

    fn scratch(text: &str) -> ScratchMessage {
        ScratchMessage { message: Message { role: Role::User, content: text.to_string() }, timestamp: Utc::now() }
    }

    #[test]
    fn empty_session_key_returns_scratch_unchanged() {
        let (_dir, assembler) = fixture();
        let s = vec![scratch("hi")];
        let out = assembler.transform(&s);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "hi");
    }

    #[test]
    fn world_model_and_ack_always_lead() {
        let (_dir, assembler) = fixture();
        let key = SessionKey::new("main", "cli", "main");
        assembler.set_current_session(Some(key));
        let out = assembler.transform(&[scratch("hello")]);
        assert!(out[0].content.contains("<world_model>"));
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content, WORLD_MODEL_ACK);
    }

    #[test]
    fn falls_back_to_last_scratch_message_when_nothing_newer() {
        let (_dir, assembler) = fixture();
        let key = SessionKey::new("main", "cli", "main");
        assembler.set_current_session(Some(key.clone()));

        let old_turn = SessionTurn { role: "user".to_string(), content: "old".to_string(), timestamp: Utc::now() };
        assembler.buffer.append(&key, old_turn);

        // a scratch message with a timestamp older than the buffered turn:
        // nothing qualifies as "current turn", so the fallback applies.
        let stale = ScratchMessage {
            message: Message { role: Role::User, content: "stale".to_string() },
            timestamp: Utc::now() - chrono::Duration::seconds(10),
        };
        let out = assembler.transform(&[stale]);
        assert_eq!(out.last().unwrap().content, "stale");
    }

    #[test]
    fn emits_only_scratch_messages_newer_than_newest_buffered_turn() {
        let (_dir, assembler) = fixture();
        let key = SessionKey::new("main", "cli", "main");
        assembler.set_current_session(Some(key.clone()));

        let old_turn = SessionTurn { role: "user".to_string(), content: "old".to_string(), timestamp: Utc::now() };
        assembler.buffer.append(&key, old_turn);

        let fresh = scratch("new message");
        let out = assembler.transform(&[fresh]);
        assert_eq!(out.last().unwrap().content, "new message");
    }
}
