//! One chat turn: persist the user message, ask the generator, extract any
//! proposed list, persist the cleaned reply. The proposed list is handed back
//! to the caller and never merged here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::database::TodoDatabase;
use crate::errors::TodoError;
use crate::llm_client::{Message, TextGenerator};
use crate::model::{ChatMessage, ChatRole, ListShape};
use crate::parser::parse_reply;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub list: Option<ListShape>,
}

pub struct ConversationLoop {
    db: Arc<TodoDatabase>,
    generator: Arc<dyn TextGenerator>,
    system_prompt: String,
}

impl ConversationLoop {
    pub fn new(
        db: Arc<TodoDatabase>,
        generator: Arc<dyn TextGenerator>,
        system_prompt: String,
    ) -> Self {
        Self {
            db,
            generator,
            system_prompt,
        }
    }

    pub async fn converse(
        &self,
        user_id: &str,
        list_id: &str,
        text: &str,
        prior: &[ChatMessage],
        snapshot: &ListShape,
    ) -> Result<ChatReply, TodoError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TodoError::validation("message", "must not be blank"));
        }

        self.db
            .add_chat_message(user_id, list_id, ChatRole::User, text)?;

        let messages = self.build_messages(text, prior, snapshot)?;
        tracing::debug!(
            "Generating reply for list {} with {} prior turn(s)",
            list_id,
            prior.len()
        );

        let raw = self
            .generator
            .generate(messages)
            .await
            .map_err(TodoError::Generation)?;

        let parsed = parse_reply(&raw);
        if parsed.list.is_some() {
            tracing::info!("Assistant proposed a replacement for list {}", list_id);
        }

        self.db.add_chat_message(
            user_id,
            list_id,
            ChatRole::Assistant,
            &parsed.message,
        )?;

        Ok(ChatReply {
            message: parsed.message,
            list: parsed.list,
        })
    }

    fn build_messages(
        &self,
        text: &str,
        prior: &[ChatMessage],
        snapshot: &ListShape,
    ) -> Result<Vec<Message>, TodoError> {
        let snapshot_json = serde_json::to_string(snapshot)
            .map_err(|e| TodoError::Storage(anyhow::Error::new(e).context("serialize list snapshot")))?;

        let mut messages = Vec::with_capacity(prior.len() + 2);
        messages.push(Message::new(ChatRole::System, self.system_prompt.clone()));
        messages.extend(
            prior
                .iter()
                .map(|turn| Message::new(turn.role, turn.content.clone())),
        );
        messages.push(Message::new(
            ChatRole::User,
            format!("{}\nCurrent list state: {}", text, snapshot_json),
        ));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedGenerator {
        reply: Option<String>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, messages: Vec<Message>) -> Result<String> {
            self.seen.lock().expect("lock").push(messages);
            self.reply
                .clone()
                .ok_or_else(|| anyhow::anyhow!("provider unreachable"))
        }
    }

    fn setup(generator: Arc<ScriptedGenerator>) -> (ConversationLoop, Arc<TodoDatabase>, String, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = Arc::new(TodoDatabase::new(dir.path().join("chat.db")).expect("db"));
        let list = db.create_list("u1", "Groceries").expect("list");
        let convo = ConversationLoop::new(db.clone(), generator, "be helpful".to_string());
        (convo, db, list.id, dir)
    }

    #[tokio::test]
    async fn reply_with_block_yields_proposal_and_two_turns() {
        let generator = ScriptedGenerator::replying(
            "Sure thing!\n<todo-list><name>Groceries</name><items><item><name>Milk</name></item></items></todo-list>",
        );
        let (convo, db, list_id, _dir) = setup(generator.clone());

        let reply = convo
            .converse("u1", &list_id, "add milk", &[], &ListShape::new("Groceries"))
            .await
            .expect("converse");

        assert_eq!(reply.message, "Sure thing!");
        let proposed = reply.list.expect("proposal");
        assert_eq!(proposed.items.len(), 1);

        let persisted = db.get_list("u1", &list_id).expect("get").expect("list");
        assert!(persisted.items.is_empty());

        let history = db.chat_history("u1", &list_id).expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].content, "Sure thing!");
    }

    #[tokio::test]
    async fn prompt_carries_instruction_history_and_snapshot() {
        let generator = ScriptedGenerator::replying("Noted.");
        let (convo, db, list_id, _dir) = setup(generator.clone());
        db.add_chat_message("u1", &list_id, ChatRole::User, "earlier")
            .expect("seed");
        let prior = db.chat_history("u1", &list_id).expect("history");

        convo
            .converse("u1", &list_id, "what's left?", &prior, &ListShape::new("Groceries"))
            .await
            .expect("converse");

        let seen = generator.seen.lock().expect("lock");
        let messages = &seen[0];
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "be helpful");
        assert_eq!(messages[1].content, "earlier");
        assert!(messages[2]
            .content
            .starts_with("what's left?\nCurrent list state: {"));
        assert!(messages[2].content.contains("\"name\":\"Groceries\""));
    }

    #[tokio::test]
    async fn generation_failure_keeps_only_the_user_turn() {
        let (convo, db, list_id, _dir) = setup(ScriptedGenerator::failing());

        let err = convo
            .converse("u1", &list_id, "hello", &[], &ListShape::new("Groceries"))
            .await
            .unwrap_err();
        assert!(matches!(err, TodoError::Generation(_)));

        let history = db.chat_history("u1", &list_id).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, ChatRole::User);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_side_effects() {
        let generator = ScriptedGenerator::replying("unused");
        let (convo, db, list_id, _dir) = setup(generator.clone());

        let err = convo
            .converse("u1", &list_id, "   ", &[], &ListShape::new("Groceries"))
            .await
            .unwrap_err();
        assert!(matches!(err, TodoError::Validation { .. }));
        assert!(generator.seen.lock().expect("lock").is_empty());
        assert!(db.chat_history("u1", &list_id).expect("history").is_empty());
    }

    #[tokio::test]
    async fn foreign_list_is_not_found_before_generation() {
        let generator = ScriptedGenerator::replying("unused");
        let (convo, _db, list_id, _dir) = setup(generator.clone());

        let err = convo
            .converse("u2", &list_id, "hi", &[], &ListShape::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TodoError::NotFound(_)));
        assert!(generator.seen.lock().expect("lock").is_empty());
    }
}
