//! Platform and rendering seams.
//!
//! The raw chat platform and the template grammar are owned by external
//! collaborators; this subsystem only sees these traits. Every client call
//! is fallible and every call site treats "expected" references as
//! potentially absent.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
/// Outgoing message body: text plus the interactive component ids the
/// message must carry (selection menus, buttons).
pub struct MessagePayload {
    pub content: String,
    pub component_ids: Vec<String>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            component_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A message as observed on the platform.
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub component_ids: Vec<String>,
}

#[async_trait]
/// Minimal message-lifecycle surface of the chat platform.
///
/// `fetch_message` distinguishes "message gone" (`Ok(None)`) from "channel
/// unreachable" (`Err`); the reconciliation scanner treats the two
/// differently. `recent_messages` returns newest first.
pub trait ChatClient: Send + Sync {
    fn bot_user_id(&self) -> &str;

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>>;

    async fn send_message(&self, channel_id: &str, payload: &MessagePayload)
        -> Result<ChatMessage>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: &MessagePayload,
    ) -> Result<ChatMessage>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()>;

    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
}

#[derive(Debug, Clone, Default)]
/// Placeholder context handed to the external template renderer.
pub struct RenderContext {
    pub event_name: String,
    pub placeholders: BTreeMap<String, String>,
}

/// External template renderer; the grammar is owned by the collaborator.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String>;
}
