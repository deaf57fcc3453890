//! In-memory fakes for exercising anchor and clock-in flows without a
//! platform connection. Used by this crate's tests and by downstream
//! crates' test suites.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::client::{ChatClient, ChatMessage, MessagePayload, RenderContext, TemplateRenderer};

#[derive(Debug, Default)]
struct FakePlatformState {
    next_message_id: u64,
    channels: BTreeMap<String, Vec<ChatMessage>>,
    unreachable: BTreeSet<String>,
    fail_sends: bool,
    send_calls: usize,
    edit_calls: usize,
    delete_calls: usize,
}

/// Deterministic in-memory chat platform.
pub struct FakeChatClient {
    bot_id: String,
    state: Mutex<FakePlatformState>,
}

impl FakeChatClient {
    pub fn new(bot_id: &str) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            state: Mutex::new(FakePlatformState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakePlatformState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Inserts a message authored by `author_id` and returns its id.
    pub fn seed_message(&self, channel_id: &str, author_id: &str, content: &str) -> String {
        let mut state = self.lock();
        state.next_message_id += 1;
        let id = format!("msg-{}", state.next_message_id);
        let message = ChatMessage {
            id: id.clone(),
            channel_id: channel_id.to_string(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            component_ids: Vec::new(),
        };
        state
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
        id
    }

    /// Removes a message as the platform would, without telling the bot.
    pub fn delete_out_of_band(&self, channel_id: &str, message_id: &str) {
        let mut state = self.lock();
        if let Some(messages) = state.channels.get_mut(channel_id) {
            messages.retain(|message| message.id != message_id);
        }
    }

    /// Marks a channel as unreachable: every call touching it fails.
    pub fn set_unreachable(&self, channel_id: &str) {
        self.lock().unreachable.insert(channel_id.to_string());
    }

    /// Makes every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn message(&self, channel_id: &str, message_id: &str) -> Option<ChatMessage> {
        self.lock()
            .channels
            .get(channel_id)
            .and_then(|messages| messages.iter().find(|message| message.id == message_id))
            .cloned()
    }

    pub fn channel_messages(&self, channel_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .channels
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn send_calls(&self) -> usize {
        self.lock().send_calls
    }

    pub fn edit_calls(&self) -> usize {
        self.lock().edit_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }
}

#[async_trait]
impl ChatClient for FakeChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_id
    }

    async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<Option<ChatMessage>> {
        let state = self.lock();
        if state.unreachable.contains(channel_id) {
            bail!("channel '{channel_id}' is unreachable");
        }
        Ok(state
            .channels
            .get(channel_id)
            .and_then(|messages| messages.iter().find(|message| message.id == message_id))
            .cloned())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<ChatMessage> {
        let mut state = self.lock();
        state.send_calls += 1;
        if state.fail_sends {
            bail!("send rejected by platform");
        }
        if state.unreachable.contains(channel_id) {
            bail!("channel '{channel_id}' is unreachable");
        }
        state.next_message_id += 1;
        let message = ChatMessage {
            id: format!("msg-{}", state.next_message_id),
            channel_id: channel_id.to_string(),
            author_id: self.bot_id.clone(),
            content: payload.content.clone(),
            component_ids: payload.component_ids.clone(),
        };
        state
            .channels
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        payload: &MessagePayload,
    ) -> Result<ChatMessage> {
        let mut state = self.lock();
        state.edit_calls += 1;
        if state.unreachable.contains(channel_id) {
            bail!("channel '{channel_id}' is unreachable");
        }
        let message = state
            .channels
            .get_mut(channel_id)
            .and_then(|messages| {
                messages
                    .iter_mut()
                    .find(|message| message.id == message_id)
            })
            .ok_or_else(|| anyhow!("unknown message '{message_id}'"))?;
        message.content = payload.content.clone();
        message.component_ids = payload.component_ids.clone();
        Ok(message.clone())
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.delete_calls += 1;
        if state.unreachable.contains(channel_id) {
            bail!("channel '{channel_id}' is unreachable");
        }
        let Some(messages) = state.channels.get_mut(channel_id) else {
            bail!("unknown channel '{channel_id}'");
        };
        let before = messages.len();
        messages.retain(|message| message.id != message_id);
        if messages.len() == before {
            bail!("unknown message '{message_id}'");
        }
        Ok(())
    }

    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let state = self.lock();
        if state.unreachable.contains(channel_id) {
            bail!("channel '{channel_id}' is unreachable");
        }
        let mut messages = state
            .channels
            .get(channel_id)
            .cloned()
            .unwrap_or_default();
        messages.reverse();
        messages.truncate(limit);
        Ok(messages)
    }
}

/// Renderer substituting `{name}` and `{key}` placeholders literally.
#[derive(Debug, Clone, Default)]
pub struct FakeRenderer;

impl TemplateRenderer for FakeRenderer {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String> {
        let mut rendered = template.replace("{name}", &context.event_name);
        for (key, value) in &context.placeholders {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }
}
