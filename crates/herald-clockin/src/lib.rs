//! Clock-in state machine: capacity-limited staffing self-registration.
//!
//! Members register themselves into per-event positions for the next
//! occurrence. Every mutation of the roster runs under a per-event
//! non-blocking lock; a fresh repost starts a new staffing round from an
//! empty roster, with the one-shot `auto_next` queue as the only carry-over.

use std::collections::BTreeMap;

use anyhow::anyhow;
use thiserror::Error;

use herald_anchor::{ChatClient, ChatMessage, MessagePayload, RenderContext, TemplateRenderer};
use herald_core::current_unix_timestamp_ms;
use herald_store::{
    ClockInPatch, ClockInState, EventRecord, EventView, OverlayPatch, SharedEventStore,
};
use herald_token::{embed_token, generate_token, visible_marker};

pub mod locks;

pub use locks::{EventGuard, LockRegistry};

/// Interactive component id carried by every clock-in message.
pub const CLOCK_IN_COMPONENT: &str = "clockin-select";

/// Default minimum delay between full reposts of the same clock-in board.
pub const DEFAULT_MIN_REPOST_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Error)]
/// Member-facing rejections. Display strings are intentionally terse; no
/// internal detail leaks to chat.
pub enum ClockInError {
    #[error("another update is in progress, try again")]
    Busy,
    #[error("position '{0}' is full")]
    PositionFull(String),
    #[error("you do not qualify for position '{0}'")]
    Unqualified(String),
    #[error("unknown position '{0}'")]
    UnknownPosition(String),
    #[error("unknown event")]
    UnknownEvent,
    #[error("clock-in update failed, try again")]
    Storage(anyhow::Error),
    #[error("clock-in message delivery failed")]
    Platform(anyhow::Error),
}

#[derive(Debug)]
/// Result of a repost attempt.
pub enum RepostOutcome {
    Posted(ChatMessage),
    RateLimited,
}

/// External role/permission check for staffing positions.
pub trait RoleGate: Send + Sync {
    fn qualifies(&self, member_id: &str, position_key: &str) -> bool;
}

/// Clock-in operations over the shared event store.
pub struct ClockInRuntime {
    store: SharedEventStore,
    locks: LockRegistry,
    min_repost_interval_ms: u64,
}

impl ClockInRuntime {
    pub fn new(store: SharedEventStore) -> Self {
        Self {
            store,
            locks: LockRegistry::new(),
            min_repost_interval_ms: DEFAULT_MIN_REPOST_INTERVAL_MS,
        }
    }

    pub fn with_min_repost_interval_ms(mut self, interval_ms: u64) -> Self {
        self.min_repost_interval_ms = interval_ms;
        self
    }

    /// The per-event lock registry (exposed for coordination and tests).
    pub fn lock_registry(&self) -> &LockRegistry {
        &self.locks
    }

    /// Moves a member to `selection`, or out of every position when the
    /// selection is `None`. A member occupies at most one position; the
    /// chosen position must have capacity left.
    pub fn register_selection(
        &self,
        gate: &dyn RoleGate,
        event_id: &str,
        member_id: &str,
        selection: Option<&str>,
    ) -> Result<ClockInState, ClockInError> {
        let view = self.view(event_id)?;
        if let Some(position_key) = selection {
            if !view.record.position_known(position_key) {
                return Err(ClockInError::UnknownPosition(position_key.to_string()));
            }
            if !gate.qualifies(member_id, position_key) {
                return Err(ClockInError::Unqualified(position_key.to_string()));
            }
        }

        let _guard = self
            .locks
            .try_acquire(event_id)
            .ok_or(ClockInError::Busy)?;
        // Re-read under the lock; another selection may have landed between
        // validation and acquisition.
        let view = self.view(event_id)?;

        let mut changed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (position_key, members) in &view.overlay.clock_in.positions {
            let mut remaining = members.clone();
            remaining.retain(|member| member != member_id);
            if remaining.len() != members.len() {
                changed.insert(position_key.clone(), remaining);
            }
        }

        if let Some(position_key) = selection {
            let current = changed
                .get(position_key)
                .cloned()
                .or_else(|| view.overlay.clock_in.positions.get(position_key).cloned())
                .unwrap_or_default();
            if let Some(cap) = view.record.position_capacity(position_key) {
                if current.len() >= cap as usize {
                    return Err(ClockInError::PositionFull(position_key.to_string()));
                }
            }
            let mut updated = current;
            updated.push(member_id.to_string());
            changed.insert(position_key.to_string(), updated);
        }

        if changed.is_empty() {
            return Ok(view.overlay.clock_in);
        }

        let patch = OverlayPatch {
            clock_in: Some(ClockInPatch {
                set_positions: changed,
                ..ClockInPatch::default()
            }),
            ..OverlayPatch::default()
        };
        let updated = self.apply(event_id, &patch)?;
        Ok(updated.overlay.clock_in)
    }

    /// Records a one-shot pre-registration for the next fresh repost. The
    /// roster itself is untouched until the queue is drained.
    pub fn queue_auto_next(
        &self,
        gate: &dyn RoleGate,
        event_id: &str,
        member_id: &str,
        position_key: &str,
    ) -> Result<(), ClockInError> {
        let view = self.view(event_id)?;
        if !view.record.position_known(position_key) {
            return Err(ClockInError::UnknownPosition(position_key.to_string()));
        }
        if !gate.qualifies(member_id, position_key) {
            return Err(ClockInError::Unqualified(position_key.to_string()));
        }

        let patch = OverlayPatch {
            clock_in: Some(ClockInPatch {
                queue_auto_next: BTreeMap::from([(
                    member_id.to_string(),
                    position_key.to_string(),
                )]),
                ..ClockInPatch::default()
            }),
            ..OverlayPatch::default()
        };
        self.apply(event_id, &patch)?;
        Ok(())
    }

    /// Starts a fresh staffing round: empty roster, auto-next queue drained
    /// into it (capacity respected, every entry consumed), a new clock-in
    /// message posted, superseded messages deleted best-effort.
    pub async fn render_and_repost(
        &self,
        client: &dyn ChatClient,
        renderer: &dyn TemplateRenderer,
        event_id: &str,
    ) -> Result<RepostOutcome, ClockInError> {
        let view = self.view(event_id)?;
        let now_unix_ms = current_unix_timestamp_ms();
        if let Some(last_sent) = view.overlay.clock_in.last_sent_unix_ms {
            if now_unix_ms.saturating_sub(last_sent) < self.min_repost_interval_ms {
                tracing::debug!(event_id, "clock-in repost rate-limited");
                return Ok(RepostOutcome::RateLimited);
            }
        }

        let _guard = self
            .locks
            .try_acquire(event_id)
            .ok_or(ClockInError::Busy)?;
        let view = self.view(event_id)?;

        let (fresh_positions, drained) = drain_auto_next(&view.record, &view.overlay.clock_in);
        let payload = build_clock_in_payload(renderer, &view, &fresh_positions)
            .map_err(ClockInError::Storage)?;
        let channel_id = clock_in_channel(&view).to_string();

        let sent = client
            .send_message(&channel_id, &payload)
            .await
            .map_err(ClockInError::Platform)?;

        let superseded: Vec<String> = view
            .overlay
            .clock_in
            .message_ids
            .iter()
            .filter(|message_id| **message_id != sent.id)
            .cloned()
            .collect();

        let patch = OverlayPatch {
            clock_in: Some(ClockInPatch {
                set_positions: fresh_positions,
                drain_auto_next: drained,
                channel_id: Some(channel_id.clone()),
                message_ids: Some(vec![sent.id.clone()]),
                last_sent_unix_ms: Some(now_unix_ms),
                ..ClockInPatch::default()
            }),
            ..OverlayPatch::default()
        };
        self.apply(event_id, &patch)?;

        for message_id in superseded {
            if let Err(error) = client.delete_message(&channel_id, &message_id).await {
                tracing::warn!(event_id, %message_id, %error, "superseded clock-in delete failed");
            }
        }

        Ok(RepostOutcome::Posted(sent))
    }

    /// Reset-and-drain without posting: new round, only explicit auto-next
    /// carry-overs survive, the queue is consumed either way.
    pub fn prune_on_demand(&self, event_id: &str) -> Result<ClockInState, ClockInError> {
        let _guard = self
            .locks
            .try_acquire(event_id)
            .ok_or(ClockInError::Busy)?;
        let view = self.view(event_id)?;

        let (fresh_positions, drained) = drain_auto_next(&view.record, &view.overlay.clock_in);
        let patch = OverlayPatch {
            clock_in: Some(ClockInPatch {
                set_positions: fresh_positions,
                drain_auto_next: drained,
                ..ClockInPatch::default()
            }),
            ..OverlayPatch::default()
        };
        let updated = self.apply(event_id, &patch)?;
        Ok(updated.overlay.clock_in)
    }

    fn view(&self, event_id: &str) -> Result<EventView, ClockInError> {
        let guard = self
            .store
            .lock()
            .map_err(|_| ClockInError::Storage(anyhow!("event store mutex is poisoned")))?;
        guard.get(event_id).ok_or(ClockInError::UnknownEvent)
    }

    fn apply(&self, event_id: &str, patch: &OverlayPatch) -> Result<EventView, ClockInError> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| ClockInError::Storage(anyhow!("event store mutex is poisoned")))?;
        guard
            .update_overlay(event_id, patch)
            .map_err(ClockInError::Storage)?
            .ok_or(ClockInError::UnknownEvent)
    }
}

/// Builds the next round's roster: every known position emptied, then the
/// auto-next queue drained in order. Entries whose target position is gone
/// or already full are dropped; the queue is consumed completely either way.
fn drain_auto_next(
    record: &EventRecord,
    clock_in: &ClockInState,
) -> (BTreeMap<String, Vec<String>>, Vec<String>) {
    let mut fresh: BTreeMap<String, Vec<String>> = clock_in
        .positions
        .keys()
        .map(|position_key| (position_key.clone(), Vec::new()))
        .collect();

    let mut drained = Vec::with_capacity(clock_in.auto_next.len());
    for (member_id, position_key) in &clock_in.auto_next {
        drained.push(member_id.clone());
        if !record.position_known(position_key) {
            tracing::debug!(%member_id, %position_key, "auto-next target gone, dropping");
            continue;
        }
        let members = fresh.entry(position_key.clone()).or_default();
        if let Some(cap) = record.position_capacity(position_key) {
            if members.len() >= cap as usize {
                tracing::debug!(%member_id, %position_key, "auto-next target full, dropping");
                continue;
            }
        }
        members.push(member_id.clone());
    }
    (fresh, drained)
}

/// Plain-text roster block appended to clock-in messages.
pub fn render_positions(positions: &BTreeMap<String, Vec<String>>) -> String {
    if positions.is_empty() {
        return "No positions staffed yet.".to_string();
    }
    positions
        .iter()
        .map(|(position_key, members)| {
            if members.is_empty() {
                format!("{position_key}: open")
            } else {
                format!("{position_key}: {}", members.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Channel the clock-in board belongs in: the overlay's live channel, the
/// clock-in notification override, then the event's configured channel.
fn clock_in_channel(view: &EventView) -> &str {
    if let Some(channel_id) = view.overlay.clock_in.channel_id.as_deref() {
        return channel_id;
    }
    view.record
        .notifications
        .iter()
        .find(|notification| notification.is_clock_in)
        .and_then(|notification| notification.channel_id.as_deref())
        .unwrap_or(&view.record.channel_id)
}

fn build_clock_in_payload(
    renderer: &dyn TemplateRenderer,
    view: &EventView,
    positions: &BTreeMap<String, Vec<String>>,
) -> anyhow::Result<MessagePayload> {
    let template = view
        .record
        .notifications
        .iter()
        .find(|notification| notification.is_clock_in)
        .and_then(|notification| notification.template.as_deref())
        .unwrap_or(&view.record.template);

    let context = RenderContext {
        event_name: view.record.name.clone(),
        placeholders: BTreeMap::new(),
    };
    let body = renderer.render(template, &context)?;

    let token = generate_token(&view.record.id);
    let content = format!(
        "{}\n\n{}\n{}",
        body,
        render_positions(positions),
        visible_marker(&token)
    );
    Ok(MessagePayload {
        content: embed_token(&content, &token),
        component_ids: vec![CLOCK_IN_COMPONENT.to_string()],
    })
}

#[cfg(test)]
mod tests;
