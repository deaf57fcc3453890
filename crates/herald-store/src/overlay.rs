//! Runtime overlay: advisory live-platform state kept apart from records.
//!
//! The overlay is a cache of where things currently live on the platform.
//! It is never the source of truth for configuration, and every update goes
//! through [`merge_overlay`], which applies patches additively — nested maps
//! merge key-by-key so one code path's partial write cannot erase another's.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bounded per-notification message history; oldest ids are evicted first.
pub const NOTIFICATION_MESSAGE_HISTORY: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Recently posted messages for one notification.
pub struct NotificationMessages {
    pub channel_id: String,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Live clock-in roster for an event's next occurrence.
pub struct ClockInState {
    /// Position key -> ordered member ids. A member appears in at most one
    /// position; the clock-in machine enforces that on every mutation.
    #[serde(default)]
    pub positions: BTreeMap<String, Vec<String>>,
    /// Member id -> requested position key. One-shot carry-over, consumed
    /// exactly once when materialized into `positions` on a fresh repost.
    #[serde(default)]
    pub auto_next: BTreeMap<String, String>,
    /// Channel currently hosting clock-in messages.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Recent bot-authored clock-in message ids, newest last.
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// Repost rate-limit timestamp.
    #[serde(default)]
    pub last_sent_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Transient bookkeeping for one event.
pub struct EventOverlay {
    #[serde(default)]
    pub anchor_channel_id: Option<String>,
    #[serde(default)]
    pub anchor_message_id: Option<String>,
    /// Last rendered anchor text, used for reconciliation prefix matching.
    #[serde(default)]
    pub dynamic_base_content: Option<String>,
    /// Notification id -> recently posted messages.
    #[serde(default)]
    pub notification_messages: BTreeMap<String, NotificationMessages>,
    #[serde(default)]
    pub clock_in: ClockInState,
}

impl EventOverlay {
    /// The remembered anchor pointer, when both halves are present.
    pub fn anchor(&self) -> Option<(&str, &str)> {
        match (&self.anchor_channel_id, &self.anchor_message_id) {
            (Some(channel), Some(message)) => Some((channel.as_str(), message.as_str())),
            _ => None,
        }
    }

    /// Every channel id referenced anywhere in this overlay, deduplicated,
    /// anchor channel first. This is the bounded candidate set the
    /// reconciliation scanner searches.
    pub fn referenced_channels(&self) -> Vec<String> {
        let mut channels = Vec::new();
        let mut push = |value: &Option<String>| {
            if let Some(channel) = value {
                if !channel.is_empty() && !channels.contains(channel) {
                    channels.push(channel.clone());
                }
            }
        };
        push(&self.anchor_channel_id);
        push(&self.clock_in.channel_id);
        for messages in self.notification_messages.values() {
            push(&Some(messages.channel_id.clone()));
        }
        channels
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Anchor pointer change carried by an [`OverlayPatch`].
pub enum AnchorUpdate {
    Set {
        channel_id: String,
        message_id: String,
    },
    Clear,
}

#[derive(Debug, Clone, Default)]
/// Additive partial update for one event's overlay.
pub struct OverlayPatch {
    pub anchor: Option<AnchorUpdate>,
    pub dynamic_base_content: Option<String>,
    /// Notification id -> replacement entry; other ids are untouched.
    pub notification_messages: BTreeMap<String, NotificationMessages>,
    pub clock_in: Option<ClockInPatch>,
}

#[derive(Debug, Clone, Default)]
/// Additive partial update for clock-in state. Position lists merge
/// key-by-key: only the keys present here are replaced.
pub struct ClockInPatch {
    pub set_positions: BTreeMap<String, Vec<String>>,
    pub queue_auto_next: BTreeMap<String, String>,
    pub drain_auto_next: Vec<String>,
    pub channel_id: Option<String>,
    /// Full replacement for the bounded message-id history.
    pub message_ids: Option<Vec<String>>,
    pub last_sent_unix_ms: Option<u64>,
}

/// Applies `patch` to `overlay` additively.
pub fn merge_overlay(overlay: &mut EventOverlay, patch: &OverlayPatch) {
    match &patch.anchor {
        Some(AnchorUpdate::Set {
            channel_id,
            message_id,
        }) => {
            overlay.anchor_channel_id = Some(channel_id.clone());
            overlay.anchor_message_id = Some(message_id.clone());
        }
        Some(AnchorUpdate::Clear) => {
            overlay.anchor_channel_id = None;
            overlay.anchor_message_id = None;
        }
        None => {}
    }

    if let Some(content) = &patch.dynamic_base_content {
        overlay.dynamic_base_content = Some(content.clone());
    }

    for (notification_id, messages) in &patch.notification_messages {
        overlay
            .notification_messages
            .insert(notification_id.clone(), messages.clone());
    }

    if let Some(clock_in) = &patch.clock_in {
        merge_clock_in(&mut overlay.clock_in, clock_in);
    }
}

/// Applies a clock-in patch key-by-key.
pub fn merge_clock_in(state: &mut ClockInState, patch: &ClockInPatch) {
    for (position_key, members) in &patch.set_positions {
        state
            .positions
            .insert(position_key.clone(), members.clone());
    }
    for (member_id, position_key) in &patch.queue_auto_next {
        state
            .auto_next
            .insert(member_id.clone(), position_key.clone());
    }
    for member_id in &patch.drain_auto_next {
        state.auto_next.remove(member_id);
    }
    if let Some(channel_id) = &patch.channel_id {
        state.channel_id = Some(channel_id.clone());
    }
    if let Some(message_ids) = &patch.message_ids {
        state.message_ids = message_ids.clone();
    }
    if let Some(last_sent) = patch.last_sent_unix_ms {
        state.last_sent_unix_ms = Some(last_sent);
    }
}
