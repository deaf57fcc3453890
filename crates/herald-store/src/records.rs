//! Persisted event definitions.
//!
//! Records hold configuration only. Anything describing the *live* state of
//! the platform (anchor pointers, posted message ids, clock-in rosters)
//! belongs to the overlay, so losing the overlay never corrupts an event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Position key whose capacity is pinned to 1 no matter what the stored
/// configuration says.
pub const INSTANCE_MANAGER_POSITION: &str = "instance_manager";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A reminder fired at an offset before the event's next occurrence.
/// The scheduler owns firing; this subsystem only tracks the posted messages.
pub struct Notification {
    pub id: String,
    pub offset_minutes: i64,
    #[serde(default)]
    pub is_clock_in: bool,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// A recurring announcement definition. The id is opaque and never reused.
pub struct EventRecord {
    pub id: String,
    pub name: String,
    /// Opaque cron-style expression; evaluated by the external scheduler.
    pub schedule: String,
    pub template: String,
    /// Configured target channel for the anchor message.
    pub channel_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notifications: Vec<Notification>,
    /// Clock-in staffing capacity per position key; absent means unlimited.
    #[serde(default)]
    pub position_caps: BTreeMap<String, u32>,
}

fn default_enabled() -> bool {
    true
}

impl EventRecord {
    /// Effective capacity for a clock-in position. `instance_manager` is
    /// clamped to 1 regardless of configuration; a configured cap of 0 and
    /// an absent key both mean unlimited (`None`).
    pub fn position_capacity(&self, position_key: &str) -> Option<u32> {
        if position_key == INSTANCE_MANAGER_POSITION {
            return Some(1);
        }
        match self.position_caps.get(position_key) {
            Some(0) | None => None,
            Some(cap) => Some(*cap),
        }
    }

    /// Whether a position key belongs to this event's staffing roster.
    /// An empty `position_caps` leaves the roster open: any key is valid.
    pub fn position_known(&self, position_key: &str) -> bool {
        self.position_caps.is_empty()
            || position_key == INSTANCE_MANAGER_POSITION
            || self.position_caps.contains_key(position_key)
    }
}

#[derive(Debug, Clone, Default)]
/// Input for [`crate::EventStore::add`]. The store assigns the id and strips
/// the transient delivery channel into the overlay.
pub struct EventDraft {
    pub name: String,
    pub schedule: String,
    pub template: String,
    pub channel_id: String,
    pub enabled: bool,
    pub notifications: Vec<Notification>,
    pub position_caps: BTreeMap<String, u32>,
    /// Live delivery channel, if the anchor already exists somewhere else
    /// than the configured channel. Never persisted with the record.
    pub delivery_channel_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
/// Typed partial update for persisted fields. Overlay-schema updates ride
/// along in `overlay` and are redirected to the additive merge path.
pub struct EventPatch {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub template: Option<String>,
    pub channel_id: Option<String>,
    pub enabled: Option<bool>,
    pub notifications: Option<Vec<Notification>>,
    pub position_caps: Option<BTreeMap<String, u32>>,
    pub overlay: Option<crate::overlay::OverlayPatch>,
}

impl EventPatch {
    pub fn apply_persisted(&self, record: &mut EventRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(schedule) = &self.schedule {
            record.schedule = schedule.clone();
        }
        if let Some(template) = &self.template {
            record.template = template.clone();
        }
        if let Some(channel_id) = &self.channel_id {
            record.channel_id = channel_id.clone();
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(notifications) = &self.notifications {
            record.notifications = notifications.clone();
        }
        if let Some(position_caps) = &self.position_caps {
            record.position_caps = position_caps.clone();
        }
    }
}
