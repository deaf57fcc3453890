//! Durable event store: persisted records plus a runtime overlay.
//!
//! Two JSON snapshots live behind one merged read path. `events.json` holds
//! configuration that must survive anything; `overlay.json` holds advisory
//! live-platform state that may be lost without corrupting event semantics.
//! Snapshot corruption is recovered from the `.bak` sibling and finally
//! treated as empty — "no events" is recoverable, a crashed store is not.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use herald_core::{current_unix_timestamp_ms, read_snapshot, write_snapshot, SnapshotRead};

pub mod overlay;
pub mod records;

pub use overlay::{
    merge_clock_in, merge_overlay, AnchorUpdate, ClockInPatch, ClockInState, EventOverlay,
    NotificationMessages, OverlayPatch, NOTIFICATION_MESSAGE_HISTORY,
};
pub use records::{
    EventDraft, EventPatch, EventRecord, Notification, INSTANCE_MANAGER_POSITION,
};

const EVENTS_SNAPSHOT_SCHEMA_VERSION: u32 = 1;
const OVERLAY_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Store handle shared across async tasks. Critical sections are short and
/// never held across awaits.
pub type SharedEventStore = Arc<Mutex<EventStore>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventsSnapshot {
    schema_version: u32,
    #[serde(default)]
    events: BTreeMap<String, EventRecord>,
}

impl Default for EventsSnapshot {
    fn default() -> Self {
        Self {
            schema_version: EVENTS_SNAPSHOT_SCHEMA_VERSION,
            events: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OverlaySnapshot {
    schema_version: u32,
    #[serde(default)]
    overlays: BTreeMap<String, EventOverlay>,
}

impl Default for OverlaySnapshot {
    fn default() -> Self {
        Self {
            schema_version: OVERLAY_SNAPSHOT_SCHEMA_VERSION,
            overlays: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Merged read view: the persisted record union its overlay. The overlay
/// wins for live-delivery questions; the record wins for configuration.
pub struct EventView {
    pub record: EventRecord,
    pub overlay: EventOverlay,
}

impl EventView {
    /// Channel the anchor currently lives in, falling back to configuration.
    pub fn delivery_channel(&self) -> &str {
        self.overlay
            .anchor_channel_id
            .as_deref()
            .unwrap_or(&self.record.channel_id)
    }

    /// Channel clock-in messages currently land in.
    pub fn clock_in_channel(&self) -> &str {
        self.overlay
            .clock_in
            .channel_id
            .as_deref()
            .unwrap_or(&self.record.channel_id)
    }
}

/// Persisted event definitions plus runtime overlay, merged on every read.
pub struct EventStore {
    events_path: PathBuf,
    overlay_path: PathBuf,
    events: BTreeMap<String, EventRecord>,
    overlays: BTreeMap<String, EventOverlay>,
}

impl EventStore {
    /// Opens (or initializes) the store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let events_path = data_dir.join("events.json");
        let overlay_path = data_dir.join("overlay.json");

        let events: EventsSnapshot =
            load_snapshot_or_default(&events_path, EVENTS_SNAPSHOT_SCHEMA_VERSION)?;
        let overlays: OverlaySnapshot =
            load_snapshot_or_default(&overlay_path, OVERLAY_SNAPSHOT_SCHEMA_VERSION)?;

        Ok(Self {
            events_path,
            overlay_path,
            events: events.events,
            overlays: overlays.overlays,
        })
    }

    /// Wraps the store for sharing across async tasks.
    pub fn into_shared(self) -> SharedEventStore {
        Arc::new(Mutex::new(self))
    }

    /// Merged view for one event.
    pub fn get(&self, event_id: &str) -> Option<EventView> {
        let record = self.events.get(event_id)?.clone();
        let overlay = self.overlays.get(event_id).cloned().unwrap_or_default();
        Some(EventView { record, overlay })
    }

    /// Merged views for every event, ordered by id.
    pub fn get_all(&self) -> Vec<EventView> {
        self.events
            .keys()
            .filter_map(|event_id| self.get(event_id))
            .collect()
    }

    /// Creates an event, assigning a fresh opaque id. Transient fields on
    /// the draft are stripped into the overlay rather than persisted.
    pub fn add(&mut self, draft: EventDraft) -> Result<EventView> {
        let event_id = self.assign_event_id(&draft.name);
        let record = EventRecord {
            id: event_id.clone(),
            name: draft.name,
            schedule: draft.schedule,
            template: draft.template,
            channel_id: draft.channel_id,
            enabled: draft.enabled,
            notifications: draft.notifications,
            position_caps: draft.position_caps,
        };
        self.events.insert(event_id.clone(), record.clone());

        if let Some(delivery_channel) = draft.delivery_channel_id {
            let entry = self.overlays.entry(event_id.clone()).or_default();
            entry.anchor_channel_id = Some(delivery_channel);
        }

        self.save()?;
        let overlay = self.overlays.get(&event_id).cloned().unwrap_or_default();
        Ok(EventView { record, overlay })
    }

    /// Applies a typed partial update. Persisted-field changes apply
    /// directly; overlay-schema changes go through the additive merge path.
    pub fn update(&mut self, event_id: &str, patch: &EventPatch) -> Result<Option<EventView>> {
        let Some(record) = self.events.get_mut(event_id) else {
            return Ok(None);
        };
        patch.apply_persisted(record);

        if let Some(overlay_patch) = &patch.overlay {
            let entry = self.overlays.entry(event_id.to_string()).or_default();
            merge_overlay(entry, overlay_patch);
        }

        self.save()?;
        Ok(self.get(event_id))
    }

    /// Additive overlay update for a known event.
    pub fn update_overlay(
        &mut self,
        event_id: &str,
        patch: &OverlayPatch,
    ) -> Result<Option<EventView>> {
        if !self.events.contains_key(event_id) {
            return Ok(None);
        }
        let entry = self.overlays.entry(event_id.to_string()).or_default();
        merge_overlay(entry, patch);
        self.save()?;
        Ok(self.get(event_id))
    }

    /// Deletes an event along with its overlay and clock-in state.
    pub fn remove(&mut self, event_id: &str) -> Result<bool> {
        let existed = self.events.remove(event_id).is_some();
        let overlay_existed = self.overlays.remove(event_id).is_some();
        if existed || overlay_existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Overlay for an id, including orphans whose event no longer exists.
    pub fn overlay(&self, event_id: &str) -> Option<EventOverlay> {
        self.overlays.get(event_id).cloned()
    }

    /// Every id with overlay state, whether or not the event still exists.
    pub fn overlay_ids(&self) -> Vec<String> {
        self.overlays.keys().cloned().collect()
    }

    /// Drops overlay state for an id (used for orphan cleanup).
    pub fn remove_overlay(&mut self, event_id: &str) -> Result<bool> {
        let existed = self.overlays.remove(event_id).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Appends a posted notification message to the bounded recent history.
    pub fn record_notification_message(
        &mut self,
        event_id: &str,
        notification_id: &str,
        channel_id: &str,
        message_id: &str,
    ) -> Result<()> {
        if !self.events.contains_key(event_id) {
            bail!("unknown event '{event_id}'");
        }
        let entry = self.overlays.entry(event_id.to_string()).or_default();
        let messages = entry
            .notification_messages
            .entry(notification_id.to_string())
            .or_insert_with(|| NotificationMessages {
                channel_id: channel_id.to_string(),
                message_ids: Vec::new(),
            });
        messages.channel_id = channel_id.to_string();
        messages.message_ids.push(message_id.to_string());
        while messages.message_ids.len() > NOTIFICATION_MESSAGE_HISTORY {
            messages.message_ids.remove(0);
        }
        self.save()?;
        Ok(())
    }

    fn assign_event_id(&self, name: &str) -> String {
        let now_unix_ms = current_unix_timestamp_ms();
        let mut candidate = format!("evt-{}-{}", now_unix_ms, short_hash(name.as_bytes()));
        // Ids are opaque and never reused; same-millisecond collisions get
        // a numeric suffix.
        let mut attempt = 0_usize;
        while self.events.contains_key(&candidate) {
            attempt = attempt.saturating_add(1);
            candidate = format!(
                "evt-{}-{}-{}",
                now_unix_ms,
                short_hash(name.as_bytes()),
                attempt
            );
        }
        candidate
    }

    fn save(&self) -> Result<()> {
        let events = EventsSnapshot {
            schema_version: EVENTS_SNAPSHOT_SCHEMA_VERSION,
            events: self.events.clone(),
        };
        let overlays = OverlaySnapshot {
            schema_version: OVERLAY_SNAPSHOT_SCHEMA_VERSION,
            overlays: self.overlays.clone(),
        };
        save_snapshot(&self.events_path, &events)?;
        save_snapshot(&self.overlay_path, &overlays)?;
        Ok(())
    }
}

fn save_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("failed to serialize state")?;
    payload.push('\n');
    write_snapshot(path, &payload)
        .with_context(|| format!("failed to write state file {}", path.display()))
}

/// Loads a snapshot, preferring the current file, then the backup, then an
/// empty default. Unparseable content is logged and treated as empty rather
/// than surfaced — corruption never throws past the store boundary.
fn load_snapshot_or_default<T>(path: &Path, expected_schema: u32) -> Result<T>
where
    T: DeserializeOwned + Default + SchemaVersioned,
{
    let raw = match read_snapshot(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?
    {
        SnapshotRead::Current(raw) => raw,
        SnapshotRead::Backup(raw) => {
            tracing::warn!(path = %path.display(), "snapshot unreadable, recovered from backup");
            raw
        }
        SnapshotRead::Missing => return Ok(T::default()),
    };

    let parsed = match serde_json::from_str::<T>(&raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                %error,
                "snapshot malformed, trying backup"
            );
            match parse_backup::<T>(path) {
                Some(parsed) => parsed,
                None => {
                    tracing::warn!(
                        path = %path.display(),
                        "no usable backup, treating store as empty"
                    );
                    return Ok(T::default());
                }
            }
        }
    };

    if parsed.schema_version() != expected_schema {
        bail!(
            "unsupported snapshot schema in {}: expected {}, found {}",
            path.display(),
            expected_schema,
            parsed.schema_version()
        );
    }
    Ok(parsed)
}

fn parse_backup<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let backup = herald_core::snapshot_io::backup_path(path);
    let raw = std::fs::read_to_string(backup).ok()?;
    serde_json::from_str::<T>(&raw).ok()
}

trait SchemaVersioned {
    fn schema_version(&self) -> u32;
}

impl SchemaVersioned for EventsSnapshot {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl SchemaVersioned for OverlaySnapshot {
    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

fn short_hash(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    digest[..6]
        .iter()
        .map(|value| format!("{value:02x}"))
        .collect::<String>()
}
