//! Operator reports over the store snapshots.
//!
//! Both commands are read-only: they inspect the merged store without a
//! platform connection, so they are safe to run next to a live process.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use herald_store::{EventStore, INSTANCE_MANAGER_POSITION};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Point-in-time summary of the store contents.
pub struct InspectReport {
    pub data_dir: String,
    pub total_events: usize,
    pub enabled_events: usize,
    pub disabled_events: usize,
    pub anchored_events: usize,
    pub unanchored_enabled_events: usize,
    pub clock_in_events: usize,
    pub staffed_members: usize,
    pub queued_auto_next_entries: usize,
    pub orphaned_overlays: usize,
}

pub fn inspect_store(data_dir: &Path) -> Result<InspectReport> {
    let store = EventStore::open(data_dir)?;
    let views = store.get_all();

    let mut report = InspectReport {
        data_dir: data_dir.display().to_string(),
        total_events: views.len(),
        enabled_events: 0,
        disabled_events: 0,
        anchored_events: 0,
        unanchored_enabled_events: 0,
        clock_in_events: 0,
        staffed_members: 0,
        queued_auto_next_entries: 0,
        orphaned_overlays: 0,
    };

    let event_ids: BTreeSet<String> = views
        .iter()
        .map(|view| view.record.id.clone())
        .collect();
    report.orphaned_overlays = store
        .overlay_ids()
        .into_iter()
        .filter(|overlay_id| !event_ids.contains(overlay_id))
        .count();

    for view in &views {
        if view.record.enabled {
            report.enabled_events = report.enabled_events.saturating_add(1);
        } else {
            report.disabled_events = report.disabled_events.saturating_add(1);
        }
        if view.overlay.anchor().is_some() {
            report.anchored_events = report.anchored_events.saturating_add(1);
        } else if view.record.enabled {
            report.unanchored_enabled_events = report.unanchored_enabled_events.saturating_add(1);
        }
        if view
            .record
            .notifications
            .iter()
            .any(|notification| notification.is_clock_in)
        {
            report.clock_in_events = report.clock_in_events.saturating_add(1);
        }
        report.staffed_members = report.staffed_members.saturating_add(
            view.overlay
                .clock_in
                .positions
                .values()
                .map(Vec::len)
                .sum::<usize>(),
        );
        report.queued_auto_next_entries = report
            .queued_auto_next_entries
            .saturating_add(view.overlay.clock_in.auto_next.len());
    }

    Ok(report)
}

pub fn render_inspect_report(report: &InspectReport) -> String {
    format!(
        "store inspect: data_dir={} total_events={} enabled_events={} disabled_events={} anchored_events={} unanchored_enabled_events={} clock_in_events={} staffed_members={} queued_auto_next_entries={} orphaned_overlays={}",
        report.data_dir,
        report.total_events,
        report.enabled_events,
        report.disabled_events,
        report.anchored_events,
        report.unanchored_enabled_events,
        report.clock_in_events,
        report.staffed_members,
        report.queued_auto_next_entries,
        report.orphaned_overlays,
    )
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// One validation finding for an event.
pub struct ValidateDiagnostic {
    pub event_id: String,
    pub reason_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Aggregate validation outcome for the store.
pub struct ValidateReport {
    pub data_dir: String,
    pub total_events: usize,
    pub valid_events: usize,
    pub invalid_events: usize,
    pub diagnostics: Vec<ValidateDiagnostic>,
}

pub fn validate_store(data_dir: &Path) -> Result<ValidateReport> {
    let store = EventStore::open(data_dir)?;
    let views = store.get_all();

    let mut report = ValidateReport {
        data_dir: data_dir.display().to_string(),
        total_events: views.len(),
        valid_events: 0,
        invalid_events: 0,
        diagnostics: Vec::new(),
    };

    for view in &views {
        let before = report.diagnostics.len();
        let record = &view.record;
        let mut push = |reason_code: &str, message: String| {
            report.diagnostics.push(ValidateDiagnostic {
                event_id: record.id.clone(),
                reason_code: reason_code.to_string(),
                message,
            });
        };

        if record.name.trim().is_empty() {
            push("name_empty", "event name must be non-empty".to_string());
        }
        if record.template.trim().is_empty() {
            push("template_empty", "event template must be non-empty".to_string());
        }
        if record.channel_id.trim().is_empty() {
            push("channel_empty", "event channel must be non-empty".to_string());
        }
        if record.schedule.trim().is_empty() {
            push("schedule_empty", "event schedule must be non-empty".to_string());
        }

        let mut notification_ids = BTreeSet::new();
        for notification in &record.notifications {
            if !notification_ids.insert(notification.id.clone()) {
                push(
                    "notification_id_duplicate",
                    format!("notification id '{}' appears twice", notification.id),
                );
            }
        }

        if let Some(cap) = record.position_caps.get(INSTANCE_MANAGER_POSITION) {
            if *cap != 1 {
                push(
                    "instance_manager_cap_ignored",
                    format!("configured cap {cap} is clamped to 1"),
                );
            }
        }

        let half_set = view.overlay.anchor_channel_id.is_some()
            != view.overlay.anchor_message_id.is_some();
        if half_set {
            push(
                "anchor_pointer_partial",
                "anchor pointer has only one of channel/message".to_string(),
            );
        }

        let mut seen_members = BTreeSet::new();
        for members in view.overlay.clock_in.positions.values() {
            for member in members {
                if !seen_members.insert(member.clone()) {
                    push(
                        "member_in_multiple_positions",
                        format!("member '{member}' appears in more than one position"),
                    );
                }
            }
        }

        if report.diagnostics.len() == before {
            report.valid_events = report.valid_events.saturating_add(1);
        } else {
            report.invalid_events = report.invalid_events.saturating_add(1);
        }
    }

    Ok(report)
}

pub fn render_validate_report(report: &ValidateReport) -> String {
    let mut lines = vec![format!(
        "store validate: data_dir={} total_events={} valid_events={} invalid_events={}",
        report.data_dir, report.total_events, report.valid_events, report.invalid_events,
    )];
    for diagnostic in &report.diagnostics {
        lines.push(format!(
            "store validate error: event_id={} reason_code={} message={}",
            diagnostic.event_id, diagnostic.reason_code, diagnostic.message
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use herald_store::{
        AnchorUpdate, ClockInPatch, EventDraft, EventStore, Notification, OverlayPatch,
    };

    use super::*;

    fn draft(name: &str) -> EventDraft {
        EventDraft {
            name: name.to_string(),
            schedule: "0 0 20 * * Thu *".to_string(),
            template: "{name} tonight".to_string(),
            channel_id: "chan-a".to_string(),
            enabled: true,
            notifications: Vec::new(),
            position_caps: BTreeMap::new(),
            delivery_channel_id: None,
        }
    }

    #[test]
    fn inspect_counts_events_and_clock_in_state() {
        let temp = tempdir().expect("tempdir");
        let mut store = EventStore::open(temp.path()).expect("open");

        let first = store.add(draft("First")).expect("add");
        let mut disabled = draft("Second");
        disabled.enabled = false;
        disabled.notifications.push(Notification {
            id: "n1".to_string(),
            offset_minutes: 30,
            is_clock_in: true,
            template: None,
            channel_id: None,
        });
        store.add(disabled).expect("add disabled");

        store
            .update_overlay(
                &first.record.id,
                &OverlayPatch {
                    anchor: Some(AnchorUpdate::Set {
                        channel_id: "chan-a".to_string(),
                        message_id: "msg-1".to_string(),
                    }),
                    clock_in: Some(ClockInPatch {
                        set_positions: BTreeMap::from([(
                            "bouncer".to_string(),
                            vec!["member-a".to_string(), "member-b".to_string()],
                        )]),
                        queue_auto_next: BTreeMap::from([(
                            "member-c".to_string(),
                            "bouncer".to_string(),
                        )]),
                        ..ClockInPatch::default()
                    }),
                    ..OverlayPatch::default()
                },
            )
            .expect("seed overlay");
        drop(store);

        let report = inspect_store(temp.path()).expect("inspect");
        assert_eq!(report.total_events, 2);
        assert_eq!(report.enabled_events, 1);
        assert_eq!(report.disabled_events, 1);
        assert_eq!(report.anchored_events, 1);
        assert_eq!(report.unanchored_enabled_events, 0);
        assert_eq!(report.clock_in_events, 1);
        assert_eq!(report.staffed_members, 2);
        assert_eq!(report.queued_auto_next_entries, 1);
        assert_eq!(report.orphaned_overlays, 0);

        let rendered = render_inspect_report(&report);
        assert!(rendered.starts_with("store inspect: data_dir="));
        assert!(rendered.contains("total_events=2"));
    }

    #[test]
    fn validate_flags_bad_configuration_and_duplicate_members() {
        let temp = tempdir().expect("tempdir");
        let mut store = EventStore::open(temp.path()).expect("open");

        let mut bad = draft("");
        bad.position_caps.insert("instance_manager".to_string(), 4);
        let bad_id = store.add(bad).expect("add").record.id;
        store
            .update_overlay(
                &bad_id,
                &OverlayPatch {
                    clock_in: Some(ClockInPatch {
                        set_positions: BTreeMap::from([
                            ("bouncer".to_string(), vec!["member-a".to_string()]),
                            ("manager".to_string(), vec!["member-a".to_string()]),
                        ]),
                        ..ClockInPatch::default()
                    }),
                    ..OverlayPatch::default()
                },
            )
            .expect("seed overlay");
        store.add(draft("Fine")).expect("add fine");
        drop(store);

        let report = validate_store(temp.path()).expect("validate");
        assert_eq!(report.total_events, 2);
        assert_eq!(report.valid_events, 1);
        assert_eq!(report.invalid_events, 1);

        let reasons: Vec<&str> = report
            .diagnostics
            .iter()
            .map(|diagnostic| diagnostic.reason_code.as_str())
            .collect();
        assert!(reasons.contains(&"name_empty"));
        assert!(reasons.contains(&"instance_manager_cap_ignored"));
        assert!(reasons.contains(&"member_in_multiple_positions"));

        let rendered = render_validate_report(&report);
        assert!(rendered.contains("invalid_events=1"));
        assert!(rendered.contains("reason_code=name_empty"));
    }
}
