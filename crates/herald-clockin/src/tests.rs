//! Tests for roster exclusivity, capacity, auto-next drain, and reposting.

use std::collections::BTreeMap;

use tempfile::{tempdir, TempDir};

use herald_anchor::testing::{FakeChatClient, FakeRenderer};
use herald_store::{
    EventDraft, EventPatch, EventStore, Notification, SharedEventStore,
    INSTANCE_MANAGER_POSITION,
};
use herald_token::{find_token_in_text, generate_token};

use super::{ClockInError, ClockInRuntime, RepostOutcome, RoleGate, CLOCK_IN_COMPONENT};

const BOT_ID: &str = "bot-1";

struct AllowAll;

impl RoleGate for AllowAll {
    fn qualifies(&self, _member_id: &str, _position_key: &str) -> bool {
        true
    }
}

struct DenyPosition(&'static str);

impl RoleGate for DenyPosition {
    fn qualifies(&self, _member_id: &str, position_key: &str) -> bool {
        position_key != self.0
    }
}

fn setup(caps: &[(&str, u32)]) -> (TempDir, SharedEventStore, String) {
    setup_with_notifications(caps, Vec::new())
}

fn setup_with_notifications(
    caps: &[(&str, u32)],
    notifications: Vec<Notification>,
) -> (TempDir, SharedEventStore, String) {
    let temp = tempdir().expect("tempdir");
    let mut store = EventStore::open(temp.path()).expect("open store");
    let view = store
        .add(EventDraft {
            name: "Club Night".to_string(),
            schedule: "0 0 22 * * Sat *".to_string(),
            template: "Staffing for {name}".to_string(),
            channel_id: "chan-a".to_string(),
            enabled: true,
            notifications,
            position_caps: caps
                .iter()
                .map(|(position_key, cap)| (position_key.to_string(), *cap))
                .collect(),
            delivery_channel_id: None,
        })
        .expect("add event");
    (temp, store.into_shared(), view.record.id)
}

fn positions(store: &SharedEventStore, event_id: &str) -> BTreeMap<String, Vec<String>> {
    store
        .lock()
        .expect("store lock")
        .get(event_id)
        .expect("event exists")
        .overlay
        .clock_in
        .positions
        .clone()
}

fn auto_next(store: &SharedEventStore, event_id: &str) -> BTreeMap<String, String> {
    store
        .lock()
        .expect("store lock")
        .get(event_id)
        .expect("event exists")
        .overlay
        .clock_in
        .auto_next
        .clone()
}

fn members_of(positions: &BTreeMap<String, Vec<String>>, position_key: &str) -> Vec<String> {
    positions.get(position_key).cloned().unwrap_or_default()
}

#[test]
fn member_occupies_at_most_one_position() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone());

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("register bouncer");
    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("manager"))
        .expect("register manager");

    let roster = positions(&store, &event_id);
    assert_eq!(members_of(&roster, "bouncer"), Vec::<String>::new());
    assert_eq!(members_of(&roster, "manager"), vec!["member-a".to_string()]);
    let occurrences: usize = roster
        .values()
        .map(|members| members.iter().filter(|member| *member == "member-a").count())
        .sum();
    assert_eq!(occurrences, 1);
}

#[test]
fn instance_manager_contention_releases_via_none() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone());

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some(INSTANCE_MANAGER_POSITION))
        .expect("first instance manager");

    let rejected = runtime
        .register_selection(&AllowAll, &event_id, "member-b", Some(INSTANCE_MANAGER_POSITION))
        .expect_err("capacity rejection");
    assert!(matches!(rejected, ClockInError::PositionFull(_)));

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", None)
        .expect("unregister");

    runtime
        .register_selection(&AllowAll, &event_id, "member-b", Some(INSTANCE_MANAGER_POSITION))
        .expect("retry succeeds");

    let roster = positions(&store, &event_id);
    assert_eq!(
        members_of(&roster, INSTANCE_MANAGER_POSITION),
        vec!["member-b".to_string()]
    );
}

#[test]
fn configured_caps_are_enforced() {
    let (_temp, store, event_id) = setup(&[("bouncer", 2)]);
    let runtime = ClockInRuntime::new(store.clone());

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("first");
    runtime
        .register_selection(&AllowAll, &event_id, "member-b", Some("bouncer"))
        .expect("second");
    let rejected = runtime
        .register_selection(&AllowAll, &event_id, "member-c", Some("bouncer"))
        .expect_err("third exceeds cap");
    assert!(matches!(rejected, ClockInError::PositionFull(position) if position == "bouncer"));

    // Re-selecting an already-held position never double-counts the member.
    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("re-register");
    assert_eq!(
        members_of(&positions(&store, &event_id), "bouncer").len(),
        2
    );
}

#[test]
fn unqualified_member_is_rejected_before_any_mutation() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone());

    let rejected = runtime
        .register_selection(
            &DenyPosition(INSTANCE_MANAGER_POSITION),
            &event_id,
            "member-b",
            Some(INSTANCE_MANAGER_POSITION),
        )
        .expect_err("gate rejection");
    assert!(matches!(rejected, ClockInError::Unqualified(_)));
    assert!(positions(&store, &event_id).is_empty());
}

#[test]
fn unknown_position_is_rejected_when_roster_is_declared() {
    let (_temp, store, event_id) = setup(&[("bouncer", 1)]);
    let runtime = ClockInRuntime::new(store);

    let rejected = runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("dj"))
        .expect_err("unknown position");
    assert!(matches!(rejected, ClockInError::UnknownPosition(position) if position == "dj"));
}

#[test]
fn held_lock_yields_busy_and_releases_on_drop() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store);

    let guard = runtime
        .lock_registry()
        .try_acquire(&event_id)
        .expect("acquire");
    let rejected = runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect_err("busy");
    assert!(matches!(rejected, ClockInError::Busy));

    drop(guard);
    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("register after release");
}

#[test]
fn unknown_event_is_rejected() {
    let temp = tempdir().expect("tempdir");
    let store = EventStore::open(temp.path()).expect("open store").into_shared();
    let runtime = ClockInRuntime::new(store);
    let rejected = runtime
        .register_selection(&AllowAll, "missing", "member-a", Some("bouncer"))
        .expect_err("unknown event");
    assert!(matches!(rejected, ClockInError::UnknownEvent));
}

#[tokio::test]
async fn auto_next_survives_refresh_and_materializes_on_repost() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);

    runtime
        .register_selection(&AllowAll, &event_id, "member-d", Some("manager"))
        .expect("register manager");
    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-c", "bouncer")
        .expect("queue");

    // Queueing alone never touches the roster.
    let roster = positions(&store, &event_id);
    assert!(members_of(&roster, "bouncer").is_empty());
    assert_eq!(
        auto_next(&store, &event_id),
        BTreeMap::from([("member-c".to_string(), "bouncer".to_string())])
    );

    let outcome = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("repost");
    let RepostOutcome::Posted(message) = outcome else {
        panic!("expected a posted message");
    };

    // New round: prior roster reset, carry-over materialized, queue consumed.
    let roster = positions(&store, &event_id);
    assert_eq!(members_of(&roster, "bouncer"), vec!["member-c".to_string()]);
    assert!(members_of(&roster, "manager").is_empty());
    assert!(auto_next(&store, &event_id).is_empty());

    assert!(message.content.contains("bouncer: member-c"));
    assert_eq!(message.component_ids, vec![CLOCK_IN_COMPONENT.to_string()]);
    assert_eq!(
        find_token_in_text(&message.content).as_deref(),
        Some(generate_token(&event_id).as_str())
    );

    // A second repost starts yet another round; the carry-over was one-shot.
    runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("second repost");
    assert!(members_of(&positions(&store, &event_id), "bouncer").is_empty());
}

#[tokio::test]
async fn auto_next_entries_over_capacity_are_dropped_and_consumed() {
    let (_temp, store, event_id) = setup(&[("bouncer", 1)]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);

    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-a", "bouncer")
        .expect("queue a");
    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-b", "bouncer")
        .expect("queue b");

    runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("repost");

    assert_eq!(
        members_of(&positions(&store, &event_id), "bouncer"),
        vec!["member-a".to_string()]
    );
    assert!(auto_next(&store, &event_id).is_empty());
}

#[tokio::test]
async fn auto_next_entry_for_removed_position_is_dropped() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);

    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-x", "dj")
        .expect("queue while roster open");

    // The roster is narrowed before the next round; "dj" no longer exists.
    {
        let mut guard = store.lock().expect("store lock");
        guard
            .update(
                &event_id,
                &EventPatch {
                    position_caps: Some(BTreeMap::from([("bouncer".to_string(), 1)])),
                    ..EventPatch::default()
                },
            )
            .expect("narrow roster");
    }

    runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("repost");

    let roster = positions(&store, &event_id);
    assert!(members_of(&roster, "dj").is_empty());
    assert!(auto_next(&store, &event_id).is_empty());
}

#[tokio::test]
async fn repost_supersedes_previous_message_and_keeps_newest_id() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);

    let RepostOutcome::Posted(first) = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("first repost")
    else {
        panic!("expected a posted message");
    };
    let RepostOutcome::Posted(second) = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("second repost")
    else {
        panic!("expected a posted message");
    };

    assert!(client.message("chan-a", &first.id).is_none());
    assert!(client.message("chan-a", &second.id).is_some());

    let view = store
        .lock()
        .expect("store lock")
        .get(&event_id)
        .expect("event exists");
    assert_eq!(view.overlay.clock_in.message_ids, vec![second.id]);
    assert!(view.overlay.clock_in.last_sent_unix_ms.is_some());
}

#[tokio::test]
async fn repost_is_rate_limited_by_last_sent_timestamp() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store);
    let client = FakeChatClient::new(BOT_ID);

    let first = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("first repost");
    assert!(matches!(first, RepostOutcome::Posted(_)));

    let second = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("second repost");
    assert!(matches!(second, RepostOutcome::RateLimited));
    assert_eq!(client.send_calls(), 1);
}

#[tokio::test]
async fn repost_honors_clock_in_notification_overrides() {
    let notification = Notification {
        id: "notif-clockin".to_string(),
        offset_minutes: 60,
        is_clock_in: true,
        template: Some("Clock in for {name}".to_string()),
        channel_id: Some("chan-clock".to_string()),
    };
    let (_temp, store, event_id) = setup_with_notifications(&[], vec![notification]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);

    let RepostOutcome::Posted(message) = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("repost")
    else {
        panic!("expected a posted message");
    };

    assert_eq!(message.channel_id, "chan-clock");
    assert!(message.content.starts_with("Clock in for Club Night"));
    let view = store
        .lock()
        .expect("store lock")
        .get(&event_id)
        .expect("event exists");
    assert_eq!(
        view.overlay.clock_in.channel_id.as_deref(),
        Some("chan-clock")
    );
}

#[tokio::test]
async fn failed_send_leaves_queue_and_roster_intact() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    let client = FakeChatClient::new(BOT_ID);
    client.fail_sends(true);

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("register");
    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-c", "manager")
        .expect("queue");

    let rejected = runtime
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect_err("platform failure");
    assert!(matches!(rejected, ClockInError::Platform(_)));

    // Nothing was consumed; the next scheduled pass retries the round.
    assert_eq!(
        members_of(&positions(&store, &event_id), "bouncer"),
        vec!["member-a".to_string()]
    );
    assert_eq!(
        auto_next(&store, &event_id),
        BTreeMap::from([("member-c".to_string(), "manager".to_string())])
    );
}

#[test]
fn prune_on_demand_resets_and_drains_without_posting() {
    let (_temp, store, event_id) = setup(&[]);
    let runtime = ClockInRuntime::new(store.clone());

    runtime
        .register_selection(&AllowAll, &event_id, "member-a", Some("bouncer"))
        .expect("register");
    runtime
        .queue_auto_next(&AllowAll, &event_id, "member-b", "manager")
        .expect("queue");

    let state = runtime.prune_on_demand(&event_id).expect("prune");

    assert!(members_of(&state.positions, "bouncer").is_empty());
    assert_eq!(
        members_of(&state.positions, "manager"),
        vec!["member-b".to_string()]
    );
    assert!(state.auto_next.is_empty());
}

#[test]
fn rejection_messages_stay_terse() {
    assert_eq!(
        ClockInError::Busy.to_string(),
        "another update is in progress, try again"
    );
    assert_eq!(
        ClockInError::PositionFull("bouncer".to_string()).to_string(),
        "position 'bouncer' is full"
    );
}
