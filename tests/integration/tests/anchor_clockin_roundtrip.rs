//! End-to-end drift scenario: anchor creation, out-of-band deletion,
//! reconciliation, and a clock-in round riding on the repaired event.

use std::collections::BTreeMap;

use herald_anchor::testing::{FakeChatClient, FakeRenderer};
use herald_anchor::{ensure_anchor, reconcile_all, ReconcileOptions};
use herald_clockin::{ClockInRuntime, RepostOutcome, RoleGate};
use herald_store::{EventDraft, EventStore, SharedEventStore};
use herald_token::{find_token_in_text, generate_token};

const BOT_ID: &str = "bot-1";

struct AllowAll;

impl RoleGate for AllowAll {
    fn qualifies(&self, _member_id: &str, _position_key: &str) -> bool {
        true
    }
}

fn seed_event(root: &std::path::Path) -> (SharedEventStore, String) {
    let mut store = EventStore::open(root).expect("open store");
    let view = store
        .add(EventDraft {
            name: "Friday Social".to_string(),
            schedule: "0 0 19 * * Fri *".to_string(),
            template: "{name} is on! Sign up below.".to_string(),
            channel_id: "chan-main".to_string(),
            enabled: true,
            notifications: Vec::new(),
            position_caps: BTreeMap::from([
                ("bouncer".to_string(), 2),
                ("manager".to_string(), 0),
            ]),
            delivery_channel_id: None,
        })
        .expect("add event");
    (store.into_shared(), view.record.id)
}

#[tokio::test]
async fn restart_drift_is_repaired_and_clock_in_round_survives() {
    let temp = tempfile::tempdir().expect("tempdir");
    let client = FakeChatClient::new(BOT_ID);
    let (store, event_id) = seed_event(temp.path());

    // Scheduled refresh creates the anchor and persists the pointer.
    let anchor = ensure_anchor(&client, &FakeRenderer, &store, &event_id, None)
        .await
        .expect("anchor created");
    let token = generate_token(&event_id);
    assert_eq!(find_token_in_text(&anchor.content).as_deref(), Some(&*token));

    // Members staff the round; one books the next occurrence up front.
    let clockin = ClockInRuntime::new(store.clone()).with_min_repost_interval_ms(0);
    clockin
        .register_selection(&AllowAll, &event_id, "ada", Some("bouncer"))
        .expect("register ada");
    clockin
        .register_selection(&AllowAll, &event_id, "bob", Some("manager"))
        .expect("register bob");
    clockin
        .queue_auto_next(&AllowAll, &event_id, "cyn", "bouncer")
        .expect("queue cyn");

    // The platform loses the anchor behind our back; a restart follows.
    client.delete_out_of_band("chan-main", &anchor.id);
    let reopened = EventStore::open(temp.path())
        .expect("reopen store")
        .into_shared();

    let report = reconcile_all(
        &client,
        &FakeRenderer,
        &reopened,
        ReconcileOptions {
            dry_run: false,
            repair: true,
        },
    )
    .await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.recreated, 1);

    let view = reopened
        .lock()
        .expect("store lock")
        .get(&event_id)
        .expect("event exists");
    let (channel_id, message_id) = view.overlay.anchor().expect("pointer restored");
    let recreated = client
        .message(channel_id, message_id)
        .expect("recreated anchor exists");
    assert_eq!(find_token_in_text(&recreated.content).as_deref(), Some(&*token));

    // Roster state rode out the restart, and the next round drains the queue.
    assert_eq!(
        view.overlay.clock_in.positions.get("bouncer"),
        Some(&vec!["ada".to_string()])
    );

    let clockin = ClockInRuntime::new(reopened.clone()).with_min_repost_interval_ms(0);
    let RepostOutcome::Posted(board) = clockin
        .render_and_repost(&client, &FakeRenderer, &event_id)
        .await
        .expect("repost")
    else {
        panic!("expected a posted clock-in board");
    };
    assert!(board.content.contains("bouncer: cyn"));

    let view = reopened
        .lock()
        .expect("store lock")
        .get(&event_id)
        .expect("event exists");
    assert!(view.overlay.clock_in.auto_next.is_empty());
    assert_eq!(
        view.overlay.clock_in.positions.get("bouncer"),
        Some(&vec!["cyn".to_string()])
    );
    assert!(view
        .overlay
        .clock_in
        .positions
        .get("manager")
        .map(Vec::is_empty)
        .unwrap_or(true));
}
