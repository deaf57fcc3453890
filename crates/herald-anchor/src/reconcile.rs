//! Reconciliation scanner: recovery pass for anchor drift.
//!
//! Runs at startup and on demand. For every tracked event it verifies the
//! remembered anchor still exists and is bot-authored; otherwise it searches
//! a bounded candidate-channel set for a token-bearing message to reclaim,
//! and finally drops the pointer and recreates. The scan is bounded by a
//! constant channel count and recent-message depth, so cost stays linear in
//! tracked events rather than channel history.

use anyhow::{anyhow, Result};
use serde::Serialize;

use herald_store::{AnchorUpdate, EventView, OverlayPatch, SharedEventStore};
use herald_token::{find_token_in_text, generate_token, has_visible_marker};

use crate::anchor::{ensure_anchor, read_view, update_overlay};
use crate::client::{ChatClient, ChatMessage, TemplateRenderer};

/// Channels inspected per event before giving up on reclaiming.
const MAX_SCAN_CHANNELS: usize = 6;
/// Recent messages inspected per channel.
const SCAN_MESSAGE_DEPTH: usize = 30;
/// Visible characters of `dynamic_base_content` used for prefix matching.
const CONTENT_PREFIX_CHARS: usize = 48;

#[derive(Debug, Clone, Copy, Default)]
/// Scanner behavior switches. `dry_run` suppresses every write and platform
/// mutation; `repair` additionally allows recreating missing anchors.
pub struct ReconcileOptions {
    pub dry_run: bool,
    pub repair: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
/// Outcome counters for one reconciliation pass.
pub struct ReconcileReport {
    pub checked: usize,
    pub missing: usize,
    pub reclaimed: usize,
    pub recreated: usize,
    pub removed: usize,
    pub errors: usize,
}

/// Renders the single-line operator summary for a reconciliation pass.
pub fn render_reconcile_report(report: &ReconcileReport) -> String {
    format!(
        "reconcile: checked={} missing={} reclaimed={} recreated={} removed={} errors={}",
        report.checked,
        report.missing,
        report.reclaimed,
        report.recreated,
        report.removed,
        report.errors
    )
}

/// Verifies and repairs every tracked anchor. Never fails outright; per-event
/// platform errors are counted and the pass continues.
pub async fn reconcile_all(
    client: &dyn ChatClient,
    renderer: &dyn TemplateRenderer,
    store: &SharedEventStore,
    options: ReconcileOptions,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let (event_ids, overlay_ids) = match list_ids(store) {
        Ok(ids) => ids,
        Err(error) => {
            tracing::warn!(%error, "reconcile aborted: store unavailable");
            report.errors = report.errors.saturating_add(1);
            return report;
        }
    };

    // Overlay entries whose event no longer exists are dropped outright.
    for orphan_id in overlay_ids {
        if event_ids.contains(&orphan_id) {
            continue;
        }
        report.removed = report.removed.saturating_add(1);
        if options.dry_run {
            continue;
        }
        if let Err(error) = remove_overlay(store, &orphan_id) {
            tracing::warn!(event_id = %orphan_id, %error, "failed to drop orphaned overlay");
            report.errors = report.errors.saturating_add(1);
        }
    }

    for event_id in event_ids {
        match reconcile_event(client, renderer, store, &event_id, options, &mut report).await {
            Ok(()) => {}
            Err(error) => {
                tracing::warn!(event_id, %error, "reconcile pass failed for event");
                report.errors = report.errors.saturating_add(1);
            }
        }
    }

    tracing::info!(
        checked = report.checked,
        missing = report.missing,
        reclaimed = report.reclaimed,
        recreated = report.recreated,
        removed = report.removed,
        errors = report.errors,
        "reconcile pass complete"
    );
    report
}

async fn reconcile_event(
    client: &dyn ChatClient,
    renderer: &dyn TemplateRenderer,
    store: &SharedEventStore,
    event_id: &str,
    options: ReconcileOptions,
    report: &mut ReconcileReport,
) -> Result<()> {
    let Some(view) = read_view(store, event_id)? else {
        return Ok(());
    };
    if !view.record.enabled {
        return Ok(());
    }
    report.checked = report.checked.saturating_add(1);

    let Some((channel_id, message_id)) = view.overlay.anchor() else {
        report.missing = report.missing.saturating_add(1);
        if options.repair && !options.dry_run {
            recreate(client, renderer, store, event_id, report).await;
        }
        return Ok(());
    };
    let (channel_id, message_id) = (channel_id.to_string(), message_id.to_string());

    match client.fetch_message(&channel_id, &message_id).await {
        Ok(Some(live)) if live.author_id == client.bot_user_id() => {
            // Anchor intact and ours; nothing to do.
            return Ok(());
        }
        Ok(_) => {
            // Missing or foreign-authored: try to reclaim before recreating.
        }
        Err(error) => {
            tracing::warn!(event_id, %error, "anchor channel unreachable, dropping pointer");
            report.missing = report.missing.saturating_add(1);
            if !options.dry_run {
                drop_pointer(store, event_id)?;
                if options.repair {
                    recreate(client, renderer, store, event_id, report).await;
                }
            }
            return Ok(());
        }
    }

    report.missing = report.missing.saturating_add(1);
    match scan_for_candidate(client, &view, report).await {
        Some(candidate) => {
            tracing::info!(
                event_id,
                channel_id = %candidate.channel_id,
                message_id = %candidate.id,
                "reclaimed anchor from candidate scan"
            );
            report.reclaimed = report.reclaimed.saturating_add(1);
            if options.dry_run {
                return Ok(());
            }
            adopt_pointer(store, event_id, &candidate)?;
            if options.repair {
                // Refresh so the adopted message tracks the configuration.
                ensure_anchor(client, renderer, store, event_id, None).await;
            }
        }
        None => {
            if options.dry_run {
                return Ok(());
            }
            drop_pointer(store, event_id)?;
            if options.repair {
                recreate(client, renderer, store, event_id, report).await;
            }
        }
    }
    Ok(())
}

/// Searches the bounded candidate-channel set for the most recent
/// bot-authored message identifying this event. A decoded-token match is
/// authoritative; the visible marker, the event name, and a prefix of the
/// last rendered content are fallbacks, in that order.
async fn scan_for_candidate(
    client: &dyn ChatClient,
    view: &EventView,
    report: &mut ReconcileReport,
) -> Option<ChatMessage> {
    let token = generate_token(&view.record.id);
    let content_prefix: String = view
        .overlay
        .dynamic_base_content
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(CONTENT_PREFIX_CHARS)
        .collect();

    let mut channels = view.overlay.referenced_channels();
    if !channels.contains(&view.record.channel_id) {
        channels.push(view.record.channel_id.clone());
    }
    channels.truncate(MAX_SCAN_CHANNELS);

    let mut fallback: Option<ChatMessage> = None;
    for channel_id in channels {
        let messages = match client.recent_messages(&channel_id, SCAN_MESSAGE_DEPTH).await {
            Ok(messages) => messages,
            Err(error) => {
                tracing::debug!(%channel_id, %error, "candidate channel unreadable");
                report.errors = report.errors.saturating_add(1);
                continue;
            }
        };
        for message in messages {
            if message.author_id != client.bot_user_id() {
                continue;
            }
            if find_token_in_text(&message.content).as_deref() == Some(token.as_str()) {
                return Some(message);
            }
            if fallback.is_none()
                && (has_visible_marker(&message.content, &token)
                    || message.content.contains(&view.record.name)
                    || (!content_prefix.is_empty()
                        && message.content.starts_with(content_prefix.as_str())))
            {
                fallback = Some(message);
            }
        }
    }
    fallback
}

async fn recreate(
    client: &dyn ChatClient,
    renderer: &dyn TemplateRenderer,
    store: &SharedEventStore,
    event_id: &str,
    report: &mut ReconcileReport,
) {
    if ensure_anchor(client, renderer, store, event_id, None)
        .await
        .is_some()
    {
        report.recreated = report.recreated.saturating_add(1);
    } else {
        report.errors = report.errors.saturating_add(1);
    }
}

fn drop_pointer(store: &SharedEventStore, event_id: &str) -> Result<()> {
    update_overlay(
        store,
        event_id,
        &OverlayPatch {
            anchor: Some(AnchorUpdate::Clear),
            ..OverlayPatch::default()
        },
    )
}

fn adopt_pointer(store: &SharedEventStore, event_id: &str, message: &ChatMessage) -> Result<()> {
    update_overlay(
        store,
        event_id,
        &OverlayPatch {
            anchor: Some(AnchorUpdate::Set {
                channel_id: message.channel_id.clone(),
                message_id: message.id.clone(),
            }),
            ..OverlayPatch::default()
        },
    )
}

fn list_ids(store: &SharedEventStore) -> Result<(Vec<String>, Vec<String>)> {
    let guard = store
        .lock()
        .map_err(|_| anyhow!("event store mutex is poisoned"))?;
    let event_ids = guard
        .get_all()
        .into_iter()
        .map(|view| view.record.id)
        .collect();
    Ok((event_ids, guard.overlay_ids()))
}

fn remove_overlay(store: &SharedEventStore, event_id: &str) -> Result<()> {
    let mut guard = store
        .lock()
        .map_err(|_| anyhow!("event store mutex is poisoned"))?;
    guard.remove_overlay(event_id)?;
    Ok(())
}
