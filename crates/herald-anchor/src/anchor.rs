//! Anchor lifecycle: keep exactly one live message per event.
//!
//! `ensure_anchor` converges the platform toward the event's configuration:
//! edit in place when content drifted, move when the configured channel
//! changed, create when no live message exists, delete when the event is
//! disabled. Platform failures never propagate — the anchor degrades to
//! "missing" and the reconciliation scanner repairs it on the next pass.

use anyhow::{anyhow, Context, Result};

use herald_store::{AnchorUpdate, EventView, OverlayPatch, SharedEventStore};
use herald_token::{embed_token, generate_token, visible_marker};

use crate::client::{ChatClient, ChatMessage, MessagePayload, RenderContext, TemplateRenderer};

/// Builds the final anchor payload for an event: rendered template (or the
/// caller-supplied override), visible fallback marker, invisible token run.
pub fn build_anchor_payload(
    renderer: &dyn TemplateRenderer,
    view: &EventView,
    payload_override: Option<MessagePayload>,
) -> Result<MessagePayload> {
    let token = generate_token(&view.record.id);
    let base = match payload_override {
        Some(payload) => payload,
        None => {
            let context = RenderContext {
                event_name: view.record.name.clone(),
                placeholders: Default::default(),
            };
            MessagePayload::text(
                renderer
                    .render(&view.record.template, &context)
                    .context("template rendering failed")?,
            )
        }
    };

    let visible = format!("{}\n{}", base.content, visible_marker(&token));
    Ok(MessagePayload {
        content: embed_token(&visible, &token),
        component_ids: base.component_ids,
    })
}

/// Ensures exactly one live anchor message represents the event.
///
/// Returns the live message, or `None` when the event is disabled, unknown,
/// or the platform failed (in which case the next reconciliation pass
/// repairs the drift).
pub async fn ensure_anchor(
    client: &dyn ChatClient,
    renderer: &dyn TemplateRenderer,
    store: &SharedEventStore,
    event_id: &str,
    payload_override: Option<MessagePayload>,
) -> Option<ChatMessage> {
    match ensure_anchor_inner(client, renderer, store, event_id, payload_override).await {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(event_id, %error, "ensure_anchor degraded, awaiting reconciliation");
            None
        }
    }
}

async fn ensure_anchor_inner(
    client: &dyn ChatClient,
    renderer: &dyn TemplateRenderer,
    store: &SharedEventStore,
    event_id: &str,
    payload_override: Option<MessagePayload>,
) -> Result<Option<ChatMessage>> {
    let Some(view) = read_view(store, event_id)? else {
        tracing::debug!(event_id, "ensure_anchor skipped: unknown event");
        return Ok(None);
    };

    if !view.record.enabled {
        delete_known_anchor(client, store, &view).await?;
        return Ok(None);
    }

    let payload = build_anchor_payload(renderer, &view, payload_override)?;

    if let Some((channel_id, message_id)) = view.overlay.anchor() {
        if channel_id != view.record.channel_id {
            // Configured channel changed: move the anchor.
            if let Err(error) = client.delete_message(channel_id, message_id).await {
                tracing::warn!(event_id, %error, "failed to delete anchor while moving");
            }
        } else {
            match client.fetch_message(channel_id, message_id).await {
                Ok(Some(live)) => {
                    let unchanged = view.overlay.dynamic_base_content.as_deref()
                        == Some(payload.content.as_str())
                        && live.component_ids == payload.component_ids;
                    if unchanged {
                        return Ok(Some(live));
                    }
                    let edited = client.edit_message(channel_id, message_id, &payload).await?;
                    write_anchor(store, event_id, &edited, &payload)?;
                    return Ok(Some(edited));
                }
                Ok(None) => {
                    tracing::info!(event_id, "anchor message gone, recreating");
                }
                Err(error) => {
                    tracing::warn!(event_id, %error, "anchor fetch failed, recreating");
                }
            }
        }
    }

    let sent = client
        .send_message(&view.record.channel_id, &payload)
        .await
        .context("anchor send failed")?;
    write_anchor(store, event_id, &sent, &payload)?;
    Ok(Some(sent))
}

/// Deletes the remembered anchor, if any, and clears the pointer.
/// Idempotent no-op when nothing is tracked.
pub(crate) async fn delete_known_anchor(
    client: &dyn ChatClient,
    store: &SharedEventStore,
    view: &EventView,
) -> Result<()> {
    let Some((channel_id, message_id)) = view.overlay.anchor() else {
        return Ok(());
    };
    if let Err(error) = client.delete_message(channel_id, message_id).await {
        tracing::warn!(event_id = %view.record.id, %error, "anchor delete failed");
    }
    let patch = OverlayPatch {
        anchor: Some(AnchorUpdate::Clear),
        ..OverlayPatch::default()
    };
    update_overlay(store, &view.record.id, &patch)?;
    Ok(())
}

fn write_anchor(
    store: &SharedEventStore,
    event_id: &str,
    message: &ChatMessage,
    payload: &MessagePayload,
) -> Result<()> {
    let patch = OverlayPatch {
        anchor: Some(AnchorUpdate::Set {
            channel_id: message.channel_id.clone(),
            message_id: message.id.clone(),
        }),
        dynamic_base_content: Some(payload.content.clone()),
        ..OverlayPatch::default()
    };
    update_overlay(store, event_id, &patch)?;
    Ok(())
}

pub(crate) fn read_view(store: &SharedEventStore, event_id: &str) -> Result<Option<EventView>> {
    let guard = store
        .lock()
        .map_err(|_| anyhow!("event store mutex is poisoned"))?;
    Ok(guard.get(event_id))
}

pub(crate) fn update_overlay(
    store: &SharedEventStore,
    event_id: &str,
    patch: &OverlayPatch,
) -> Result<()> {
    let mut guard = store
        .lock()
        .map_err(|_| anyhow!("event store mutex is poisoned"))?;
    guard.update_overlay(event_id, patch)?;
    Ok(())
}
