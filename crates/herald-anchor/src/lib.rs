//! Anchor lifecycle management and reconciliation for herald events.
//!
//! Each enabled event owns exactly one live "anchor" message. This crate
//! converges the platform toward that invariant: `ensure_anchor` performs
//! the edit/move/create/delete lifecycle, and `reconcile_all` repairs drift
//! (out-of-band deletions, lost pointers, channel changes) using the
//! invisible identity tokens from `herald-token`.

pub mod anchor;
pub mod client;
pub mod reconcile;
pub mod testing;

pub use anchor::{build_anchor_payload, ensure_anchor};
pub use client::{ChatClient, ChatMessage, MessagePayload, RenderContext, TemplateRenderer};
pub use reconcile::{
    reconcile_all, render_reconcile_report, ReconcileOptions, ReconcileReport,
};
