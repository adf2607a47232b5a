// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observability channel for non-fatal outcomes.
//!
//! Best-effort steps (mint fan-out, cascade siblings, enqueue) never fail the
//! request that triggered them. Their errors are emitted here instead: every
//! event is logged through `tracing` and broadcast to subscribers, so tests
//! and operators can see the soft failures the HTTP status hides.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the sync components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A sub-account token was refreshed with its own refresh token.
    TokenRefreshed { sub_account: String },
    /// A sub-account token was minted from the parent account token.
    TokenMinted { sub_account: String },
    /// The full fallback chain failed for a sub-account.
    TokenUnavailable { sub_account: String, error: String },
    /// Install discovery found no sub-accounts or failed outright.
    DiscoveryFailed { account: String, error: String },
    /// Minting a token for one discovered sub-account failed.
    MintFailed { account: String, sub_account: String, error: String },
    /// One sub-account of an account-wide cascade failed.
    CascadeItemFailed { account: String, sub_account: String, error: String },
    /// A structurally valid webhook could not be applied.
    WebhookFailed { webhook: String, error: String },
    /// Uninstall for a sub-account with no owning account on record.
    OrphanUninstall { sub_account: String },
    /// Reconciliation work could not be scheduled.
    EnqueueFailed { sub_account: String, group_key: String, attempt: u32, error: String },
    /// A reconcile group reached zero and its records were deleted.
    ReconcileResolved { sub_account: String, group_key: String, deleted: usize },
    /// A reconcile group hit the attempt cap; records were kept.
    ReconcileExhausted { sub_account: String, group_key: String, attempt: u32, remaining: usize },
}

impl SyncEvent {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenUnavailable { .. }
                | Self::DiscoveryFailed { .. }
                | Self::MintFailed { .. }
                | Self::CascadeItemFailed { .. }
                | Self::WebhookFailed { .. }
                | Self::EnqueueFailed { .. }
                | Self::ReconcileExhausted { .. }
        )
    }
}

/// Broadcast hub for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: broadcast::Sender<SyncEvent>,
}

impl Reporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Log the event and fan it out. Having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        if event.is_failure() {
            tracing::warn!(?event, "soft failure");
        } else {
            tracing::info!(?event, "sync event");
        }
        let _ = self.tx.send(event);
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain everything currently buffered on a receiver.
pub fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(e) => out.push(e),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
