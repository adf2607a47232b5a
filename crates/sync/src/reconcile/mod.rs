// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deferred reconciliation of grouped cached records.
//!
//! When the platform reports a record deletion for a grouped record, the
//! group is re-counted later by the worker instead of being deleted outright.
//! Attempts run on the task queue with a fixed delay until the group resolves
//! to zero or hits the attempt cap.

pub mod queue;
pub mod record;
pub mod worker;

use serde::{Deserialize, Serialize};

pub use queue::{EnqueueOutcome, ReconcileQueue};
pub use worker::{ReconcileOutcome, ReconcileWorker};

use crate::platform::PlatformError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Payload delivered to the worker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTask {
    #[serde(alias = "sub_account_id", alias = "locationId")]
    pub sub_account_id: String,
    #[serde(alias = "group_key")]
    pub group_key: String,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("record lookup failed: {0}")]
    Lookup(#[from] PlatformError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// Whether the queue should redeliver the same attempt.
    ///
    /// Credential failures are final until the sub-account reconnects.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Token(e) => !e.is_unavailable(),
            Self::Lookup(_) | Self::Store(_) => true,
        }
    }
}
