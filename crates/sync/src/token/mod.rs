// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token resolution for sub-accounts and parent accounts.

pub mod resolver;

pub use resolver::TokenResolver;

use crate::store::StoreError;

/// Errors from token resolution.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Every step of the fallback chain failed. Not retryable: the
    /// sub-account (or account) has to be reconnected.
    #[error("no usable token for {id}: {reason}")]
    Unavailable { id: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TokenError {
    pub(crate) fn unavailable(id: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable { id: id.to_owned(), reason: reason.into() }
    }

    /// True for credential failures that need operator intervention.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
