// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Caller context carrying cancellation and an optional deadline.
//!
//! A [`Context`] travels with every transaction. Repository calls, row-lock
//! waits, and commit all check it, so canceling the context (or letting its
//! deadline pass) aborts whatever transaction it is attached to.
//!
//! ```
//! use std::time::Duration;
//! use stock_ledger::{Context, LedgerError};
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! assert!(ctx.check().is_ok());
//!
//! ctx.cancel_handle().cancel();
//! assert_eq!(ctx.check(), Err(LedgerError::Canceled));
//! ```

use crate::LedgerError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation flag and optional deadline shared by one logical request.
#[derive(Debug, Clone)]
pub struct Context {
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Cancels every clone of the [`Context`] it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Derives a context whose deadline is `timeout` from now, keeping any
    /// earlier deadline already set. A timeout too large to represent
    /// leaves the current deadline (or its absence) unchanged.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            canceled: Arc::clone(&self.canceled),
            deadline: Some(deadline),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            canceled: Arc::clone(&self.canceled),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`LedgerError::Canceled`] or [`LedgerError::DeadlineExceeded`]
    /// once the context is done.
    pub fn check(&self) -> Result<(), LedgerError> {
        if self.canceled.load(Ordering::SeqCst) {
            return Err(LedgerError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(LedgerError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
