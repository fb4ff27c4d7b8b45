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

//! Atomic execution of repository work.
//!
//! A [`UnitOfWork`] opens a transaction, hands the body a transaction-scoped
//! [`StockRepository`], and commits when the body succeeds. Any error from
//! the body (or from the caller's context) rolls the transaction back, so a
//! body either takes full effect or none at all.
//!
//! [`UnitOfWork::execute`] is the object-safe primitive and only reports
//! success or failure. [`UnitOfWork::atomic`] layers a typed result on top:
//! the body's value is moved out through a slot captured by the closure, so
//! callers get their `T` back without any runtime downcast.
//!
//! ```
//! use stock_ledger::{Context, Database, StockId, StockRepository, UnitOfWork};
//!
//! let db = Database::new();
//! let found = db.atomic(&Context::background(), |repo| {
//!     Ok(repo.get_by_id(StockId(1)).is_ok())
//! });
//! assert_eq!(found, Ok(false));
//! ```

use crate::repository::StockRepository;
use crate::{Context, Database, LedgerError};

/// Body of an atomic unit of work.
pub type AtomicBody<'a> = Box<dyn FnOnce(&mut dyn StockRepository) -> Result<(), LedgerError> + 'a>;

/// Runs repository work atomically.
pub trait UnitOfWork {
    /// Runs `body` in a fresh transaction, committing on `Ok` and rolling
    /// back on `Err`. If the commit itself fails, its error is returned and
    /// none of the body's writes become visible.
    fn execute(&self, ctx: &Context, body: AtomicBody<'_>) -> Result<(), LedgerError>;

    /// Typed variant of [`execute`](Self::execute).
    fn atomic<T, F>(&self, ctx: &Context, body: F) -> Result<T, LedgerError>
    where
        Self: Sized,
        F: FnOnce(&mut dyn StockRepository) -> Result<T, LedgerError>,
    {
        let mut output = None;
        self.execute(
            ctx,
            Box::new(|repo: &mut dyn StockRepository| -> Result<(), LedgerError> {
                output = Some(body(repo)?);
                Ok(())
            }),
        )?;
        output.ok_or_else(|| {
            LedgerError::Internal(format!(
                "unit of work committed without producing a {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl UnitOfWork for Database {
    fn execute(&self, ctx: &Context, body: AtomicBody<'_>) -> Result<(), LedgerError> {
        let mut tx = self.begin(ctx)?;
        match body(&mut tx) {
            Ok(()) => tx.commit(),
            Err(e) => {
                tracing::debug!(error = %e, "unit of work failed");
                tx.rollback();
                Err(e)
            }
        }
    }
}
