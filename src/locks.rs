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

//! Exclusive row locks held for the lifetime of a transaction.
//!
//! Each lockable row gets its own [`RowLock`], created on first use and kept
//! in a [`DashMap`]. Ownership is recorded per transaction rather than by a
//! guard, so a lock outlives the call that took it and is only given up when
//! the owning transaction commits or rolls back.
//!
//! Waiting is bounded by the caller's [`Context`]: a blocked waiter wakes on
//! release or every poll interval, and gives up once the context is
//! canceled or past its deadline.

use crate::base::{MutationId, PharmacyId, ProductId, StockId};
use crate::{Context, LedgerError};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Identity of an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TxId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum RowKey {
    Stock(StockId),
    Mutation(MutationId),
    /// Reserves a (pharmacy, product) pair while a stock row is being added.
    StockSlot(PharmacyId, ProductId),
}

#[derive(Debug, Default)]
struct RowLock {
    owner: Mutex<Option<TxId>>,
    released: Condvar,
}

/// Row locks shared by every transaction of one database.
#[derive(Debug)]
pub(crate) struct LockTable {
    rows: DashMap<RowKey, Arc<RowLock>>,
    poll_interval: Duration,
}

impl LockTable {
    /// Creates an empty table whose waiters recheck their context every
    /// `poll_interval`.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            rows: DashMap::new(),
            poll_interval,
        }
    }

    /// Blocks until `tx` owns `key`.
    ///
    /// Returns `true` when the lock was newly taken and `false` when `tx`
    /// already held it.
    pub fn acquire(&self, tx: TxId, key: RowKey, ctx: &Context) -> Result<bool, LedgerError> {
        // Clone the Arc out so the shard guard is not held while we block.
        let row = Arc::clone(
            self.rows
                .entry(key)
                .or_insert_with(|| Arc::new(RowLock::default()))
                .value(),
        );

        let mut owner = row.owner.lock();
        loop {
            match *owner {
                None => {
                    *owner = Some(tx);
                    return Ok(true);
                }
                Some(holder) if holder == tx => return Ok(false),
                Some(holder) => {
                    if let Err(e) = ctx.check() {
                        tracing::warn!(?key, tx = tx.0, holder = holder.0, error = %e, "gave up waiting for row lock");
                        drop(owner);
                        drop(row);
                        self.prune(key);
                        return Err(e);
                    }
                    let wait = ctx
                        .remaining()
                        .map_or(self.poll_interval, |left| left.min(self.poll_interval));
                    row.released.wait_for(&mut owner, wait);
                }
            }
        }
    }

    /// Releases `key` if `tx` holds it.
    pub fn release(&self, tx: TxId, key: RowKey) {
        let Some(row) = self.rows.get(&key).map(|entry| Arc::clone(entry.value())) else {
            return;
        };
        {
            let mut owner = row.owner.lock();
            if *owner != Some(tx) {
                return;
            }
            *owner = None;
            row.released.notify_one();
        }
        drop(row);
        self.prune(key);
    }

    /// Drops the entry for `key` once it is free and nobody else holds a
    /// reference to it. Waiters keep their own `Arc`, so a contended row is
    /// never removed from under them.
    fn prune(&self, key: RowKey) {
        self.rows.remove_if(&key, |_, row| {
            Arc::strong_count(row) == 1 && row.owner.try_lock().is_some_and(|owner| owner.is_none())
        });
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub fn holder(&self, key: RowKey) -> Option<TxId> {
        let row = self.rows.get(&key).map(|entry| Arc::clone(entry.value()))?;
        let owner = row.owner.lock();
        *owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn table() -> LockTable {
        LockTable::new(Duration::from_millis(5))
    }

    #[test]
    fn acquire_is_reentrant_for_owner() {
        let locks = table();
        let ctx = Context::background();
        let key = RowKey::Stock(StockId(1));
        assert!(locks.acquire(TxId(1), key, &ctx).unwrap());
        assert!(!locks.acquire(TxId(1), key, &ctx).unwrap());
        assert_eq!(locks.holder(key), Some(TxId(1)));
    }

    #[test]
    fn release_by_non_owner_is_ignored() {
        let locks = table();
        let ctx = Context::background();
        let key = RowKey::Mutation(MutationId(1));
        locks.acquire(TxId(1), key, &ctx).unwrap();
        locks.release(TxId(2), key);
        assert_eq!(locks.holder(key), Some(TxId(1)));
        locks.release(TxId(1), key);
        assert_eq!(locks.holder(key), None);
    }

    #[test]
    fn waiter_times_out_on_deadline() {
        let locks = table();
        let key = RowKey::Stock(StockId(7));
        locks.acquire(TxId(1), key, &Context::background()).unwrap();

        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let started = Instant::now();
        let result = locks.acquire(TxId(2), key, &ctx);
        assert_eq!(result, Err(LedgerError::DeadlineExceeded));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(locks.holder(key), Some(TxId(1)));
    }

    #[test]
    fn canceled_waiter_gives_up() {
        let locks = Arc::new(table());
        let key = RowKey::Stock(StockId(7));
        locks.acquire(TxId(1), key, &Context::background()).unwrap();

        let ctx = Context::background();
        let cancel = ctx.cancel_handle();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(TxId(2), key, &ctx))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        assert_eq!(waiter.join().unwrap(), Err(LedgerError::Canceled));
    }

    #[test]
    fn waiter_takes_lock_after_release() {
        let locks = Arc::new(table());
        let key = RowKey::StockSlot(PharmacyId(1), ProductId(1));
        locks.acquire(TxId(1), key, &Context::background()).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(TxId(2), key, &Context::background()))
        };
        thread::sleep(Duration::from_millis(20));
        locks.release(TxId(1), key);
        assert_eq!(waiter.join().unwrap(), Ok(true));
        assert_eq!(locks.holder(key), Some(TxId(2)));
    }

    #[test]
    fn released_rows_are_pruned() {
        let locks = table();
        let ctx = Context::background();
        for id in 1..=50 {
            let key = RowKey::Mutation(MutationId(id));
            locks.acquire(TxId(1), key, &ctx).unwrap();
            locks.release(TxId(1), key);
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn contended_row_survives_until_last_waiter_leaves() {
        let locks = table();
        let key = RowKey::Stock(StockId(3));
        locks.acquire(TxId(1), key, &Context::background()).unwrap();

        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert_eq!(
            locks.acquire(TxId(2), key, &ctx),
            Err(LedgerError::DeadlineExceeded)
        );
        // Still held, so the abandoned wait must not drop the entry.
        assert_eq!(locks.len(), 1);
        assert_eq!(locks.holder(key), Some(TxId(1)));

        locks.release(TxId(1), key);
        assert_eq!(locks.len(), 0);
    }
}
