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

//! Embedded transactional database backing the stock ledger.
//!
//! Committed rows live in ordered maps behind a single [`RwLock`]. A
//! [`Transaction`] buffers its own writes and publishes them all at once on
//! [`commit`](Transaction::commit), so other transactions never observe a
//! half-applied change. Row locks come from the shared [`LockTable`] and are
//! held until the transaction ends.
//!
//! # Example
//!
//! ```
//! use stock_ledger::{
//!     Context, Database, NewStock, Pharmacy, PharmacyId, Product, ProductId, StockRepository,
//! };
//!
//! let db = Database::new();
//! db.register_product(Product { id: ProductId(1), name: "Aspirin".into(), slug: "aspirin".into() });
//! db.register_pharmacy(Pharmacy { id: PharmacyId(1), name: "North".into(), manager: None });
//!
//! let ctx = Context::background();
//! let mut tx = db.begin(&ctx).unwrap();
//! let stock = tx
//!     .add(NewStock { product_id: ProductId(1), pharmacy_id: PharmacyId(1), quantity: 5, price: 900 })
//!     .unwrap();
//! tx.commit().unwrap();
//!
//! let tx = db.begin(&ctx).unwrap();
//! assert_eq!(tx.get_by_id(stock.id).unwrap().quantity, 5);
//! ```
//!
//! # Thread Safety
//!
//! [`Database`] is a cheap handle over shared state; clone it into every
//! thread. No row lock is ever requested while the table lock is held.

use crate::base::{MutationId, PharmacyId, ProductId, StockId};
use crate::catalog::{Pharmacy, Product};
use crate::config::LedgerConfig;
use crate::error::Entity;
use crate::filter::{MutationFilter, MutationSortBy, PageInfo, StockFilter, StockSortBy};
use crate::locks::{LockTable, RowKey, TxId};
use crate::repository::StockRepository;
use crate::stock::{MutationStatus, NewStock, NewStockMutation, Stock, StockMutation};
use crate::{Context, LedgerError};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Tables {
    stocks: BTreeMap<StockId, Stock>,
    mutations: BTreeMap<MutationId, StockMutation>,
}

#[derive(Debug, Default)]
struct Catalog {
    products: BTreeMap<ProductId, Product>,
    pharmacies: BTreeMap<PharmacyId, Pharmacy>,
}

#[derive(Debug)]
struct Shared {
    config: LedgerConfig,
    tables: RwLock<Tables>,
    catalog: RwLock<Catalog>,
    locks: LockTable,
    next_tx: AtomicU64,
    next_stock: AtomicU64,
    next_mutation: AtomicU64,
}

/// Handle to the shared database.
#[derive(Debug, Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Creates an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates an empty database whose lock waits and page limits follow
    /// `config`.
    pub fn with_config(config: LedgerConfig) -> Self {
        let locks = LockTable::new(config.lock_poll_interval());
        Self {
            shared: Arc::new(Shared {
                config,
                tables: RwLock::new(Tables::default()),
                catalog: RwLock::new(Catalog::default()),
                locks,
                next_tx: AtomicU64::new(1),
                next_stock: AtomicU64::new(1),
                next_mutation: AtomicU64::new(1),
            }),
        }
    }

    /// Configuration the database was created with.
    pub fn config(&self) -> &LedgerConfig {
        &self.shared.config
    }

    /// Registers or replaces a product.
    pub fn register_product(&self, product: Product) {
        self.shared.catalog.write().products.insert(product.id, product);
    }

    /// Registers or replaces a pharmacy.
    pub fn register_pharmacy(&self, pharmacy: Pharmacy) {
        self.shared
            .catalog
            .write()
            .pharmacies
            .insert(pharmacy.id, pharmacy);
    }

    /// Opens a transaction bound to `ctx`.
    pub fn begin(&self, ctx: &Context) -> Result<Transaction, LedgerError> {
        ctx.check()?;
        let id = TxId(self.shared.next_tx.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(tx = id.0, "begin");
        Ok(Transaction {
            shared: Arc::clone(&self.shared),
            id,
            ctx: ctx.clone(),
            stocks: BTreeMap::new(),
            mutations: BTreeMap::new(),
            held: Vec::new(),
            finished: false,
        })
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// An open transaction.
///
/// Writes stay private to the transaction until [`commit`](Self::commit).
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back, releasing its row locks.
#[derive(Debug)]
pub struct Transaction {
    shared: Arc<Shared>,
    id: TxId,
    ctx: Context,
    /// Pending stock writes, keyed by row.
    stocks: BTreeMap<StockId, Stock>,
    /// Pending mutation writes, keyed by row.
    mutations: BTreeMap<MutationId, StockMutation>,
    held: Vec<RowKey>,
    finished: bool,
}

impl Transaction {
    /// Context this transaction was opened with.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Publishes every buffered write atomically and releases all row locks.
    ///
    /// If the context is already done the transaction is rolled back
    /// instead and nothing becomes visible.
    pub fn commit(mut self) -> Result<(), LedgerError> {
        if let Err(e) = self.ctx.check() {
            tracing::debug!(tx = self.id.0, error = %e, "commit refused, rolling back");
            self.finish();
            return Err(e);
        }

        let stocks = std::mem::take(&mut self.stocks);
        let mutations = std::mem::take(&mut self.mutations);
        let (stock_writes, mutation_writes) = (stocks.len(), mutations.len());
        {
            let mut tables = self.shared.tables.write();
            tables.stocks.extend(stocks);
            tables.mutations.extend(mutations);
        }
        self.finish();
        tracing::debug!(tx = self.id.0, stock_writes, mutation_writes, "committed");
        Ok(())
    }

    /// Discards every buffered write and releases all row locks.
    pub fn rollback(mut self) {
        tracing::debug!(tx = self.id.0, "rolled back");
        self.finish();
    }

    fn finish(&mut self) {
        self.stocks.clear();
        self.mutations.clear();
        for key in self.held.drain(..) {
            self.shared.locks.release(self.id, key);
        }
        self.finished = true;
    }

    fn lock(&mut self, key: RowKey) -> Result<(), LedgerError> {
        self.ctx.check()?;
        if self.shared.locks.acquire(self.id, key, &self.ctx)? {
            self.held.push(key);
        }
        Ok(())
    }

    /// Latest version of a stock row visible to this transaction, deleted
    /// or not.
    fn visible_stock(&self, id: StockId) -> Option<Stock> {
        self.stocks
            .get(&id)
            .cloned()
            .or_else(|| self.shared.tables.read().stocks.get(&id).cloned())
    }

    fn live_stock(&self, id: StockId) -> Result<Stock, LedgerError> {
        self.visible_stock(id)
            .filter(|stock| !stock.is_deleted())
            .ok_or(LedgerError::NotFound(Entity::Stock))
    }

    /// Committed rows overlaid with this transaction's own writes.
    fn all_stocks(&self) -> BTreeMap<StockId, Stock> {
        let mut rows = self.shared.tables.read().stocks.clone();
        rows.extend(self.stocks.iter().map(|(id, stock)| (*id, stock.clone())));
        rows
    }

    fn visible_mutation(&self, id: MutationId) -> Option<StockMutation> {
        self.mutations
            .get(&id)
            .cloned()
            .or_else(|| self.shared.tables.read().mutations.get(&id).cloned())
    }

    fn live_mutation(&self, id: MutationId) -> Result<StockMutation, LedgerError> {
        self.visible_mutation(id)
            .filter(|mutation| !mutation.is_deleted())
            .ok_or(LedgerError::NotFound(Entity::StockMutation))
    }

    fn all_mutations(&self) -> BTreeMap<MutationId, StockMutation> {
        let mut rows = self.shared.tables.read().mutations.clone();
        rows.extend(
            self.mutations
                .iter()
                .map(|(id, mutation)| (*id, mutation.clone())),
        );
        rows
    }

    /// Live stocks matching `filter`, fully sorted but not paginated.
    fn filtered_stocks(&self, filter: &StockFilter) -> Vec<Stock> {
        let catalog = self.shared.catalog.read();
        let mut rows: Vec<Stock> = self
            .all_stocks()
            .into_values()
            .filter(|stock| !stock.is_deleted())
            .filter(|stock| filter.product_id.is_none_or(|id| stock.product_id == id))
            .filter(|stock| filter.pharmacy_id.is_none_or(|id| stock.pharmacy_id == id))
            .filter(|stock| {
                filter.search.is_none()
                    || catalog
                        .products
                        .get(&stock.product_id)
                        .is_some_and(|product| filter.matches_product(product))
            })
            .collect();

        let product_name = |stock: &Stock| {
            catalog
                .products
                .get(&stock.product_id)
                .map_or("", |product| product.name.as_str())
        };
        let pharmacy_name = |stock: &Stock| {
            catalog
                .pharmacies
                .get(&stock.pharmacy_id)
                .map_or("", |pharmacy| pharmacy.name.as_str())
        };

        rows.sort_by(|a, b| {
            let primary = match filter.sort_by {
                StockSortBy::ProductName => product_name(a).cmp(product_name(b)),
                StockSortBy::PharmacyName => pharmacy_name(a).cmp(pharmacy_name(b)),
                StockSortBy::Price => a.price.cmp(&b.price),
                StockSortBy::Amount => a.quantity.cmp(&b.quantity),
            };
            filter.order.apply(primary).then(a.id.cmp(&b.id))
        });
        rows
    }

    /// Live mutations matching `filter`, fully sorted but not paginated.
    ///
    /// Product and pharmacy filters resolve through the referenced stocks,
    /// including soft-deleted ones, so history stays queryable.
    fn filtered_mutations(&self, filter: &MutationFilter) -> Vec<StockMutation> {
        let stocks = self.all_stocks();
        let mut rows: Vec<StockMutation> = self
            .all_mutations()
            .into_values()
            .filter(|mutation| !mutation.is_deleted())
            .filter(|mutation| filter.method.is_none_or(|method| mutation.method == method))
            .filter(|mutation| filter.status.is_none_or(|status| mutation.status == status))
            .filter(|mutation| {
                let source = stocks.get(&mutation.source_id);
                let target = stocks.get(&mutation.target_id);
                filter
                    .product_id
                    .is_none_or(|id| source.is_some_and(|stock| stock.product_id == id))
                    && filter
                        .source_pharmacy_id
                        .is_none_or(|id| source.is_some_and(|stock| stock.pharmacy_id == id))
                    && filter
                        .target_pharmacy_id
                        .is_none_or(|id| target.is_some_and(|stock| stock.pharmacy_id == id))
            })
            .collect();

        rows.sort_by(|a, b| {
            let primary = match filter.sort_by {
                MutationSortBy::Timestamp => a.timestamp.cmp(&b.timestamp),
                MutationSortBy::Amount => a.amount.cmp(&b.amount),
            };
            filter.order.apply(primary).then(a.id.cmp(&b.id))
        });
        rows
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(tx = self.id.0, "transaction dropped unfinished, rolling back");
            self.finish();
        }
    }
}

impl StockRepository for Transaction {
    fn get_by_id(&self, id: StockId) -> Result<Stock, LedgerError> {
        self.ctx.check()?;
        self.live_stock(id)
    }

    fn get_by_id_and_lock(&mut self, id: StockId) -> Result<Stock, LedgerError> {
        self.lock(RowKey::Stock(id))?;
        self.live_stock(id)
    }

    fn get_by_id_including_deleted(&self, id: StockId) -> Result<Stock, LedgerError> {
        self.ctx.check()?;
        self.visible_stock(id)
            .ok_or(LedgerError::NotFound(Entity::Stock))
    }

    fn get_by_pharmacy_and_product(
        &self,
        pharmacy_id: PharmacyId,
        product_id: ProductId,
    ) -> Result<Stock, LedgerError> {
        self.ctx.check()?;
        self.all_stocks()
            .into_values()
            .find(|stock| {
                !stock.is_deleted()
                    && stock.pharmacy_id == pharmacy_id
                    && stock.product_id == product_id
            })
            .ok_or(LedgerError::NotFound(Entity::Stock))
    }

    fn list(&self, filter: &StockFilter) -> Result<Vec<Stock>, LedgerError> {
        self.ctx.check()?;
        let pagination = filter.pagination.normalize(&self.shared.config);
        Ok(pagination.slice(self.filtered_stocks(filter)))
    }

    fn get_page_info(&self, filter: &StockFilter) -> Result<PageInfo, LedgerError> {
        self.ctx.check()?;
        let pagination = filter.pagination.normalize(&self.shared.config);
        let count = self.filtered_stocks(filter).len() as u64;
        Ok(PageInfo::new(pagination, count))
    }

    fn add(&mut self, stock: NewStock) -> Result<Stock, LedgerError> {
        self.ctx.check()?;
        {
            let catalog = self.shared.catalog.read();
            if !catalog.products.contains_key(&stock.product_id) {
                return Err(LedgerError::NotFound(Entity::Product));
            }
            if !catalog.pharmacies.contains_key(&stock.pharmacy_id) {
                return Err(LedgerError::NotFound(Entity::Pharmacy));
            }
        }

        self.lock(RowKey::StockSlot(stock.pharmacy_id, stock.product_id))?;
        match self.get_by_pharmacy_and_product(stock.pharmacy_id, stock.product_id) {
            Ok(_) => return Err(LedgerError::StockAlreadyExists),
            Err(LedgerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let row = Stock {
            id: StockId(self.shared.next_stock.fetch_add(1, Ordering::Relaxed)),
            product_id: stock.product_id,
            pharmacy_id: stock.pharmacy_id,
            quantity: stock.quantity,
            price: stock.price,
            deleted_at: None,
        };
        self.stocks.insert(row.id, row.clone());
        Ok(row)
    }

    fn update(&mut self, stock: &Stock) -> Result<Stock, LedgerError> {
        self.lock(RowKey::Stock(stock.id))?;
        let mut row = self.live_stock(stock.id)?;
        row.quantity = stock.quantity;
        row.price = stock.price;
        self.stocks.insert(row.id, row.clone());
        Ok(row)
    }

    fn soft_delete_by_id(&mut self, id: StockId) -> Result<(), LedgerError> {
        self.lock(RowKey::Stock(id))?;
        let mut row = self.live_stock(id)?;
        row.deleted_at = Some(Utc::now());
        self.stocks.insert(id, row);
        Ok(())
    }

    fn get_mutation_by_id(&self, id: MutationId) -> Result<StockMutation, LedgerError> {
        self.ctx.check()?;
        self.live_mutation(id)
    }

    fn get_mutation_by_id_and_lock(
        &mut self,
        id: MutationId,
    ) -> Result<StockMutation, LedgerError> {
        self.lock(RowKey::Mutation(id))?;
        self.live_mutation(id)
    }

    fn list_mutations(&self, filter: &MutationFilter) -> Result<Vec<StockMutation>, LedgerError> {
        self.ctx.check()?;
        let pagination = filter.pagination.normalize(&self.shared.config);
        Ok(pagination.slice(self.filtered_mutations(filter)))
    }

    fn get_mutation_page_info(&self, filter: &MutationFilter) -> Result<PageInfo, LedgerError> {
        self.ctx.check()?;
        let pagination = filter.pagination.normalize(&self.shared.config);
        let count = self.filtered_mutations(filter).len() as u64;
        Ok(PageInfo::new(pagination, count))
    }

    fn add_mutation(&mut self, mutation: NewStockMutation) -> Result<StockMutation, LedgerError> {
        self.ctx.check()?;
        if mutation.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if mutation.source_id == mutation.target_id {
            return Err(LedgerError::SameStock);
        }
        let source = self.live_stock(mutation.source_id)?;
        let target = self.live_stock(mutation.target_id)?;
        if source.product_id != target.product_id {
            return Err(LedgerError::ProductMismatch);
        }

        let row = StockMutation {
            id: MutationId(self.shared.next_mutation.fetch_add(1, Ordering::Relaxed)),
            source_id: mutation.source_id,
            target_id: mutation.target_id,
            method: mutation.method,
            status: MutationStatus::Pending,
            amount: mutation.amount,
            timestamp: Utc::now(),
            deleted_at: None,
        };
        self.mutations.insert(row.id, row.clone());
        Ok(row)
    }

    fn update_mutation(&mut self, mutation: &StockMutation) -> Result<StockMutation, LedgerError> {
        self.lock(RowKey::Mutation(mutation.id))?;
        let mut row = self.live_mutation(mutation.id)?;
        row.status = row.status.transition(mutation.status)?;
        self.mutations.insert(row.id, row.clone());
        Ok(row)
    }

    fn soft_delete_mutation_by_id(&mut self, id: MutationId) -> Result<(), LedgerError> {
        self.lock(RowKey::Mutation(id))?;
        let mut row = self.live_mutation(id)?;
        row.deleted_at = Some(Utc::now());
        self.mutations.insert(id, row);
        Ok(())
    }

    fn get_product_by_slug(&self, slug: &str) -> Result<Product, LedgerError> {
        self.ctx.check()?;
        self.shared
            .catalog
            .read()
            .products
            .values()
            .find(|product| product.slug == slug)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Product))
    }

    fn get_pharmacy(&self, id: PharmacyId) -> Result<Pharmacy, LedgerError> {
        self.ctx.check()?;
        self.shared
            .catalog
            .read()
            .pharmacies
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound(Entity::Pharmacy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Pagination, SortOrder};
    use crate::stock::{MutationMethod, MutationStatus};
    use std::time::Duration;

    fn seeded() -> Database {
        let db = Database::new();
        for (id, name, slug) in [(1, "Aspirin", "aspirin"), (2, "Betadine", "betadine")] {
            db.register_product(Product {
                id: ProductId(id),
                name: name.into(),
                slug: slug.into(),
            });
        }
        for (id, name) in [(1, "North"), (2, "South"), (3, "East")] {
            db.register_pharmacy(Pharmacy {
                id: PharmacyId(id),
                name: name.into(),
                manager: None,
            });
        }
        db
    }

    fn new_stock(pharmacy: u64, product: u64, quantity: u64, price: u64) -> NewStock {
        NewStock {
            product_id: ProductId(product),
            pharmacy_id: PharmacyId(pharmacy),
            quantity,
            price,
        }
    }

    fn add_committed(db: &Database, stock: NewStock) -> Stock {
        let mut tx = db.begin(&Context::background()).unwrap();
        let row = tx.add(stock).unwrap();
        tx.commit().unwrap();
        row
    }

    #[test]
    fn uncommitted_writes_are_private() {
        let db = seeded();
        let ctx = Context::background();
        let mut writer = db.begin(&ctx).unwrap();
        let row = writer.add(new_stock(1, 1, 10, 100)).unwrap();
        assert_eq!(writer.get_by_id(row.id).unwrap().quantity, 10);

        let reader = db.begin(&ctx).unwrap();
        assert_eq!(
            reader.get_by_id(row.id),
            Err(LedgerError::NotFound(Entity::Stock))
        );

        writer.commit().unwrap();
        assert_eq!(reader.get_by_id(row.id).unwrap().quantity, 10);
    }

    #[test]
    fn rollback_discards_writes() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        tx.update(&Stock {
            quantity: 3,
            ..stock.clone()
        })
        .unwrap();
        tx.rollback();

        let tx = db.begin(&Context::background()).unwrap();
        assert_eq!(tx.get_by_id(stock.id).unwrap().quantity, 10);
    }

    #[test]
    fn dropping_transaction_releases_locks() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));
        {
            let mut tx = db.begin(&Context::background()).unwrap();
            tx.get_by_id_and_lock(stock.id).unwrap();
        }
        let ctx = Context::background().with_timeout(Duration::from_millis(200));
        let mut tx = db.begin(&ctx).unwrap();
        assert!(tx.get_by_id_and_lock(stock.id).is_ok());
    }

    #[test]
    fn locked_row_blocks_other_writers_until_deadline() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));

        let mut holder = db.begin(&Context::background()).unwrap();
        holder.get_by_id_and_lock(stock.id).unwrap();

        let ctx = Context::background().with_timeout(Duration::from_millis(30));
        let mut other = db.begin(&ctx).unwrap();
        assert_eq!(other.update(&stock), Err(LedgerError::DeadlineExceeded));
    }

    #[test]
    fn update_of_missing_row_is_not_found() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));
        let mut tx = db.begin(&Context::background()).unwrap();
        let missing = Stock {
            id: StockId(999),
            ..stock
        };
        assert_eq!(tx.update(&missing), Err(LedgerError::NotFound(Entity::Stock)));
    }

    #[test]
    fn soft_deleted_rows_disappear_from_reads() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        tx.soft_delete_by_id(stock.id).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin(&Context::background()).unwrap();
        assert_eq!(tx.get_by_id(stock.id), Err(LedgerError::NotFound(Entity::Stock)));
        assert_eq!(
            tx.get_by_pharmacy_and_product(PharmacyId(1), ProductId(1)),
            Err(LedgerError::NotFound(Entity::Stock))
        );
        assert_eq!(tx.update(&stock), Err(LedgerError::NotFound(Entity::Stock)));
        assert_eq!(
            tx.soft_delete_by_id(stock.id),
            Err(LedgerError::NotFound(Entity::Stock))
        );
        // The slot is free again.
        assert!(tx.add(new_stock(1, 1, 1, 1)).is_ok());
    }

    #[test]
    fn add_rejects_duplicate_pair_and_unknown_catalog_entries() {
        let db = seeded();
        add_committed(&db, new_stock(1, 1, 10, 100));
        let mut tx = db.begin(&Context::background()).unwrap();
        assert_eq!(
            tx.add(new_stock(1, 1, 5, 100)),
            Err(LedgerError::StockAlreadyExists)
        );
        assert_eq!(
            tx.add(new_stock(1, 99, 5, 100)),
            Err(LedgerError::NotFound(Entity::Product))
        );
        assert_eq!(
            tx.add(new_stock(99, 1, 5, 100)),
            Err(LedgerError::NotFound(Entity::Pharmacy))
        );
    }

    #[test]
    fn add_mutation_enforces_invariants() {
        let db = seeded();
        let a = add_committed(&db, new_stock(1, 1, 10, 100));
        let b = add_committed(&db, new_stock(2, 1, 5, 100));
        let other_product = add_committed(&db, new_stock(2, 2, 5, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        let mutation = |source: StockId, target: StockId, amount: u64| NewStockMutation {
            source_id: source,
            target_id: target,
            method: MutationMethod::Manual,
            amount,
        };
        assert_eq!(
            tx.add_mutation(mutation(a.id, a.id, 1)),
            Err(LedgerError::SameStock)
        );
        assert_eq!(
            tx.add_mutation(mutation(a.id, b.id, 0)),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            tx.add_mutation(mutation(a.id, other_product.id, 1)),
            Err(LedgerError::ProductMismatch)
        );
        assert_eq!(
            tx.add_mutation(mutation(a.id, StockId(999), 1)),
            Err(LedgerError::NotFound(Entity::Stock))
        );

        let created = tx.add_mutation(mutation(a.id, b.id, 4)).unwrap();
        assert_eq!(created.status, MutationStatus::Pending);
        assert_eq!(created.amount, 4);
    }

    #[test]
    fn update_mutation_is_status_only_and_monotonic() {
        let db = seeded();
        let a = add_committed(&db, new_stock(1, 1, 10, 100));
        let b = add_committed(&db, new_stock(2, 1, 5, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        let created = tx
            .add_mutation(NewStockMutation {
                source_id: a.id,
                target_id: b.id,
                method: MutationMethod::Manual,
                amount: 3,
            })
            .unwrap();

        let approved = tx
            .update_mutation(&StockMutation {
                status: MutationStatus::Approved,
                amount: 1_000,
                ..created.clone()
            })
            .unwrap();
        assert_eq!(approved.status, MutationStatus::Approved);
        assert_eq!(approved.amount, 3);

        assert_eq!(
            tx.update_mutation(&StockMutation {
                status: MutationStatus::Cancelled,
                ..created
            }),
            Err(LedgerError::NotPending)
        );
    }

    #[test]
    fn commit_with_canceled_context_publishes_nothing() {
        let db = seeded();
        let ctx = Context::background();
        let mut tx = db.begin(&ctx).unwrap();
        let row = tx.add(new_stock(1, 1, 10, 100)).unwrap();
        ctx.cancel_handle().cancel();
        assert_eq!(tx.commit(), Err(LedgerError::Canceled));

        let tx = db.begin(&Context::background()).unwrap();
        assert_eq!(tx.get_by_id(row.id), Err(LedgerError::NotFound(Entity::Stock)));
    }

    #[test]
    fn canceled_context_cannot_begin() {
        let db = seeded();
        let ctx = Context::background();
        ctx.cancel_handle().cancel();
        assert!(matches!(db.begin(&ctx), Err(LedgerError::Canceled)));
    }

    #[test]
    fn list_sorts_with_identity_tie_break_and_paginates() {
        let db = seeded();
        let s1 = add_committed(&db, new_stock(1, 1, 10, 500));
        let s2 = add_committed(&db, new_stock(2, 1, 10, 300));
        let s3 = add_committed(&db, new_stock(3, 1, 10, 500));
        let s4 = add_committed(&db, new_stock(1, 2, 1, 100));

        let tx = db.begin(&Context::background()).unwrap();
        let mut filter = StockFilter {
            sort_by: StockSortBy::Price,
            order: SortOrder::Desc,
            ..StockFilter::default()
        };
        let ids: Vec<StockId> = tx.list(&filter).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![s1.id, s3.id, s2.id, s4.id]);

        filter.pagination = Pagination::new(2, 2);
        let ids: Vec<StockId> = tx.list(&filter).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![s2.id, s4.id]);

        let info = tx.get_page_info(&filter).unwrap();
        assert_eq!(info.item_count, 4);
        assert_eq!(info.page_count, 2);

        let by_pharmacy = StockFilter {
            sort_by: StockSortBy::PharmacyName,
            ..StockFilter::default()
        };
        let ids: Vec<StockId> = tx.list(&by_pharmacy).unwrap().iter().map(|s| s.id).collect();
        // East, North, North, South
        assert_eq!(ids, vec![s3.id, s1.id, s4.id, s2.id]);
    }

    #[test]
    fn list_filters_by_search_and_pharmacy() {
        let db = seeded();
        let aspirin_north = add_committed(&db, new_stock(1, 1, 10, 500));
        add_committed(&db, new_stock(2, 1, 10, 300));
        add_committed(&db, new_stock(1, 2, 1, 100));

        let tx = db.begin(&Context::background()).unwrap();
        let filter = StockFilter {
            search: Some("aspi".into()),
            pharmacy_id: Some(PharmacyId(1)),
            ..StockFilter::default()
        };
        assert_eq!(tx.list(&filter).unwrap(), vec![aspirin_north]);
    }

    #[test]
    fn mutation_listing_filters_through_stocks() {
        let db = seeded();
        let a = add_committed(&db, new_stock(1, 1, 10, 100));
        let b = add_committed(&db, new_stock(2, 1, 5, 100));
        let c = add_committed(&db, new_stock(3, 1, 5, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        let first = tx
            .add_mutation(NewStockMutation {
                source_id: a.id,
                target_id: b.id,
                method: MutationMethod::Manual,
                amount: 2,
            })
            .unwrap();
        let second = tx
            .add_mutation(NewStockMutation {
                source_id: c.id,
                target_id: b.id,
                method: MutationMethod::Automatic,
                amount: 1,
            })
            .unwrap();
        tx.commit().unwrap();

        let tx = db.begin(&Context::background()).unwrap();
        let into_south = MutationFilter {
            target_pharmacy_id: Some(PharmacyId(2)),
            sort_by: MutationSortBy::Amount,
            ..MutationFilter::default()
        };
        let ids: Vec<MutationId> = tx
            .list_mutations(&into_south)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let manual_from_north = MutationFilter {
            source_pharmacy_id: Some(PharmacyId(1)),
            method: Some(MutationMethod::Manual),
            ..MutationFilter::default()
        };
        assert_eq!(tx.list_mutations(&manual_from_north).unwrap(), vec![first]);
        assert_eq!(tx.get_mutation_page_info(&into_south).unwrap().item_count, 2);
    }

    #[test]
    fn list_sorts_by_product_name() {
        let db = seeded();
        let betadine = add_committed(&db, new_stock(1, 2, 4, 100));
        let aspirin_south = add_committed(&db, new_stock(2, 1, 6, 100));
        let aspirin_north = add_committed(&db, new_stock(1, 1, 8, 100));

        let tx = db.begin(&Context::background()).unwrap();
        let mut filter = StockFilter {
            sort_by: StockSortBy::ProductName,
            ..StockFilter::default()
        };
        let ids: Vec<StockId> = tx.list(&filter).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![aspirin_south.id, aspirin_north.id, betadine.id]);

        filter.order = SortOrder::Desc;
        let ids: Vec<StockId> = tx.list(&filter).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![betadine.id, aspirin_south.id, aspirin_north.id]);
    }

    #[test]
    fn mutation_listing_sorts_by_timestamp() {
        let db = seeded();
        let a = add_committed(&db, new_stock(1, 1, 10, 100));
        let b = add_committed(&db, new_stock(2, 1, 5, 100));

        let mut tx = db.begin(&Context::background()).unwrap();
        let ids: Vec<MutationId> = (1..=3)
            .map(|amount| {
                tx.add_mutation(NewStockMutation {
                    source_id: a.id,
                    target_id: b.id,
                    method: MutationMethod::Manual,
                    amount,
                })
                .unwrap()
                .id
            })
            .collect();
        tx.commit().unwrap();

        // Oldest row gets the latest timestamp.
        let base = Utc::now();
        {
            let mut tables = db.shared.tables.write();
            for (offset, id) in ids.iter().enumerate() {
                let row = tables.mutations.get_mut(id).unwrap();
                row.timestamp = base - chrono::Duration::seconds(offset as i64);
            }
        }

        let tx = db.begin(&Context::background()).unwrap();
        let mut filter = MutationFilter::default();
        let listed: Vec<MutationId> = tx
            .list_mutations(&filter)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

        filter.order = SortOrder::Desc;
        let listed: Vec<MutationId> = tx
            .list_mutations(&filter)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn deleted_stock_stays_reachable_for_history() {
        let db = seeded();
        let stock = add_committed(&db, new_stock(1, 1, 10, 100));
        let mut tx = db.begin(&Context::background()).unwrap();
        tx.soft_delete_by_id(stock.id).unwrap();
        tx.commit().unwrap();

        let tx = db.begin(&Context::background()).unwrap();
        assert_eq!(
            tx.get_by_id(stock.id),
            Err(LedgerError::NotFound(Entity::Stock))
        );
        let row = tx.get_by_id_including_deleted(stock.id).unwrap();
        assert_eq!(row.pharmacy_id, PharmacyId(1));
        assert!(row.is_deleted());
        assert_eq!(
            tx.get_by_id_including_deleted(StockId(99)),
            Err(LedgerError::NotFound(Entity::Stock))
        );
    }

    #[test]
    fn lock_entries_for_missing_rows_do_not_accumulate() {
        let db = seeded();
        for id in 1000..1100 {
            let mut tx = db.begin(&Context::background()).unwrap();
            assert_eq!(
                tx.get_mutation_by_id_and_lock(MutationId(id)),
                Err(LedgerError::NotFound(Entity::StockMutation))
            );
            tx.rollback();
        }
        add_committed(&db, new_stock(1, 1, 10, 100));
        assert_eq!(db.shared.locks.len(), 0);
    }

    #[test]
    fn catalog_lookups() {
        let db = seeded();
        let tx = db.begin(&Context::background()).unwrap();
        assert_eq!(tx.get_product_by_slug("betadine").unwrap().id, ProductId(2));
        assert_eq!(
            tx.get_product_by_slug("missing"),
            Err(LedgerError::NotFound(Entity::Product))
        );
        assert_eq!(tx.get_pharmacy(PharmacyId(3)).unwrap().name, "East");
        assert_eq!(
            tx.get_pharmacy(PharmacyId(9)),
            Err(LedgerError::NotFound(Entity::Pharmacy))
        );
    }
}
