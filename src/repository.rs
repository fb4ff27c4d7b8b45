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

//! The stock ledger repository surface.
//!
//! [`StockRepository`] is implemented by [`Transaction`](crate::Transaction),
//! so every call made through it participates in exactly one transaction.
//! The trait is object safe; unit-of-work bodies receive it as
//! `&mut dyn StockRepository`.
//!
//! # Errors
//!
//! - Reads of absent or soft-deleted rows fail with [`LedgerError::NotFound`].
//! - Writes that match no live row fail with [`LedgerError::NotFound`]
//!   rather than silently doing nothing.
//! - Every call fails with [`LedgerError::Canceled`] or
//!   [`LedgerError::DeadlineExceeded`] once the transaction's context is done.

use crate::LedgerError;
use crate::base::{MutationId, PharmacyId, ProductId, StockId};
use crate::catalog::{Pharmacy, Product};
use crate::filter::{MutationFilter, PageInfo, StockFilter};
use crate::stock::{NewStock, NewStockMutation, Stock, StockMutation};

/// Transaction-scoped access to stocks, stock mutations and the catalog.
/// Writes lock the row they touch until the transaction ends.
pub trait StockRepository {
    fn get_by_id(&self, id: StockId) -> Result<Stock, LedgerError>;

    /// Like [`get_by_id`](Self::get_by_id), but first takes an exclusive row
    /// lock held until the transaction ends.
    fn get_by_id_and_lock(&mut self, id: StockId) -> Result<Stock, LedgerError>;

    /// Fetches a stock row even if it has been soft-deleted, for callers that
    /// only need to know which pharmacy a historical reference belonged to.
    fn get_by_id_including_deleted(&self, id: StockId) -> Result<Stock, LedgerError>;

    fn get_by_pharmacy_and_product(
        &self,
        pharmacy_id: PharmacyId,
        product_id: ProductId,
    ) -> Result<Stock, LedgerError>;

    fn list(&self, filter: &StockFilter) -> Result<Vec<Stock>, LedgerError>;

    fn get_page_info(&self, filter: &StockFilter) -> Result<PageInfo, LedgerError>;

    /// Inserts a stock row. Fails with [`LedgerError::StockAlreadyExists`]
    /// when a live row exists for the same pharmacy and product.
    fn add(&mut self, stock: NewStock) -> Result<Stock, LedgerError>;

    /// Writes `stock.quantity` and `stock.price` to the row `stock.id`.
    fn update(&mut self, stock: &Stock) -> Result<Stock, LedgerError>;

    fn soft_delete_by_id(&mut self, id: StockId) -> Result<(), LedgerError>;

    fn get_mutation_by_id(&self, id: MutationId) -> Result<StockMutation, LedgerError>;

    fn get_mutation_by_id_and_lock(&mut self, id: MutationId)
    -> Result<StockMutation, LedgerError>;

    fn list_mutations(&self, filter: &MutationFilter) -> Result<Vec<StockMutation>, LedgerError>;

    fn get_mutation_page_info(&self, filter: &MutationFilter) -> Result<PageInfo, LedgerError>;

    /// Records a new pending mutation between two live stocks of the same
    /// product.
    fn add_mutation(&mut self, mutation: NewStockMutation) -> Result<StockMutation, LedgerError>;

    /// Writes `mutation.status` only; every other field is ignored.
    fn update_mutation(&mut self, mutation: &StockMutation) -> Result<StockMutation, LedgerError>;

    fn soft_delete_mutation_by_id(&mut self, id: MutationId) -> Result<(), LedgerError>;

    fn get_product_by_slug(&self, slug: &str) -> Result<Product, LedgerError>;

    fn get_pharmacy(&self, id: PharmacyId) -> Result<Pharmacy, LedgerError>;
}
