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

//! # Stock Ledger
//!
//! This library provides a transactional stock-transfer engine for pharmacy
//! inventories: per-(product, pharmacy) stock rows, and stock mutations that
//! move quantity between two pharmacies through a request/approve/cancel
//! workflow.
//!
//! ## Core Components
//!
//! - [`Database`]: Embedded store with transactions and exclusive row locks
//! - [`UnitOfWork`]: Runs a body of repository calls atomically
//! - [`StockRepository`]: Transaction-scoped reads and writes of stocks and mutations
//! - [`StockService`]: The transfer workflow and stock maintenance operations
//! - [`LedgerError`]: Error types for ledger failures
//!
//! ## Example
//!
//! ```
//! use stock_ledger::{
//!     Actor, Context, Database, MutationStatus, NewStock, Pharmacy, PharmacyId, Product,
//!     ProductId, StockService, TransferRequest,
//! };
//!
//! let db = Database::new();
//! db.register_product(Product { id: ProductId(1), name: "Aspirin".into(), slug: "aspirin".into() });
//! for id in [1, 2] {
//!     db.register_pharmacy(Pharmacy { id: PharmacyId(id), name: format!("Pharmacy {id}"), manager: None });
//! }
//!
//! let service = StockService::new(db);
//! let ctx = Context::background();
//! let stock = |pharmacy, quantity| NewStock {
//!     product_id: ProductId(1),
//!     pharmacy_id: PharmacyId(pharmacy),
//!     quantity,
//!     price: 1_000,
//! };
//! let source = service.add(&ctx, Actor::Admin, stock(1, 10)).unwrap();
//! let target = service.add(&ctx, Actor::Admin, stock(2, 5)).unwrap();
//!
//! let request = TransferRequest {
//!     source_pharmacy_id: PharmacyId(1),
//!     target_pharmacy_id: PharmacyId(2),
//!     product_id: ProductId(1),
//!     amount: 10,
//! };
//! let mutation = service.request_stock_transfer(&ctx, Actor::Admin, request).unwrap();
//! assert_eq!(mutation.status, MutationStatus::Pending);
//!
//! let mutation = service.approve_stock_transfer(&ctx, Actor::Admin, mutation.id).unwrap();
//! assert_eq!(mutation.status, MutationStatus::Approved);
//! assert_eq!(service.get_by_id(&ctx, source.id).unwrap().quantity, 0);
//! assert_eq!(service.get_by_id(&ctx, target.id).unwrap().quantity, 15);
//! ```
//!
//! ## Concurrency
//!
//! Correctness under contention comes from pessimistic row locks held for
//! the lifetime of a transaction. Transfers lock both stock rows in
//! ascending identity order (see [`lock_stocks_in_order`]), which keeps
//! opposite-direction transfers between the same pharmacies deadlock free.

mod base;
pub mod catalog;
pub mod config;
mod context;
mod db;
pub mod error;
pub mod filter;
mod locks;
mod repository;
mod service;
mod stock;
mod unit_of_work;

pub use base::{ManagerId, MutationId, PharmacyId, ProductId, StockId};
pub use catalog::{Actor, Pharmacy, Product};
pub use config::LedgerConfig;
pub use context::{CancelHandle, Context};
pub use db::{Database, Transaction};
pub use error::{Entity, ErrorKind, LedgerError};
pub use filter::{
    MutationFilter, MutationSortBy, PageInfo, Pagination, SortOrder, StockFilter, StockSortBy,
};
pub use repository::StockRepository;
pub use service::{
    Page, StockService, StockUpdate, TransferRequest, lock_stocks_in_order, move_quantity,
};
pub use stock::{
    MutationMethod, MutationStatus, NewStock, NewStockMutation, Stock, StockMutation,
};
pub use unit_of_work::{AtomicBody, UnitOfWork};
