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

//! Stock transfer service.
//!
//! The [`StockService`] is the entry point for callers. Every operation runs
//! as one unit of work: authorization, reads, the state change, and any
//! quantity movement all commit together or not at all.
//!
//! # Transfer Workflow
//!
//! - **Request**: records a [`Pending`] manual mutation between the source
//!   and target pharmacy's stock of one product. Nothing moves and no stock
//!   row is locked, so a request may wait for approval indefinitely.
//! - **Approve**: locks the mutation, marks it [`Approved`], and moves the
//!   quantity. A failed movement undoes the approval.
//! - **Cancel**: locks the mutation and marks it [`Cancelled`].
//!
//! Approving or cancelling a mutation that is no longer pending fails with
//! [`LedgerError::NotPending`], so exactly one of two racing resolutions wins.
//!
//! [`Pending`]: MutationStatus::Pending
//! [`Approved`]: MutationStatus::Approved
//! [`Cancelled`]: MutationStatus::Cancelled

use crate::base::{MutationId, PharmacyId, ProductId, StockId};
use crate::catalog::{Actor, Product};
use crate::filter::{MutationFilter, PageInfo, StockFilter};
use crate::repository::StockRepository;
use crate::stock::{
    MutationMethod, MutationStatus, NewStock, NewStockMutation, Stock, StockMutation,
};
use crate::unit_of_work::UnitOfWork;
use crate::{Context, LedgerError};
use serde::{Deserialize, Serialize};

/// A request to move `amount` of one product between two pharmacies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_pharmacy_id: PharmacyId,
    pub target_pharmacy_id: PharmacyId,
    pub product_id: ProductId,
    pub amount: u64,
}

/// Fields to change on a stock row; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub quantity: Option<u64>,
    pub price: Option<u64>,
}

/// One page of a listing together with its page info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

/// Stock and transfer operations over a [`UnitOfWork`].
///
/// Each method opens its own unit of work; the service holds no state of
/// its own beyond the executor.
pub struct StockService<U> {
    uow: U,
}

impl<U: UnitOfWork> StockService<U> {
    /// Creates a service that runs every operation through `uow`.
    pub fn new(uow: U) -> Self {
        Self { uow }
    }

    /// Executor backing this service, for callers composing their own
    /// atomic work.
    pub fn unit_of_work(&self) -> &U {
        &self.uow
    }

    #[tracing::instrument(skip(self, ctx), fields(stock_id = %id), err(level = "debug"))]
    pub fn get_by_id(&self, ctx: &Context, id: StockId) -> Result<Stock, LedgerError> {
        self.uow.atomic(ctx, |repo| repo.get_by_id(id))
    }

    /// Lists one page of stocks; items and page info come from the same
    /// transaction.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn list(&self, ctx: &Context, filter: &StockFilter) -> Result<Page<Stock>, LedgerError> {
        self.uow.atomic(ctx, |repo| {
            Ok(Page {
                items: repo.list(filter)?,
                page_info: repo.get_page_info(filter)?,
            })
        })
    }

    /// Adds the first stock row for a (pharmacy, product) pair.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn add(&self, ctx: &Context, actor: Actor, stock: NewStock) -> Result<Stock, LedgerError> {
        self.uow.atomic(ctx, |repo| {
            actor.ensure_manages(&repo.get_pharmacy(stock.pharmacy_id)?)?;
            repo.add(stock)
        })
    }

    /// Changes quantity and/or price of a live stock row under its lock.
    #[tracing::instrument(skip(self, ctx), fields(stock_id = %id), err(level = "debug"))]
    pub fn update(
        &self,
        ctx: &Context,
        actor: Actor,
        id: StockId,
        update: StockUpdate,
    ) -> Result<Stock, LedgerError> {
        self.uow.atomic(ctx, |repo| {
            let mut stock = repo.get_by_id_and_lock(id)?;
            actor.ensure_manages(&repo.get_pharmacy(stock.pharmacy_id)?)?;
            if let Some(quantity) = update.quantity {
                stock.quantity = quantity;
            }
            if let Some(price) = update.price {
                stock.price = price;
            }
            repo.update(&stock)
        })
    }

    /// Soft-deletes a stock row. Mutations referring to it are kept.
    #[tracing::instrument(skip(self, ctx), fields(stock_id = %id), err(level = "debug"))]
    pub fn delete_by_id(&self, ctx: &Context, actor: Actor, id: StockId) -> Result<(), LedgerError> {
        self.uow.atomic(ctx, |repo| {
            let stock = repo.get_by_id_and_lock(id)?;
            actor.ensure_manages(&repo.get_pharmacy(stock.pharmacy_id)?)?;
            repo.soft_delete_by_id(id)
        })
    }

    /// Resolves a product slug to the catalog product it names.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn resolve_product(&self, ctx: &Context, slug: &str) -> Result<Product, LedgerError> {
        self.uow.atomic(ctx, |repo| repo.get_product_by_slug(slug))
    }

    #[tracing::instrument(skip(self, ctx), fields(mutation_id = %id), err(level = "debug"))]
    pub fn get_mutation_by_id(
        &self,
        ctx: &Context,
        id: MutationId,
    ) -> Result<StockMutation, LedgerError> {
        self.uow.atomic(ctx, |repo| repo.get_mutation_by_id(id))
    }

    /// Lists one page of mutations together with its page info.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn list_mutations(
        &self,
        ctx: &Context,
        filter: &MutationFilter,
    ) -> Result<Page<StockMutation>, LedgerError> {
        self.uow.atomic(ctx, |repo| {
            Ok(Page {
                items: repo.list_mutations(filter)?,
                page_info: repo.get_mutation_page_info(filter)?,
            })
        })
    }

    /// Records a pending manual transfer. The actor must manage the target
    /// pharmacy, which is the one asking for stock.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn request_stock_transfer(
        &self,
        ctx: &Context,
        actor: Actor,
        request: TransferRequest,
    ) -> Result<StockMutation, LedgerError> {
        validate_request(&request)?;
        let mutation = self.uow.atomic(ctx, |repo| {
            actor.ensure_manages(&repo.get_pharmacy(request.target_pharmacy_id)?)?;
            let (source, target) = resolve_stocks(repo, &request)?;
            repo.add_mutation(NewStockMutation {
                source_id: source.id,
                target_id: target.id,
                method: MutationMethod::Manual,
                amount: request.amount,
            })
        })?;
        tracing::info!(mutation_id = %mutation.id, "stock transfer requested");
        Ok(mutation)
    }

    /// Approves a pending transfer and moves its quantity. The actor must
    /// manage the source pharmacy, which gives the stock up.
    #[tracing::instrument(skip(self, ctx), fields(mutation_id = %id), err(level = "debug"))]
    pub fn approve_stock_transfer(
        &self,
        ctx: &Context,
        actor: Actor,
        id: MutationId,
    ) -> Result<StockMutation, LedgerError> {
        let mutation = self.uow.atomic(ctx, |repo| {
            let mut mutation = lock_pending(repo, id)?;
            let source = repo.get_by_id(mutation.source_id)?;
            actor.ensure_manages(&repo.get_pharmacy(source.pharmacy_id)?)?;

            mutation.status = MutationStatus::Approved;
            let mutation = repo.update_mutation(&mutation)?;
            move_quantity(repo, mutation.source_id, mutation.target_id, mutation.amount)?;
            Ok(mutation)
        })?;
        tracing::info!(amount = mutation.amount, "stock transfer approved");
        Ok(mutation)
    }

    /// Cancels a pending transfer. Managers of either side may cancel.
    #[tracing::instrument(skip(self, ctx), fields(mutation_id = %id), err(level = "debug"))]
    pub fn cancel_stock_transfer(
        &self,
        ctx: &Context,
        actor: Actor,
        id: MutationId,
    ) -> Result<StockMutation, LedgerError> {
        let mutation = self.uow.atomic(ctx, |repo| {
            let mut mutation = lock_pending(repo, id)?;
            // Either stock may have been deleted since the request was made.
            let source = repo.get_by_id_including_deleted(mutation.source_id)?;
            let target = repo.get_by_id_including_deleted(mutation.target_id)?;
            if !actor.manages(&repo.get_pharmacy(source.pharmacy_id)?) {
                actor.ensure_manages(&repo.get_pharmacy(target.pharmacy_id)?)?;
            }

            mutation.status = MutationStatus::Cancelled;
            repo.update_mutation(&mutation)
        })?;
        tracing::info!("stock transfer cancelled");
        Ok(mutation)
    }

    /// Records and applies a system-issued transfer in one step. The
    /// mutation is created pending and approved within the same
    /// transaction, so it is only ever observed approved.
    #[tracing::instrument(skip(self, ctx), err(level = "debug"))]
    pub fn auto_transfer(
        &self,
        ctx: &Context,
        request: TransferRequest,
    ) -> Result<StockMutation, LedgerError> {
        validate_request(&request)?;
        self.uow.atomic(ctx, |repo| {
            let (source, target) = resolve_stocks(repo, &request)?;
            let mut mutation = repo.add_mutation(NewStockMutation {
                source_id: source.id,
                target_id: target.id,
                method: MutationMethod::Automatic,
                amount: request.amount,
            })?;
            mutation.status = MutationStatus::Approved;
            let mutation = repo.update_mutation(&mutation)?;
            move_quantity(repo, source.id, target.id, request.amount)?;
            Ok(mutation)
        })
    }

    /// Soft-deletes a mutation record. Only admins may remove history.
    #[tracing::instrument(skip(self, ctx), fields(mutation_id = %id), err(level = "debug"))]
    pub fn delete_mutation_by_id(
        &self,
        ctx: &Context,
        actor: Actor,
        id: MutationId,
    ) -> Result<(), LedgerError> {
        if actor != Actor::Admin {
            return Err(LedgerError::Forbidden);
        }
        self.uow.atomic(ctx, |repo| repo.soft_delete_mutation_by_id(id))
    }
}

fn validate_request(request: &TransferRequest) -> Result<(), LedgerError> {
    if request.amount == 0 {
        return Err(LedgerError::InvalidAmount);
    }
    if request.source_pharmacy_id == request.target_pharmacy_id {
        return Err(LedgerError::SameStock);
    }
    Ok(())
}

/// Unlocked lookup of both ends of a transfer.
fn resolve_stocks(
    repo: &mut dyn StockRepository,
    request: &TransferRequest,
) -> Result<(Stock, Stock), LedgerError> {
    let source = repo.get_by_pharmacy_and_product(request.source_pharmacy_id, request.product_id)?;
    let target = repo.get_by_pharmacy_and_product(request.target_pharmacy_id, request.product_id)?;
    Ok((source, target))
}

fn lock_pending(
    repo: &mut dyn StockRepository,
    id: MutationId,
) -> Result<StockMutation, LedgerError> {
    let mutation = repo.get_mutation_by_id_and_lock(id)?;
    if mutation.status != MutationStatus::Pending {
        tracing::debug!(status = %mutation.status, "mutation already resolved");
        return Err(LedgerError::NotPending);
    }
    Ok(mutation)
}

/// Locks two stock rows in ascending [`StockId`] order and returns them in
/// argument order.
///
/// Every code path that holds two stock locks at once must go through here.
/// Two transfers running in opposite directions between the same pair of
/// stocks then both lock the lower id first, so neither can hold one row
/// while waiting on the other.
pub fn lock_stocks_in_order(
    repo: &mut dyn StockRepository,
    first: StockId,
    second: StockId,
) -> Result<(Stock, Stock), LedgerError> {
    if first == second {
        return Err(LedgerError::SameStock);
    }
    let (low, high) = if first < second {
        (first, second)
    } else {
        (second, first)
    };
    let low_row = repo.get_by_id_and_lock(low)?;
    let high_row = repo.get_by_id_and_lock(high)?;
    if first < second {
        Ok((low_row, high_row))
    } else {
        Ok((high_row, low_row))
    }
}

/// Moves `amount` from `source_id` to `target_id`, failing with
/// [`LedgerError::InsufficientStock`] before either row is written.
pub fn move_quantity(
    repo: &mut dyn StockRepository,
    source_id: StockId,
    target_id: StockId,
    amount: u64,
) -> Result<(Stock, Stock), LedgerError> {
    let (mut source, mut target) = lock_stocks_in_order(repo, source_id, target_id)?;
    source.withdraw(amount)?;
    target.deposit(amount)?;
    let source = repo.update(&source)?;
    let target = repo.update(&target)?;
    Ok((source, target))
}
