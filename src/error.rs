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

//! Error types for stock ledger operations.

use std::fmt;
use thiserror::Error;

/// Persisted entity kinds, used to name what was not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Stock,
    StockMutation,
    Product,
    Pharmacy,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Stock => "stock",
            Entity::StockMutation => "stock mutation",
            Entity::Product => "product",
            Entity::Pharmacy => "pharmacy",
        };
        f.write_str(name)
    }
}

/// Coarse error taxonomy callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Forbidden,
    Internal,
    Canceled,
}

/// Stock ledger errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Entity is absent or soft-deleted
    #[error("{0} not found")]
    NotFound(Entity),

    /// Amount is zero
    #[error("amount must be greater than zero")]
    InvalidAmount,

    /// Source and target of a transfer resolve to the same stock
    #[error("cannot transfer to the same stock")]
    SameStock,

    /// Source and target stocks hold different products
    #[error("source and target stock is not of the same product")]
    ProductMismatch,

    /// Source quantity is below the requested amount
    #[error("stock is not enough")]
    InsufficientStock,

    /// Mutation has already been approved or cancelled
    #[error("request is already processed (not pending)")]
    NotPending,

    /// A live stock row already exists for the pharmacy and product
    #[error("stock already exists for this pharmacy and product")]
    StockAlreadyExists,

    /// Acting principal does not manage the pharmacy involved
    #[error("actor does not manage this pharmacy")]
    Forbidden,

    /// Caller context was canceled
    #[error("operation canceled")]
    Canceled,

    /// Caller context deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Broken internal contract
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidAmount
            | Self::SameStock
            | Self::ProductMismatch
            | Self::InsufficientStock
            | Self::NotPending
            | Self::StockAlreadyExists => ErrorKind::BadRequest,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Canceled | Self::DeadlineExceeded => ErrorKind::Canceled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
