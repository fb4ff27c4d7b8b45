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

//! Stock rows and stock mutations.
//!
//! A [`Stock`] is the quantity and unit price of one product at one pharmacy.
//! A [`StockMutation`] records a requested quantity movement between two
//! stocks of the same product and follows a one-shot state machine:
//!
//! ```text
//!  Pending ──approve──► Approved   (quantity moved)
//!     │
//!     └─────cancel────► Cancelled  (nothing moved)
//! ```
//!
//! Both terminal states are final; only `Pending` may transition.

use crate::LedgerError;
use crate::base::{MutationId, PharmacyId, ProductId, StockId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Quantity and unit price of one product at one pharmacy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub id: StockId,
    pub product_id: ProductId,
    pub pharmacy_id: PharmacyId,
    pub quantity: u64,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Stock {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Decreases quantity, refusing to go below zero.
    pub fn withdraw(&mut self, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.quantity = self
            .quantity
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientStock)?;
        Ok(())
    }

    /// Increases quantity.
    pub fn deposit(&mut self, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.quantity = self
            .quantity
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Internal(format!("quantity overflow on stock {}", self.id)))?;
        Ok(())
    }
}

/// Fields for a stock row that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStock {
    pub product_id: ProductId,
    pub pharmacy_id: PharmacyId,
    pub quantity: u64,
    pub price: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationMethod {
    /// Issued by the system without a human approval step.
    Automatic,
    /// Requested by a pharmacy manager and approved or cancelled later.
    Manual,
}

/// Lifecycle of a mutation. Only `Pending` may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    Pending,
    Approved,
    Cancelled,
}

impl MutationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MutationStatus::Pending)
    }

    /// Validates a status change; anything leaving a terminal status is
    /// rejected with [`LedgerError::NotPending`].
    pub fn transition(self, next: MutationStatus) -> Result<MutationStatus, LedgerError> {
        if self.is_terminal() {
            return Err(LedgerError::NotPending);
        }
        Ok(next)
    }
}

impl fmt::Display for MutationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationMethod::Automatic => f.write_str("automatic"),
            MutationMethod::Manual => f.write_str("manual"),
        }
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationStatus::Pending => f.write_str("pending"),
            MutationStatus::Approved => f.write_str("approved"),
            MutationStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A recorded transfer of `amount` from the source stock to the target stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMutation {
    pub id: MutationId,
    pub source_id: StockId,
    pub target_id: StockId,
    pub method: MutationMethod,
    pub status: MutationStatus,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StockMutation {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields for a mutation record that does not exist yet. New records always
/// start out [`MutationStatus::Pending`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockMutation {
    pub source_id: StockId,
    pub target_id: StockId,
    pub method: MutationMethod,
    pub amount: u64,
}
