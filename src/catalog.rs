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

//! Read-only reference data owned by the surrounding system.
//!
//! Products and pharmacies are registered once and never changed by the
//! ledger. They back product-slug resolution, name sorting in listings, and
//! the pharmacy-manager authorization check.

use crate::LedgerError;
use crate::base::{ManagerId, PharmacyId, ProductId};
use serde::{Deserialize, Serialize};

/// A catalog product that stock rows refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
}

/// A pharmacy in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pharmacy {
    pub id: PharmacyId,
    pub name: String,
    /// Manager allowed to move this pharmacy's stock, if any.
    pub manager: Option<ManagerId>,
}

/// Principal on whose behalf a ledger operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Acts on every pharmacy.
    Admin,
    Manager(ManagerId),
}

impl Actor {
    pub fn manages(&self, pharmacy: &Pharmacy) -> bool {
        match self {
            Actor::Admin => true,
            Actor::Manager(id) => pharmacy.manager == Some(*id),
        }
    }

    pub fn ensure_manages(&self, pharmacy: &Pharmacy) -> Result<(), LedgerError> {
        if self.manages(pharmacy) {
            Ok(())
        } else {
            Err(LedgerError::Forbidden)
        }
    }
}
