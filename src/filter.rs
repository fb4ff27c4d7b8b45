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

//! Listing filters, sort keys, and pagination.
//!
//! Every listing sorts by the requested key first and by row identity
//! second, so page boundaries are reproducible even when rows share a key
//! or new rows are inserted between page fetches.

use crate::base::{PharmacyId, ProductId};
use crate::catalog::Product;
use crate::config::LedgerConfig;
use crate::stock::{MutationMethod, MutationStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Orients a primary-key comparison. The identity tie-break is applied
    /// separately and always ascends.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockSortBy {
    #[default]
    ProductName,
    PharmacyName,
    Price,
    Amount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationSortBy {
    #[default]
    Timestamp,
    Amount,
}

/// One-based page number and page size. A limit of zero means "use the
/// configured default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 0 }
    }
}

impl Pagination {
    /// Creates a pagination for one-based `page` with `limit` rows per page.
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    /// Clamps the page to at least 1 and the limit to the configured range.
    pub fn normalize(self, config: &LedgerConfig) -> Self {
        let limit = match self.limit {
            0 => config.default_page_limit,
            limit => limit.min(config.max_page_limit),
        };
        Self {
            page: self.page.max(1),
            limit: limit.max(1),
        }
    }

    fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.limit as usize)
    }

    /// Cuts one page out of an already sorted result set.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset())
            .take(self.limit as usize)
            .collect()
    }
}

/// Page position and totals for a filtered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub item_count: u64,
    pub page_count: u64,
}

impl PageInfo {
    /// `pagination` must already be normalized.
    pub fn new(pagination: Pagination, item_count: u64) -> Self {
        let limit = u64::from(pagination.limit.max(1));
        Self {
            page: pagination.page,
            limit: pagination.limit,
            item_count,
            page_count: item_count.div_ceil(limit),
        }
    }
}

/// Criteria for listing stocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    /// Case-insensitive substring of the product name or slug.
    pub search: Option<String>,
    pub product_id: Option<ProductId>,
    pub pharmacy_id: Option<PharmacyId>,
    pub sort_by: StockSortBy,
    pub order: SortOrder,
    pub pagination: Pagination,
}

impl StockFilter {
    pub fn matches_product(&self, product: &Product) -> bool {
        match &self.search {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                product.name.to_lowercase().contains(&term)
                    || product.slug.to_lowercase().contains(&term)
            }
        }
    }
}

/// Criteria for listing stock mutations. Product and pharmacy criteria
/// match through the mutation's source and target stocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationFilter {
    pub product_id: Option<ProductId>,
    pub source_pharmacy_id: Option<PharmacyId>,
    pub target_pharmacy_id: Option<PharmacyId>,
    pub method: Option<MutationMethod>,
    pub status: Option<MutationStatus>,
    pub sort_by: MutationSortBy,
    pub order: SortOrder,
    pub pagination: Pagination,
}
