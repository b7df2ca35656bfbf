// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::ledger::{PurchaseLogEntry, PurchaseStatus};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PurchaseQuery {
    /// Only entries with this status.
    pub status: Option<PurchaseStatus>,
    /// Only entries for this payer (case-insensitive).
    pub payer: Option<String>,
    /// Page size, default 50, max 500.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PurchaseListResponse {
    pub purchases: Vec<PurchaseLogEntry>,
    /// Matching entries before paging.
    pub total: usize,
}

/// List ledger entries, newest first.
#[utoipa::path(
    get,
    path = "/v1/purchases",
    tag = "Purchases",
    params(PurchaseQuery),
    responses(
        (status = 200, description = "Ledger entries", body = PurchaseListResponse)
    )
)]
pub async fn list_purchases(
    State(state): State<AppState>,
    Query(query): Query<PurchaseQuery>,
) -> Result<Json<PurchaseListResponse>, ApiError> {
    let matching: Vec<_> = state
        .pipeline
        .ledger()
        .read_all()?
        .into_iter()
        .filter(|entry| query.status.is_none_or(|status| entry.status == status))
        .filter(|entry| {
            query
                .payer
                .as_deref()
                .is_none_or(|payer| entry.payer.eq_ignore_ascii_case(payer))
        })
        .collect();

    let total = matching.len();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let purchases = matching
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(limit)
        .collect();

    Ok(Json(PurchaseListResponse { purchases, total }))
}

#[utoipa::path(
    get,
    path = "/v1/purchases/{id}",
    tag = "Purchases",
    params(("id" = String, Path, description = "Purchase id")),
    responses(
        (status = 200, description = "Ledger entry", body = PurchaseLogEntry),
        (status = 404, description = "Unknown purchase id")
    )
)]
pub async fn get_purchase(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseLogEntry>, ApiError> {
    state
        .pipeline
        .ledger()
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("purchase {id} not found")))
}
