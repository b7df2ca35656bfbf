// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! `POST /v1/settlements`: run one payment through the settlement pipeline.
//!
//! Every admitted or denied request carries `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset`; denials add `Retry-After`.

use std::str::FromStr;

use alloy::primitives::Address;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::ledger::PurchaseLogEntry;
use crate::pipeline::{SettlementOutcome, SettlementRequest};
use crate::rate_limit::{LimitDimension, RateLimitDecision};
use crate::state::AppState;
use crate::swap::SwapStep;

const PENDING_MESSAGE: &str = "payment received, settlement pending retry";

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBody {
    /// Idempotency key. Repeating an id returns the recorded entry.
    #[serde(default)]
    pub id: Option<String>,
    /// Address that receives the reward tokens.
    pub payer: String,
    /// Stablecoin amount as a decimal string, e.g. "0.05".
    pub amount: String,
    /// Hash of the incoming stablecoin payment.
    #[serde(default)]
    pub payment_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Settled,
    Duplicate,
    /// Accepted but not delivered. Safe to report to the payer as pending.
    Pending,
    RateLimited,
    Busy,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub status: SettlementStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_tx_hash: Option<String>,
    /// Reward-token atomic units delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
    /// Step that failed, for pending settlements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<SwapStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<PurchaseLogEntry>,
}

impl SettlementResponse {
    fn new(status: SettlementStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            entry_id: None,
            swap_tx_hash: None,
            forward_tx_hash: None,
            delivered: None,
            explorer_url: None,
            failed_step: None,
            entry: None,
        }
    }
}

/// Settle one payment.
#[utoipa::path(
    post,
    path = "/v1/settlements",
    tag = "Settlements",
    request_body = SettlementBody,
    responses(
        (status = 200, description = "Settled, or a repeat of a recorded id", body = SettlementResponse),
        (status = 202, description = "Payment received, settlement pending retry", body = SettlementResponse),
        (status = 400, description = "Invalid payer or amount"),
        (status = 429, description = "Rate limited", body = SettlementResponse),
        (status = 503, description = "Another settlement is executing", body = SettlementResponse)
    )
)]
pub async fn create_settlement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SettlementBody>,
) -> Result<Response, ApiError> {
    let payer = Address::from_str(body.payer.trim())
        .map_err(|_| ApiError::bad_request(format!("invalid payer address: {}", body.payer)))?;

    let request = SettlementRequest {
        id: body.id,
        payer,
        amount: body.amount,
        client_ip: client_ip(&headers),
        payment_hash: body.payment_hash,
    };
    // Own task, so a client disconnect cannot cut a settlement off mid-swap.
    let pipeline = state.pipeline.clone();
    let report = tokio::spawn(async move { pipeline.settle(request).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Settlement task failed");
            ApiError::internal("settlement task failed")
        })??;

    let (status, response) = match report.outcome {
        SettlementOutcome::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            SettlementResponse::new(SettlementStatus::RateLimited, "rate limit exceeded"),
        ),
        SettlementOutcome::Busy => (
            StatusCode::SERVICE_UNAVAILABLE,
            SettlementResponse::new(SettlementStatus::Busy, "another settlement is executing, retry shortly"),
        ),
        SettlementOutcome::Duplicate(entry) => {
            let mut response =
                SettlementResponse::new(SettlementStatus::Duplicate, format!("purchase already {}", entry.status));
            response.entry_id = Some(entry.id.clone());
            response.swap_tx_hash = entry.swap_tx_hash.clone();
            response.entry = Some(entry);
            (StatusCode::OK, response)
        }
        SettlementOutcome::Settled { entry_id, receipt } => {
            let mut response = SettlementResponse::new(SettlementStatus::Settled, "settled");
            response.entry_id = Some(entry_id);
            response.swap_tx_hash = Some(receipt.swap_tx_hash.to_string());
            response.forward_tx_hash = Some(receipt.forward_tx_hash.to_string());
            response.delivered = Some(receipt.delivered.to_string());
            response.explorer_url = Some(state.chain.tx_url(&receipt.forward_tx_hash));
            (StatusCode::OK, response)
        }
        SettlementOutcome::Pending {
            entry_id,
            swap_tx_hash,
            error,
        } => {
            let mut response = SettlementResponse::new(SettlementStatus::Pending, PENDING_MESSAGE);
            response.entry_id = Some(entry_id);
            response.swap_tx_hash = Some(swap_tx_hash.to_string());
            response.explorer_url = Some(state.chain.tx_url(&swap_tx_hash));
            response.failed_step = Some(error.step);
            (StatusCode::ACCEPTED, response)
        }
        SettlementOutcome::Failed { entry_id, error } => {
            let mut response = SettlementResponse::new(SettlementStatus::Pending, PENDING_MESSAGE);
            response.entry_id = Some(entry_id);
            response.failed_step = Some(error.step);
            (StatusCode::ACCEPTED, response)
        }
    };

    let limit = match report.rate_limit.limited_by {
        Some(LimitDimension::Ip) => state.pipeline.limiter().config().max_ip_requests,
        _ => state.pipeline.limiter().config().max_wallet_requests,
    };
    let mut http = (status, Json(response)).into_response();
    apply_rate_limit_headers(http.headers_mut(), &report.rate_limit, limit);
    Ok(http)
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then `CF-Connecting-IP`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .or_else(|| header("cf-connecting-ip"))
        .map(str::to_string)
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, limit: u32) {
    let reset_secs = decision.reset_at.timestamp();
    let set = |headers: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };

    set(headers, "x-ratelimit-limit", limit.to_string());
    set(headers, "x-ratelimit-remaining", decision.remaining.to_string());
    set(headers, "x-ratelimit-reset", reset_secs.to_string());
    if !decision.allowed {
        let retry_after = (reset_secs - Utc::now().timestamp()).max(1);
        set(headers, "retry-after", retry_after.to_string());
    }
}
