// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::lock::LockHealth;
use crate::state::AppState;
use crate::storage::{BackendHealth, BackendKind};

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Lock store reachability and whether an execution holds the lock.
    pub lock: LockHealth,
    pub ledger: LedgerHealth,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerHealth {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub backends: BackendHealth,
}

impl LedgerHealth {
    fn is_healthy(&self) -> bool {
        self.backends.database.unwrap_or(true) && self.backends.filesystem.unwrap_or(true)
    }
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint handler.
///
/// Returns 200 if the lock and ledger stores are reachable, 503 otherwise.
/// A held lock is reported but is not a failure.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let lock = state.pipeline.lock().health_check();
    let ledger = state.pipeline.ledger();
    let ledger = LedgerHealth {
        backend: ledger.kind(),
        backends: ledger.health(),
    };

    let all_ok = lock.is_healthy() && ledger.is_healthy();
    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            lock,
            ledger,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only if both stores are available.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_state;
    use crate::swap::testing::{MockAggregator, MockChain};
    use alloy::primitives::U256;

    #[tokio::test]
    async fn health_reports_database_backend() {
        let (state, _temp) = test_state(
            MockChain::funded(U256::ZERO),
            MockAggregator::no_route(),
        );
        let (status, Json(body)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.checks.lock.backend, BackendKind::Database);
        assert_eq!(body.checks.lock.database, Some(true));
        assert!(!body.checks.lock.locked);
        assert_eq!(body.checks.ledger.backend, BackendKind::Database);
    }

    #[tokio::test]
    async fn health_shows_held_lock_without_degrading() {
        let (state, _temp) = test_state(
            MockChain::funded(U256::ZERO),
            MockAggregator::no_route(),
        );
        let _lease = state.pipeline.lock().acquire("health-test", "req-1").unwrap();

        let (status, Json(body)) = health(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.checks.lock.locked);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body.status, "ok");
    }
}
