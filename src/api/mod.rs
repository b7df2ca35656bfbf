// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    ledger::{PurchaseLogEntry, PurchaseStatus},
    lock::LockHealth,
    rate_limit::{LimitDimension, RateLimitDecision},
    state::AppState,
    storage::{BackendHealth, BackendKind},
    swap::SwapStep,
};

pub mod health;
pub mod purchases;
pub mod settlements;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/settlements", post(settlements::create_settlement))
        .route("/purchases", get(purchases::list_purchases))
        .route("/purchases/{id}", get(purchases::get_purchase))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        settlements::create_settlement,
        purchases::list_purchases,
        purchases::get_purchase,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            settlements::SettlementBody,
            settlements::SettlementResponse,
            settlements::SettlementStatus,
            purchases::PurchaseListResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::LedgerHealth,
            health::HealthResponse,
            PurchaseLogEntry,
            PurchaseStatus,
            LockHealth,
            BackendKind,
            BackendHealth,
            RateLimitDecision,
            LimitDimension,
            SwapStep
        )
    ),
    tags(
        (name = "Settlements", description = "Stablecoin to reward-token settlement"),
        (name = "Purchases", description = "Purchase ledger"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::blockchain::ChainConfig;
    use crate::ledger::PurchaseLedger;
    use crate::lock::{ExecutorLock, LockConfig};
    use crate::pipeline::SettlementPipeline;
    use crate::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::state::AppState;
    use crate::storage::SettlementDatabase;
    use crate::swap::testing::{MockAggregator, MockChain};
    use crate::swap::SwapExecutor;

    pub fn test_state(chain: MockChain, aggregator: MockAggregator) -> (AppState, TempDir) {
        test_state_with_limits(chain, aggregator, RateLimitConfig::default())
    }

    /// State over a temporary redb file. Keep the `TempDir` alive for the test.
    pub fn test_state_with_limits(
        chain: MockChain,
        aggregator: MockAggregator,
        limits: RateLimitConfig,
    ) -> (AppState, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(SettlementDatabase::open(&temp.path().join("api.redb")).unwrap());
        let lock = ExecutorLock::new(
            db.clone(),
            &LockConfig {
                secret: "api-test".to_string(),
                ..LockConfig::default()
            },
        );
        let executor = SwapExecutor::new(
            Arc::new(chain),
            Arc::new(aggregator),
            MockChain::swap_config(),
        );
        let pipeline = SettlementPipeline::new(
            Arc::new(RateLimiter::new(limits)),
            Arc::new(lock),
            PurchaseLedger::new(db),
            Arc::new(executor),
            6,
        );
        (
            AppState::new(Arc::new(pipeline), ChainConfig::default()),
            temp,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::testing::{MockAggregator, MockChain};
    use alloy::primitives::U256;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let (state, _temp) = testing::test_state(MockChain::funded(U256::ZERO), MockAggregator::no_route());
        let app = router(state);
        let _ = app.into_make_service();
    }

    #[test]
    fn openapi_lists_settlement_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/settlements"));
        assert!(doc.paths.paths.contains_key("/v1/purchases/{id}"));
        assert!(doc.paths.paths.contains_key("/health/ready"));
    }
}
