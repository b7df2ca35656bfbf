// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KyberSwap aggregator API client.
//!
//! - `GET {host}/{chain}/api/v1/routes` quotes a route,
//! - `POST {host}/{chain}/api/v1/route/build` encodes it for the router.
//!
//! Both wrap their payload as `{code, message, data}`; any non-zero `code`
//! is a failure.

use std::str::FromStr;

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};

use super::{
    AggregatorConfig, AggregatorError, BuildParams, EncodedSwap, LiquidityAggregator, SwapRoute,
};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutesData {
    route_summary: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildData {
    router_address: String,
    data: String,
    #[serde(default)]
    transaction_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KyberSwapClient {
    config: AggregatorConfig,
    http: Client,
}

impl KyberSwapClient {
    pub fn new(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AggregatorError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/api/v1/{}",
            self.config.host.trim_end_matches('/'),
            self.config.chain,
            path
        )
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<Envelope<T>, AggregatorError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AggregatorError::Http { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| AggregatorError::InvalidResponse(format!("{what}: {e}")))
    }
}

#[async_trait]
impl LiquidityAggregator for KyberSwapClient {
    async fn quote_route(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        slippage_bps: u16,
    ) -> Result<SwapRoute, AggregatorError> {
        let response = self
            .http
            .get(self.url("routes"))
            .header("X-Client-Id", &self.config.client_id)
            .query(&[
                ("tokenIn", token_in.to_string()),
                ("tokenOut", token_out.to_string()),
                ("amountIn", amount_in.to_string()),
                ("gasInclude", "true".to_string()),
                ("slippageTolerance", slippage_bps.to_string()),
                ("source", self.config.client_id.clone()),
            ])
            .send()
            .await
            .map_err(|e| AggregatorError::Request(format!("GET routes failed: {e}")))?;

        let envelope = Self::read_envelope::<RoutesData>(response, "routes").await?;
        parse_route(envelope, amount_in)
    }

    async fn build_transaction(
        &self,
        route: &SwapRoute,
        params: BuildParams,
    ) -> Result<EncodedSwap, AggregatorError> {
        let deadline = chrono::Utc::now().timestamp() + params.deadline.as_secs() as i64;
        let body = json!({
            "routeSummary": route.summary,
            "sender": params.sender.to_string(),
            "recipient": params.recipient.to_string(),
            "slippageTolerance": params.slippage_bps,
            "source": self.config.client_id,
            "deadline": deadline,
            "enableGasEstimation": true,
        });

        let response = self
            .http
            .post(self.url("route/build"))
            .header("X-Client-Id", &self.config.client_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AggregatorError::Request(format!("POST route/build failed: {e}")))?;

        let envelope = Self::read_envelope::<BuildData>(response, "route/build").await?;
        parse_build(envelope)
    }
}

fn parse_route(envelope: Envelope<RoutesData>, amount_in: U256) -> Result<SwapRoute, AggregatorError> {
    if envelope.code != 0 {
        return Err(AggregatorError::NoRoute(format!(
            "code {}: {}",
            envelope.code, envelope.message
        )));
    }

    let Some(summary) = envelope.data.and_then(|d| d.route_summary) else {
        return Err(AggregatorError::NoRoute("response has no routeSummary".to_string()));
    };

    let amount_out = summary
        .get("amountOut")
        .and_then(Value::as_str)
        .ok_or_else(|| AggregatorError::InvalidResponse("routeSummary.amountOut missing".to_string()))
        .and_then(|raw| {
            U256::from_str_radix(raw, 10).map_err(|e| {
                AggregatorError::InvalidResponse(format!("routeSummary.amountOut {raw:?}: {e}"))
            })
        })?;

    if amount_out.is_zero() {
        return Err(AggregatorError::NoRoute("quoted output is zero".to_string()));
    }

    Ok(SwapRoute {
        summary,
        amount_in,
        amount_out,
    })
}

fn parse_build(envelope: Envelope<BuildData>) -> Result<EncodedSwap, AggregatorError> {
    if envelope.code != 0 {
        return Err(AggregatorError::Api {
            code: envelope.code,
            message: envelope.message,
        });
    }
    let data = envelope
        .data
        .ok_or_else(|| AggregatorError::InvalidResponse("route/build returned no data".to_string()))?;

    let router = Address::from_str(&data.router_address).map_err(|e| {
        AggregatorError::InvalidResponse(format!("routerAddress {:?}: {e}", data.router_address))
    })?;
    let calldata = Bytes::from_str(&data.data)
        .map_err(|e| AggregatorError::InvalidResponse(format!("calldata: {e}")))?;
    let value = match data.transaction_value.as_deref().map(str::trim) {
        None | Some("") => U256::ZERO,
        Some(raw) => U256::from_str_radix(raw, 10).map_err(|e| {
            AggregatorError::InvalidResponse(format!("transactionValue {raw:?}: {e}"))
        })?,
    };

    Ok(EncodedSwap {
        router,
        calldata,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope<T: DeserializeOwned>(value: Value) -> Envelope<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parse_route_reads_amount_out() {
        let route = parse_route(
            envelope(json!({
                "code": 0,
                "message": "successfully",
                "data": {
                    "routeSummary": { "amountIn": "50000", "amountOut": "123456789" },
                    "routerAddress": "0x6131B5fae19EA4f9D964eAc0408E4408b66337b5"
                }
            })),
            U256::from(50_000u64),
        )
        .unwrap();
        assert_eq!(route.amount_out, U256::from(123_456_789u64));
        assert_eq!(route.summary["amountIn"], "50000");
    }

    #[test]
    fn nonzero_code_is_no_route() {
        let err = parse_route(
            envelope(json!({ "code": 4008, "message": "route not found" })),
            U256::from(1u64),
        )
        .unwrap_err();
        assert!(matches!(err, AggregatorError::NoRoute(msg) if msg.contains("route not found")));
    }

    #[test]
    fn zero_output_is_no_route() {
        let err = parse_route(
            envelope(json!({ "code": 0, "data": { "routeSummary": { "amountOut": "0" } } })),
            U256::from(1u64),
        )
        .unwrap_err();
        assert!(matches!(err, AggregatorError::NoRoute(_)));
    }

    #[test]
    fn parse_build_decodes_calldata_and_value() {
        let swap = parse_build(envelope(json!({
            "code": 0,
            "data": {
                "routerAddress": "0x6131B5fae19EA4f9D964eAc0408E4408b66337b5",
                "data": "0xe21fd0e9",
                "transactionValue": "0"
            }
        })))
        .unwrap();
        assert_eq!(swap.calldata, Bytes::from(vec![0xe2, 0x1f, 0xd0, 0xe9]));
        assert_eq!(swap.value, U256::ZERO);
        assert_eq!(
            swap.router,
            Address::from_str("0x6131B5fae19EA4f9D964eAc0408E4408b66337b5").unwrap()
        );
    }

    #[test]
    fn parse_build_error_code() {
        let err = parse_build(envelope(json!({ "code": 4227, "message": "estimate gas failed" })))
            .unwrap_err();
        assert!(matches!(err, AggregatorError::Api { code: 4227, .. }));
    }

    #[test]
    fn url_joins_host_chain_and_path() {
        let client = KyberSwapClient::new(AggregatorConfig {
            host: "https://aggregator.example/".to_string(),
            ..AggregatorConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("route/build"),
            "https://aggregator.example/base/api/v1/route/build"
        );
    }
}
