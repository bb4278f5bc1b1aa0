use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::QuoteError;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Body fragments Jupiter uses when no route exists for a pair/size.
const NO_ROUTE_MARKERS: &[&str] = &[
    "COULD_NOT_FIND_ANY_ROUTE",
    "NO_ROUTES_FOUND",
    "TOKEN_NOT_TRADABLE",
    "No route",
    "no route",
];

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL).round() as u64
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}

/// Raw token units to whole tokens
pub fn to_ui_amount(raw: u64, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Best achievable route for one trade direction and size
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub route_labels: Vec<String>,
}

/// Source of executable quotes. Errors are always classified.
#[async_trait]
pub trait QuoteOracle: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Quote, QuoteError>;
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuoteResponse {
    #[serde(rename = "inputMint")]
    pub input_mint: String,
    #[serde(rename = "inAmount")]
    pub in_amount: String,
    #[serde(rename = "outputMint")]
    pub output_mint: String,
    #[serde(rename = "outAmount", default)]
    pub out_amount: Option<String>,
    #[serde(rename = "slippageBps", default)]
    pub slippage_bps: Option<u32>,
    #[serde(rename = "priceImpactPct", default)]
    pub price_impact_pct: Option<String>,
    #[serde(rename = "routePlan", default)]
    pub route_plan: Vec<RoutePlan>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutePlan {
    #[serde(rename = "swapInfo")]
    pub swap_info: SwapInfo,
    #[serde(default)]
    pub percent: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SwapInfo {
    #[serde(rename = "ammKey", default)]
    pub amm_key: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ceiling for both backoff and a server-sent `Retry-After`
    pub max_delay: Duration,
    /// Hard deadline for a single HTTP attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.quote_max_attempts.max(1),
            base_delay: Duration::from_millis(config.quote_backoff_base_ms),
            max_delay: Duration::from_millis(config.quote_backoff_max_ms),
            attempt_timeout: Duration::from_millis(config.quote_timeout_ms),
        }
    }

    /// Delay before attempt `attempt + 1`: exponential, capped, with up to 25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone)]
pub struct JupiterClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    slippage_bps: u32,
    retry: RetryPolicy,
}

impl JupiterClient {
    pub fn new(config: &Config) -> Result<Self> {
        let retry = RetryPolicy::from_config(config);
        let client = Client::builder()
            .timeout(retry.attempt_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: config.jupiter_api_url.trim_end_matches('/').to_string(),
            api_key: config.jupiter_api_key.clone(),
            slippage_bps: config.quote_slippage_bps,
            retry,
        })
    }

    /// One HTTP attempt under the hard per-attempt deadline.
    async fn get_quote_once(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Quote, QuoteError> {
        let timeout_ms = self.retry.attempt_timeout.as_millis() as u64;
        match tokio::time::timeout(
            self.retry.attempt_timeout,
            self.request_quote(input_mint, output_mint, amount),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(QuoteError::Timeout(timeout_ms)),
        }
    }

    async fn request_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Quote, QuoteError> {
        let url = format!("{}/quote", self.base_url);
        let params = [
            ("inputMint", input_mint.to_string()),
            ("outputMint", output_mint.to_string()),
            ("amount", amount.to_string()),
            ("slippageBps", self.slippage_bps.to_string()),
            ("onlyDirectRoutes", "false".to_string()),
        ];
        debug!("Getting quote from Jupiter: {:?}", params);

        let mut request_builder = self.client.get(&url).query(&params);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("x-api-key", key);
        }

        let timeout_ms = self.retry.attempt_timeout.as_millis() as u64;
        let response = request_builder
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout_ms))?;
        let status = response.status();
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(e, timeout_ms))?;

        classify_response(status, retry_after_ms, &body)
    }
}

#[async_trait]
impl QuoteOracle for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> Result<Quote, QuoteError> {
        if amount == 0 {
            return Err(QuoteError::InvalidRequest("amount must be positive".to_string()));
        }

        let mut attempt = 1;
        loop {
            match self.get_quote_once(input_mint, output_mint, amount).await {
                Ok(quote) => return Ok(quote),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = e
                        .retry_after()
                        .map(|d| d.min(self.retry.max_delay))
                        .unwrap_or_else(|| self.retry.backoff(attempt));
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable Jupiter quote error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("Jupiter quote failed after {} attempts: {}", attempt, e);
                    } else {
                        debug!("Jupiter quote rejected: {}", e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn classify_transport_error(e: reqwest::Error, timeout_ms: u64) -> QuoteError {
    if e.is_timeout() {
        QuoteError::Timeout(timeout_ms)
    } else if e.is_decode() {
        QuoteError::InvalidResponse(e.to_string())
    } else {
        QuoteError::NetworkError(e.to_string())
    }
}

fn has_no_route_marker(body: &str) -> bool {
    NO_ROUTE_MARKERS.iter().any(|m| body.contains(m))
}

/// Maps an HTTP outcome to a quote or a classified error. Only explicit
/// no-route answers become `NoRoute`.
fn classify_response(
    status: StatusCode,
    retry_after_ms: Option<u64>,
    body: &str,
) -> Result<Quote, QuoteError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(QuoteError::RateLimited { retry_after_ms });
    }
    if status.is_server_error() {
        return Err(QuoteError::NetworkError(format!("HTTP {}: {}", status, truncate(body))));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(QuoteError::NoRoute(format!("HTTP 404: {}", truncate(body))));
    }
    if status.is_client_error() {
        if has_no_route_marker(body) {
            return Err(QuoteError::NoRoute(truncate(body)));
        }
        return Err(QuoteError::InvalidResponse(format!("HTTP {}: {}", status, truncate(body))));
    }
    if !status.is_success() {
        return Err(QuoteError::InvalidResponse(format!("Unexpected HTTP {}", status)));
    }

    let parsed: QuoteResponse = match serde_json::from_str(body) {
        Ok(q) => q,
        Err(e) => {
            if has_no_route_marker(body) {
                return Err(QuoteError::NoRoute(truncate(body)));
            }
            return Err(QuoteError::InvalidResponse(format!("Failed to parse quote: {}", e)));
        }
    };

    let out_amount = parsed
        .out_amount
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if out_amount == 0 {
        return Err(QuoteError::NoRoute("quote returned no output amount".to_string()));
    }
    let in_amount = parsed
        .in_amount
        .parse::<u64>()
        .map_err(|e| QuoteError::InvalidResponse(format!("Bad inAmount '{}': {}", parsed.in_amount, e)))?;

    Ok(Quote {
        input_mint: parsed.input_mint,
        output_mint: parsed.output_mint,
        in_amount,
        out_amount,
        price_impact_pct: parsed
            .price_impact_pct
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0),
        route_labels: parsed
            .route_plan
            .into_iter()
            .map(|r| r.swap_info.label)
            .collect(),
    })
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const TOKEN: &str = "TokenMint1111111111111111111111111111111111";

    fn test_config(url: &str) -> Config {
        Config {
            jupiter_api_url: url.to_string(),
            quote_max_attempts: 3,
            quote_timeout_ms: 2_000,
            quote_backoff_base_ms: 1,
            quote_backoff_max_ms: 5,
            ..Config::default()
        }
    }

    fn quote_body(out_amount: &str) -> String {
        format!(
            r#"{{"inputMint":"{}","inAmount":"80000000","outputMint":"{}","outAmount":"{}","slippageBps":300,"priceImpactPct":"0.012","routePlan":[{{"swapInfo":{{"ammKey":"amm1","label":"Raydium"}},"percent":100}}]}}"#,
            SOL_MINT, TOKEN, out_amount
        )
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(sol_to_lamports(0.08), 80_000_000);
        assert_eq!(lamports_to_sol(1_500_000_000), 1.5);
        assert_eq!(to_ui_amount(80_000_000, 6), 80.0);
    }

    #[test]
    fn test_classify_statuses() {
        assert!(matches!(
            classify_response(StatusCode::TOO_MANY_REQUESTS, Some(2000), ""),
            Err(QuoteError::RateLimited { retry_after_ms: Some(2000) })
        ));
        assert!(matches!(
            classify_response(StatusCode::BAD_GATEWAY, None, "upstream"),
            Err(QuoteError::NetworkError(_))
        ));
        assert!(matches!(
            classify_response(StatusCode::NOT_FOUND, None, ""),
            Err(QuoteError::NoRoute(_))
        ));
        assert!(matches!(
            classify_response(
                StatusCode::BAD_REQUEST,
                None,
                r#"{"error":"Could not find any route","errorCode":"COULD_NOT_FIND_ANY_ROUTE"}"#
            ),
            Err(QuoteError::NoRoute(_))
        ));
        assert!(matches!(
            classify_response(StatusCode::BAD_REQUEST, None, r#"{"error":"Invalid mint"}"#),
            Err(QuoteError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_zero_out_amount_is_no_route() {
        let result = classify_response(StatusCode::OK, None, &quote_body("0"));
        assert!(matches!(result, Err(QuoteError::NoRoute(_))));
    }

    #[test]
    fn test_rate_limit_is_never_no_route() {
        let err = QuoteError::RateLimited { retry_after_ms: None };
        assert!(err.is_retryable());
        assert!(!err.is_no_route());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            attempt_timeout: Duration::from_secs(8),
        };
        assert!(policy.backoff(1) >= Duration::from_millis(1000));
        assert!(policy.backoff(1) <= Duration::from_millis(1250));
        assert!(policy.backoff(10) <= Duration::from_millis(6250));
    }

    #[tokio::test]
    async fn test_quote_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("inputMint".into(), SOL_MINT.into()),
                Matcher::UrlEncoded("amount".into(), "80000000".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(quote_body("80000000"))
            .create_async()
            .await;

        let client = JupiterClient::new(&test_config(&server.url())).unwrap();
        let quote = client.quote(SOL_MINT, TOKEN, 80_000_000).await.unwrap();

        assert_eq!(quote.in_amount, 80_000_000);
        assert_eq!(quote.out_amount, 80_000_000);
        assert_eq!(quote.route_labels, vec!["Raydium".to_string()]);
        assert!((quote.price_impact_pct - 0.012).abs() < 1e-12);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("Too Many Requests")
            .expect(3)
            .create_async()
            .await;

        let client = JupiterClient::new(&test_config(&server.url())).unwrap();
        let err = client.quote(SOL_MINT, TOKEN, 1_000).await.unwrap_err();

        assert!(matches!(err, QuoteError::RateLimited { .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_huge_retry_after_is_capped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "18446744073709551615")
            .expect(3)
            .create_async()
            .await;

        let client = JupiterClient::new(&test_config(&server.url())).unwrap();
        let started = std::time::Instant::now();
        let err = client.quote(SOL_MINT, TOKEN, 1_000).await.unwrap_err();

        assert_eq!(err, QuoteError::RateLimited { retry_after_ms: Some(u64::MAX) });
        // Two waits, each clamped to the 5ms backoff ceiling
        assert!(started.elapsed() < Duration::from_secs(2));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_route_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"No routes found","errorCode":"COULD_NOT_FIND_ANY_ROUTE"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = JupiterClient::new(&test_config(&server.url())).unwrap();
        let err = client.quote(TOKEN, SOL_MINT, 1_000).await.unwrap_err();

        assert!(err.is_no_route());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_network_error_after_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = JupiterClient::new(&test_config(&server.url())).unwrap();
        let err = client.quote(SOL_MINT, TOKEN, 1_000).await.unwrap_err();

        assert!(matches!(err, QuoteError::NetworkError(_)));
        assert!(!err.is_no_route());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unresponsive_oracle_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = Config {
            quote_timeout_ms: 50,
            quote_max_attempts: 2,
            ..test_config(&format!("http://{}", addr))
        };
        let client = JupiterClient::new(&config).unwrap();
        let err = client.quote(SOL_MINT, TOKEN, 1_000).await.unwrap_err();

        assert!(matches!(err, QuoteError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_zero_amount_rejected_without_request() {
        let client = JupiterClient::new(&test_config("http://127.0.0.1:9")).unwrap();
        let err = client.quote(SOL_MINT, TOKEN, 0).await.unwrap_err();
        assert!(matches!(err, QuoteError::InvalidRequest(_)));
    }
}
