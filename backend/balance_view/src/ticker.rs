//! Quote-service client: fetches one ticker and parses the last trade price.
//!
//! ## Resilience
//!
//! * Connect and each read are bounded by the configured timeout. A body that
//!   keeps arriving is not cut off however long it takes in total.
//! * Every failure comes back as a [`FetchError`]. There is no retry here;
//!   polling cadence belongs to the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::balance::FixedRate;
use crate::errors::{FetchError, Result};

/// A successfully fetched quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRate {
    pub quote_currency: String,
    /// Quote-currency units per wallet coin.
    pub rate: FixedRate,
    pub fetched_at: DateTime<Utc>,
}

/// Where and what to ask the quote service for.
#[derive(Debug, Clone)]
pub struct TickerEndpoint {
    pub url: String,
    pub quote_currency: String,
    pub wallet_currency: String,
}

impl TickerEndpoint {
    /// Market identifier in the service's `<quote>-<wallet>` pair convention.
    pub fn market(&self) -> String {
        format!("{}-{}", self.quote_currency, self.wallet_currency).to_lowercase()
    }
}

pub struct ExchangeRateFetcher {
    client: Client,
    endpoint: TickerEndpoint,
    timeout: Duration,
}

impl ExchangeRateFetcher {
    pub fn new(endpoint: TickerEndpoint, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &TickerEndpoint {
        &self.endpoint
    }

    /// Perform one ticker round trip.
    pub async fn fetch(&self) -> std::result::Result<ExchangeRate, FetchError> {
        let market = self.endpoint.market();
        debug!(%market, timeout = ?self.timeout, "Fetching ticker");

        let body = self
            .client
            .get(&self.endpoint.url)
            .query(&[("market", market.as_str())])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let rate = parse_ticker(&body)?;
        debug!(%market, %rate, "Ticker parsed");

        Ok(ExchangeRate {
            quote_currency: self.endpoint.quote_currency.clone(),
            rate,
            fetched_at: Utc::now(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Response parsing
// ─────────────────────────────────────────────────────────

/// Extract `result.Last` from a ticker body such as
/// `{"success":true,"message":"","result":{"Bid":0.0031,"Ask":0.0032,"Last":0.00315893}}`.
pub fn parse_ticker(body: &[u8]) -> std::result::Result<FixedRate, FetchError> {
    let head: Value = serde_json::from_slice(body)
        .map_err(|e| FetchError::MalformedResponse(format!("not JSON: {e}")))?;

    let success = head
        .get("success")
        .ok_or_else(|| malformed("missing `success`"))?;
    if !is_true(success) {
        let message = head
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(malformed(&format!("unsuccessful response: {message:?}")));
    }

    let last = head
        .get("result")
        .ok_or_else(|| malformed("missing `result`"))?
        .get("Last")
        .ok_or_else(|| malformed("missing `result.Last`"))?;

    let text = match last {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(malformed(&format!("non-numeric `result.Last`: {other}"))),
    };

    FixedRate::parse_decimal(&text)
        .ok_or_else(|| malformed(&format!("unusable `result.Last`: {text}")))
}

/// The service has sent both `"true"` and `true` over time.
fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn malformed(reason: &str) -> FetchError {
    FetchError::MalformedResponse(reason.to_string())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
