//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{Result, ServiceError};
use crate::ticker::TickerEndpoint;

#[derive(Debug, Clone)]
pub struct Config {
    /// Ticker endpoint of the quote service
    pub ticker_url: String,
    /// Currency the balance is converted into (e.g. BTC)
    pub quote_currency: String,
    /// The wallet's own currency (e.g. BOB)
    pub wallet_currency: String,
    /// Standard HTTP timeout; rate fetches allow twice this for connect and for read
    pub http_timeout_ms: u64,
    /// How often (in seconds) to poll the quote service
    pub rate_poll_interval_secs: u64,
    /// Whether to fetch a rate and show the converted balance at all
    pub show_local_balance: bool,
    /// Port for the REST API server
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            ticker_url: var("TICKER_URL", "https://bittrex.com/api/v1.1/public/getticker"),
            quote_currency: var("QUOTE_CURRENCY", "BTC"),
            wallet_currency: var("WALLET_CURRENCY", "BOB"),
            http_timeout_ms: parse(&var("HTTP_TIMEOUT_MS", "15000"), "HTTP_TIMEOUT_MS")?,
            rate_poll_interval_secs: parse(
                &var("RATE_POLL_INTERVAL_SECS", "60"),
                "RATE_POLL_INTERVAL_SECS",
            )?,
            show_local_balance: parse(&var("SHOW_LOCAL_BALANCE", "true"), "SHOW_LOCAL_BALANCE")?,
            api_port: parse(&var("API_PORT", "3002"), "API_PORT")?,
        })
    }

    pub fn ticker_endpoint(&self) -> TickerEndpoint {
        TickerEndpoint {
            url: self.ticker_url.clone(),
            quote_currency: self.quote_currency.clone(),
            wallet_currency: self.wallet_currency.clone(),
        }
    }

    /// Connect and read timeout for one rate fetch.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.saturating_mul(2))
    }

    pub fn rate_poll_interval(&self) -> Duration {
        Duration::from_secs(self.rate_poll_interval_secs.max(1))
    }
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ServiceError::Config(format!("Invalid {key}: {value:?}")))
}
