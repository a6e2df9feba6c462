//! Live HTTP quote provider.
//!
//! Talks to a quote endpoint of the shape
//! `GET {base_url}/quote?venue=…&inputToken=…&outputToken=…&amount=…[&chainId=…]`
//! answering `{ "outAmount": "<decimal>" }`. Only the (family, network)
//! pairs listed at construction are considered priceable; the scanner
//! falls back to synthetic quotes for everything else.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{QuoteError, QuoteProvider, QuoteRequest};
use crate::types::{ChainFamily, Network};

const PROVIDER_NAME: &str = "http";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    /// Decimal string, or a JSON number for lenient endpoints.
    out_amount: serde_json::Value,
}

/// HTTP-backed `QuoteProvider`.
pub struct HttpQuoteProvider {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    live: Vec<(ChainFamily, Network)>,
}

impl HttpQuoteProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        live: Vec<(ChainFamily, Network)>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent("ARBWARDEN/0.1.0 (arbitrage-pipeline)")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client for quotes: {e}"))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            live,
        })
    }

    fn quote_url(&self, request: &QuoteRequest) -> String {
        let mut url = format!(
            "{}/quote?venue={}&inputToken={}&outputToken={}&amount={}",
            self.base_url,
            urlencoding::encode(&request.venue),
            urlencoding::encode(&request.input_token),
            urlencoding::encode(&request.output_token),
            request.amount,
        );
        if let Some(chain_id) = request.chain_id {
            url.push_str(&format!("&chainId={chain_id}"));
        }
        url
    }

    fn request_error(message: impl ToString) -> QuoteError {
        QuoteError::Request {
            provider: PROVIDER_NAME.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl QuoteProvider for HttpQuoteProvider {
    async fn quote(&self, request: &QuoteRequest) -> Result<Decimal, QuoteError> {
        if !self.supports(request.family, request.network) {
            return Err(QuoteError::Unsupported {
                provider: PROVIDER_NAME.to_string(),
                family: request.family,
                network: request.network,
            });
        }

        let url = self.quote_url(request);
        debug!(url = %url, "Requesting quote");

        let mut builder = self.http.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
        }
        let resp = builder.send().await.map_err(Self::request_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(QuoteError::NoRoute {
                venue: request.venue.clone(),
                input: request.input_token.clone(),
                output: request.output_token.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::request_error(format!("HTTP {status}: {body}")));
        }

        let parsed: QuoteResponse = resp.json().await.map_err(Self::request_error)?;
        let raw = match &parsed.out_amount {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map_err(|e| Self::request_error(format!("bad outAmount {raw}: {e}")))
    }

    fn supports(&self, family: ChainFamily, network: Network) -> bool {
        self.live.contains(&(family, network))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
