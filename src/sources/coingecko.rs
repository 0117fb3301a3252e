use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, http_client, SnapshotSource, SourceError};
use crate::config::{HttpConfig, QuoteConfig};
use crate::models::{QuoteSnapshot, TokenQuote};

/// USD quotes for the configured tokens, one `simple/price` call per cycle.
pub struct CoinGeckoQuotes {
    client: Client,
    config: QuoteConfig,
}

#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<f64>,
    last_updated_at: Option<i64>,
}

type SimplePriceResponse = HashMap<String, SimplePrice>;

impl CoinGeckoQuotes {
    pub fn new(config: QuoteConfig, http: &HttpConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(http.timeout())?,
            config,
        })
    }

    fn url(&self) -> String {
        let ids: Vec<&str> = self.config.tokens.iter().map(|t| t.id.as_str()).collect();
        format!(
            "{}/simple/price?ids={}&vs_currencies=usd&include_last_updated_at=true",
            self.config.base_url.trim_end_matches('/'),
            ids.join(",")
        )
    }

    async fn fetch_prices(&self) -> Result<SimplePriceResponse, SourceError> {
        let mut request = self.client.get(self.url());
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }
        let resp = request.send().await?;
        Ok(check_status(resp)?.json().await?)
    }

    fn to_snapshot(&self, prices: &SimplePriceResponse) -> QuoteSnapshot {
        self.config
            .tokens
            .iter()
            .map(|token| {
                let quote = prices.get(&token.id).and_then(|price| {
                    let usd = price.usd?;
                    let updated = price
                        .last_updated_at
                        .and_then(|secs| DateTime::from_timestamp(secs, 0))
                        .unwrap_or_else(Utc::now);
                    Some(TokenQuote {
                        usd_price: Some(usd),
                        date_updated: updated,
                    })
                });
                if quote.is_none() {
                    tracing::warn!("⚠️ No USD price for {} ({}) in response", token.symbol, token.id);
                }
                (token.symbol.clone(), quote)
            })
            .collect()
    }
}

#[async_trait]
impl SnapshotSource for CoinGeckoQuotes {
    type Snapshot = QuoteSnapshot;

    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn fetch(&self) -> QuoteSnapshot {
        if self.config.tokens.is_empty() {
            return QuoteSnapshot::default();
        }

        match self.fetch_prices().await {
            Ok(prices) => self.to_snapshot(&prices),
            Err(e) => {
                tracing::warn!("⚠️ Quote fetch failed for {} tokens: {}", self.config.tokens.len(), e);
                self.config
                    .tokens
                    .iter()
                    .map(|token| (token.symbol.clone(), None))
                    .collect()
            }
        }
    }
}
