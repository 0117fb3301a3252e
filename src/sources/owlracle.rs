use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, http_client, SnapshotSource, SourceError};
use crate::config::{GasConfig, GasChain, HttpConfig};
use crate::models::{GasEstimate, GasSnapshot};

/// Per-chain fee estimates from Owlracle.
pub struct OwlracleGas {
    client: Client,
    config: GasConfig,
}

#[derive(Debug, Deserialize)]
struct OwlracleResponse {
    #[serde(default)]
    speeds: Vec<OwlracleSpeed>,
    #[serde(rename = "tokenPrice")]
    token_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwlracleSpeed {
    #[serde(rename = "estimatedFee")]
    estimated_fee: Option<f64>,
    #[serde(rename = "gasPrice", alias = "maxFeePerGas")]
    gas_price: Option<f64>,
}

impl OwlracleGas {
    pub fn new(config: GasConfig, http: &HttpConfig) -> Result<Self, SourceError> {
        Ok(Self {
            client: http_client(http.timeout())?,
            config,
        })
    }

    fn url(&self, chain: &GasChain) -> String {
        format!(
            "{}/{}/gas?accept={}&apikey={}",
            self.config.base_url.trim_end_matches('/'),
            chain.slug,
            self.config.accept,
            self.config.api_key
        )
    }

    async fn fetch_chain(&self, chain: &GasChain) -> Result<GasEstimate, SourceError> {
        let resp = self.client.get(self.url(chain)).send().await?;
        let body: OwlracleResponse = check_status(resp)?.json().await?;
        parse_estimate(body)
    }
}

fn parse_estimate(body: OwlracleResponse) -> Result<GasEstimate, SourceError> {
    let speed = body.speeds.into_iter().next().ok_or(SourceError::Missing("speeds"))?;
    let fee = speed.estimated_fee.ok_or(SourceError::Missing("speeds[0].estimatedFee"))?;
    Ok(GasEstimate::new(fee, speed.gas_price, body.token_price))
}

#[async_trait]
impl SnapshotSource for OwlracleGas {
    type Snapshot = GasSnapshot;

    fn name(&self) -> &'static str {
        "owlracle"
    }

    async fn fetch(&self) -> GasSnapshot {
        let results = join_all(self.config.chains.iter().map(|chain| self.fetch_chain(chain))).await;

        self.config
            .chains
            .iter()
            .zip(results)
            .map(|(chain, result)| {
                let estimate = result
                    .inspect_err(|e| tracing::warn!("⚠️ Gas fetch failed for {}: {}", chain.name, e))
                    .ok();
                (chain.name.clone(), estimate)
            })
            .collect()
    }
}
