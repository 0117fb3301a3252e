use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};

use super::rpc::{IUniswapV2Factory, IUniswapV2Pair, ISymbiosisPool, RpcClient, IERC20};
use super::{SnapshotSource, SourceError};
use crate::config::{Config, ConfigError, TokenConfig};
use crate::models::{BridgePool, PoolsSnapshot, SwapPair};

#[derive(Debug, Clone)]
struct Token {
    name: String,
    address: Address,
}

struct SwapChain {
    chain: String,
    protocol_name: String,
    factory: Address,
    rpc: RpcClient,
    tokens: Vec<Token>,
}

struct BridgeToken {
    name: String,
    holder: Address,
    /// Resolved by name from the chain's swap token list.
    token: Option<Address>,
}

struct MultichainChain {
    chain: String,
    protocol_name: String,
    rpc: RpcClient,
    tokens: Vec<BridgeToken>,
}

struct Nerve {
    name: String,
    pool: Address,
    tokens: Vec<(Address, u8)>,
}

struct SymbiosisPair {
    chain_pair: String,
    protocol_name: String,
    rpc: RpcClient,
    nerves: Vec<Nerve>,
}

/// AMM reserves and bridge liquidity read straight from chain state.
pub struct OnChainPools {
    swap: Vec<SwapChain>,
    multichain: Vec<MultichainChain>,
    symbiosis: Vec<SymbiosisPair>,
    concurrency: usize,
}

fn parse_address(value: &str, context: &str) -> Result<Address, ConfigError> {
    Address::from_str(value).map_err(|_| ConfigError::InvalidAddress {
        context: context.to_string(),
        value: value.to_string(),
    })
}

fn parse_tokens(tokens: &[TokenConfig], context: &str) -> Result<Vec<Token>, ConfigError> {
    tokens
        .iter()
        .map(|t| {
            Ok(Token {
                name: t.name.clone(),
                address: parse_address(&t.address, context)?,
            })
        })
        .collect()
}

/// Every unordered token pair, named in pool order: the factory sorts a pair's
/// tokens by address, so the lower address is always `token0`.
fn pair_combinations(tokens: &[Token]) -> Vec<(String, Address, Address)> {
    let mut pairs = Vec::new();
    for (i, a) in tokens.iter().enumerate() {
        for b in &tokens[i + 1..] {
            let (t0, t1) = if a.address < b.address { (a, b) } else { (b, a) };
            pairs.push((format!("{}/{}", t0.name, t1.name), t0.address, t1.address));
        }
    }
    pairs
}

fn scale(amount: U256, decimals: u8) -> Result<f64, SourceError> {
    let raw: f64 = amount
        .to_string()
        .parse()
        .map_err(|e: std::num::ParseFloatError| SourceError::Parse(e.to_string()))?;
    Ok(raw / 10f64.powi(i32::from(decimals)))
}

impl OnChainPools {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        let rpc_for = |chain: &str| -> Result<RpcClient, ConfigError> {
            Ok(RpcClient::new(client.clone(), config.rpc_url(chain)?))
        };

        let mut swap = Vec::new();
        for entry in &config.pools.swap {
            let context = format!("pools.swap.{}", entry.chain);
            swap.push(SwapChain {
                chain: entry.chain.clone(),
                protocol_name: entry.protocol_name.clone(),
                factory: parse_address(&entry.factory, &context)?,
                rpc: rpc_for(&entry.chain)?,
                tokens: parse_tokens(&entry.tokens, &context)?,
            });
        }

        let mut multichain = Vec::new();
        for entry in &config.pools.multichain {
            let context = format!("pools.multichain.{}", entry.chain);
            let mut tokens = Vec::new();
            for token in &entry.tokens {
                let resolved = swap
                    .iter()
                    .filter(|s| s.chain == entry.chain)
                    .flat_map(|s| s.tokens.iter())
                    .find(|t| t.name == token.name)
                    .map(|t| t.address);
                if resolved.is_none() {
                    tracing::warn!("⚠️ Bridge token {} not in the {} swap token list", token.name, entry.chain);
                }
                tokens.push(BridgeToken {
                    name: token.name.clone(),
                    holder: parse_address(&token.address, &context)?,
                    token: resolved,
                });
            }
            multichain.push(MultichainChain {
                chain: entry.chain.clone(),
                protocol_name: entry.protocol_name.clone(),
                rpc: rpc_for(&entry.chain)?,
                tokens,
            });
        }

        let mut symbiosis = Vec::new();
        for entry in &config.pools.symbiosis {
            let context = format!("pools.symbiosis.{}", entry.chain_pair);
            let mut nerves = Vec::new();
            for nerve in &entry.nerves {
                let tokens = nerve
                    .tokens
                    .iter()
                    .map(|t| Ok((parse_address(&t.address, &context)?, t.decimals)))
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                nerves.push(Nerve {
                    name: nerve.name.clone().unwrap_or_else(|| nerve.address.clone()),
                    pool: parse_address(&nerve.address, &context)?,
                    tokens,
                });
            }
            symbiosis.push(SymbiosisPair {
                chain_pair: entry.chain_pair.clone(),
                protocol_name: entry.protocol_name.clone(),
                rpc: rpc_for(entry.rpc_chain())?,
                nerves,
            });
        }

        ensure_unique_identities(&swap, &multichain, &symbiosis)?;

        Ok(Self {
            swap,
            multichain,
            symbiosis,
            concurrency: config.pools.concurrency.max(1),
        })
    }

    async fn swap_partition(&self, chain: &SwapChain) -> Vec<SwapPair> {
        stream::iter(pair_combinations(&chain.tokens))
            .map(|(pair_name, token_0, token_1)| async move {
                let read = read_pair(&chain.rpc, chain.factory, token_0, token_1).await;
                let (pair_address, supplies) = match read {
                    Ok((address, r0, r1)) => (Some(address.to_checksum(None)), Some((r0, r1))),
                    Err(e) => {
                        tracing::warn!("⚠️ Failed to update pair {} on {}: {}", pair_name, chain.chain, e);
                        (None, None)
                    }
                };
                SwapPair {
                    protocol_name: chain.protocol_name.clone(),
                    pair_name,
                    token_0: token_0.to_checksum(None),
                    token_1: token_1.to_checksum(None),
                    pair_address,
                    token_0_supply: supplies.map(|s| s.0),
                    token_1_supply: supplies.map(|s| s.1),
                    date_updated: Utc::now(),
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn multichain_partition(&self, bridge: &MultichainChain) -> Vec<BridgePool> {
        stream::iter(0..bridge.tokens.len())
            .map(|i| self.bridge_pool(bridge, &bridge.tokens[i]))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn bridge_pool(&self, bridge: &MultichainChain, token: &BridgeToken) -> BridgePool {
        let supply = match token.token {
            Some(address) => read_balance(&bridge.rpc, address, token.holder).await,
            None => Err(SourceError::NotFound(format!("token address for {}", token.name))),
        };
        let supply = supply
            .inspect_err(|e| {
                tracing::warn!("⚠️ Failed to update {} pool of {} on {}: {}", bridge.protocol_name, token.name, bridge.chain, e)
            })
            .ok();
        BridgePool {
            protocol_name: bridge.protocol_name.clone(),
            token_name: token.name.clone(),
            token_address: token.token.map(|a| a.to_checksum(None)),
            pair_address: Some(token.holder.to_checksum(None)),
            token_supply: supply,
            date_updated: Utc::now(),
        }
    }

    async fn symbiosis_partition(&self, pair: &SymbiosisPair) -> Vec<BridgePool> {
        stream::iter(0..pair.nerves.len())
            .map(|i| self.nerve_pool(pair, &pair.nerves[i]))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn nerve_pool(&self, pair: &SymbiosisPair, nerve: &Nerve) -> BridgePool {
        let supply = read_nerve(&pair.rpc, nerve)
            .await
            .inspect_err(|e| {
                tracing::warn!("⚠️ Failed to update {} pool {} on {}: {}", pair.protocol_name, nerve.name, pair.chain_pair, e)
            })
            .ok();
        BridgePool {
            protocol_name: pair.protocol_name.clone(),
            token_name: nerve.name.clone(),
            token_address: None,
            pair_address: Some(nerve.pool.to_checksum(None)),
            token_supply: supply,
            date_updated: Utc::now(),
        }
    }
}

/// Records are matched across cycles by name within a partition, so two
/// records sharing a partition must never share a name.
fn ensure_unique_identities(
    swap: &[SwapChain],
    multichain: &[MultichainChain],
    symbiosis: &[SymbiosisPair],
) -> Result<(), ConfigError> {
    let mut seen: HashSet<(&'static str, String, String)> = HashSet::new();
    let mut claim = |category: &'static str, partition: &str, identity: String| {
        if seen.insert((category, partition.to_string(), identity.clone())) {
            Ok(())
        } else {
            Err(ConfigError::Duplicate {
                scope: format!("{category}.{partition}"),
                key: identity,
            })
        }
    };

    for chain in swap {
        for (pair_name, _, _) in pair_combinations(&chain.tokens) {
            claim("swap_pools", &chain.chain, pair_name)?;
        }
    }
    for bridge in multichain {
        for token in &bridge.tokens {
            claim("bridge_pools", &bridge.chain, token.name.clone())?;
        }
    }
    for pair in symbiosis {
        for nerve in &pair.nerves {
            claim("bridge_pools", &pair.chain_pair, nerve.name.clone())?;
        }
    }
    Ok(())
}

async fn read_pair(
    rpc: &RpcClient,
    factory: Address,
    token_0: Address,
    token_1: Address,
) -> Result<(Address, u128, u128), SourceError> {
    let pair = rpc
        .call(factory, &IUniswapV2Factory::getPairCall { tokenA: token_0, tokenB: token_1 })
        .await?;
    if pair == Address::ZERO {
        return Err(SourceError::NotFound(format!("pair {token_0:#x}/{token_1:#x}")));
    }
    let reserves = rpc.call(pair, &IUniswapV2Pair::getReservesCall {}).await?;
    Ok((pair, reserves.reserve0.to::<u128>(), reserves.reserve1.to::<u128>()))
}

async fn read_balance(rpc: &RpcClient, token: Address, holder: Address) -> Result<f64, SourceError> {
    let balance = rpc.call(token, &IERC20::balanceOfCall { owner: holder }).await?;
    scale(balance, 0)
}

async fn read_nerve(rpc: &RpcClient, nerve: &Nerve) -> Result<f64, SourceError> {
    if nerve.tokens.is_empty() {
        return Err(SourceError::Missing("nerve tokens"));
    }
    let mut total = 0.0;
    for &(token, decimals) in &nerve.tokens {
        let index = rpc.call(nerve.pool, &ISymbiosisPool::getTokenIndexCall { token }).await?;
        let balance = rpc.call(nerve.pool, &ISymbiosisPool::getTokenBalanceCall { index }).await?;
        total += scale(balance, decimals)?;
    }
    Ok(total)
}

#[async_trait]
impl SnapshotSource for OnChainPools {
    type Snapshot = PoolsSnapshot;

    fn name(&self) -> &'static str {
        "onchain"
    }

    async fn fetch(&self) -> PoolsSnapshot {
        let swaps = futures::future::join_all(self.swap.iter().map(|c| self.swap_partition(c)));
        let bridges = futures::future::join_all(self.multichain.iter().map(|b| self.multichain_partition(b)));
        let nerves = futures::future::join_all(self.symbiosis.iter().map(|p| self.symbiosis_partition(p)));
        let (swaps, bridges, nerves) = tokio::join!(swaps, bridges, nerves);

        let mut swap_pools: BTreeMap<String, Vec<SwapPair>> = BTreeMap::new();
        for (chain, pairs) in self.swap.iter().zip(swaps) {
            swap_pools.entry(chain.chain.clone()).or_default().extend(pairs);
        }

        let mut bridge_pools: BTreeMap<String, Vec<BridgePool>> = BTreeMap::new();
        for (bridge, pools) in self.multichain.iter().zip(bridges) {
            bridge_pools.entry(bridge.chain.clone()).or_default().extend(pools);
        }
        for (pair, pools) in self.symbiosis.iter().zip(nerves) {
            bridge_pools.entry(pair.chain_pair.clone()).or_default().extend(pools);
        }

        PoolsSnapshot { swap_pools, bridge_pools }
    }
}
