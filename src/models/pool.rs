use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::merge::{fill_partition, Identified, Snapshot, Validated};

/// Reserves of one AMM pair. Usable only when both reserves were read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPair {
    pub protocol_name: String,
    pub pair_name: String,
    pub token_0: String,
    pub token_1: String,
    pub pair_address: Option<String>,
    pub token_0_supply: Option<u128>,
    pub token_1_supply: Option<u128>,
    pub date_updated: DateTime<Utc>,
}

impl Validated for SwapPair {
    fn is_valid(&self) -> bool {
        self.token_0_supply.is_some() && self.token_1_supply.is_some()
    }
}

impl Identified for SwapPair {
    fn identity(&self) -> &str {
        &self.pair_name
    }
}

/// Liquidity held by a bridge for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgePool {
    pub protocol_name: String,
    pub token_name: String,
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub pair_address: Option<String>,
    pub token_supply: Option<f64>,
    pub date_updated: DateTime<Utc>,
}

impl Validated for BridgePool {
    fn is_valid(&self) -> bool {
        self.token_supply.is_some()
    }
}

impl Identified for BridgePool {
    fn identity(&self) -> &str {
        &self.token_name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolsSnapshot {
    #[serde(default)]
    pub swap_pools: BTreeMap<String, Vec<SwapPair>>,
    #[serde(default)]
    pub bridge_pools: BTreeMap<String, Vec<BridgePool>>,
}

impl Snapshot for PoolsSnapshot {
    const KEY: &'static str = "pools";

    fn fill_from(&mut self, old: Self) {
        for (chain, old_pairs) in old.swap_pools {
            fill_partition(self.swap_pools.entry(chain).or_default(), old_pairs);
        }
        for (partition, old_pools) in old.bridge_pools {
            fill_partition(self.bridge_pools.entry(partition).or_default(), old_pools);
        }
    }

    fn len(&self) -> usize {
        self.swap_pools.values().map(Vec::len).sum::<usize>()
            + self.bridge_pools.values().map(Vec::len).sum::<usize>()
    }

    fn valid_len(&self) -> usize {
        let swaps = self.swap_pools.values().flatten().filter(|p| p.is_valid()).count();
        let bridges = self.bridge_pools.values().flatten().filter(|p| p.is_valid()).count();
        swaps + bridges
    }
}
