use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::merge::{fill_map, Snapshot, Validated};

/// Fee estimate for one chain. `value` is the estimated fee and is what makes
/// the entry usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub value: Option<f64>,
    #[serde(default)]
    pub gas_price: Option<f64>,
    #[serde(default)]
    pub token_price: Option<f64>,
    pub date_updated: DateTime<Utc>,
}

impl GasEstimate {
    pub fn new(value: f64, gas_price: Option<f64>, token_price: Option<f64>) -> Self {
        Self {
            value: Some(value),
            gas_price,
            token_price,
            date_updated: Utc::now(),
        }
    }
}

impl Validated for GasEstimate {
    fn is_valid(&self) -> bool {
        self.value.is_some()
    }
}

/// Chain name -> estimate, `None` when that chain's fetch failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GasSnapshot(pub BTreeMap<String, Option<GasEstimate>>);

impl GasSnapshot {
    #[cfg(test)]
    pub fn get(&self, chain: &str) -> Option<&GasEstimate> {
        self.0.get(chain).and_then(Option::as_ref)
    }
}

impl FromIterator<(String, Option<GasEstimate>)> for GasSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Option<GasEstimate>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Snapshot for GasSnapshot {
    const KEY: &'static str = "gas";

    fn fill_from(&mut self, old: Self) {
        fill_map(&mut self.0, old.0);
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn valid_len(&self) -> usize {
        self.0.values().filter(|entry| entry.is_valid()).count()
    }
}
