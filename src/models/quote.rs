use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::merge::{fill_map, Snapshot, Validated};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenQuote {
    pub usd_price: Option<f64>,
    pub date_updated: DateTime<Utc>,
}

impl Validated for TokenQuote {
    fn is_valid(&self) -> bool {
        self.usd_price.is_some()
    }
}

/// Token symbol -> USD quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteSnapshot(pub BTreeMap<String, Option<TokenQuote>>);

impl QuoteSnapshot {
    #[cfg(test)]
    pub fn get(&self, symbol: &str) -> Option<&TokenQuote> {
        self.0.get(symbol).and_then(Option::as_ref)
    }
}

impl FromIterator<(String, Option<TokenQuote>)> for QuoteSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Option<TokenQuote>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Snapshot for QuoteSnapshot {
    const KEY: &'static str = "quotes";

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
