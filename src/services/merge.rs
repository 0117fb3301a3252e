//! Fill-on-miss reconciliation of a freshly fetched dataset with the snapshot
//! persisted by the previous cycle.
//!
//! A fresh entry that carries its defining value always wins. Anything the
//! previous snapshot knew about that this cycle failed to refresh is carried
//! forward, so a partial outage only ever leaves stale entries behind, never
//! missing ones.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Entry carries the value that makes it usable downstream.
pub trait Validated {
    fn is_valid(&self) -> bool;
}

impl<T: Validated> Validated for Option<T> {
    fn is_valid(&self) -> bool {
        self.as_ref().is_some_and(T::is_valid)
    }
}

/// Record that is matched across cycles by a natural key.
pub trait Identified {
    fn identity(&self) -> &str;
}

/// A dataset persisted whole under a fixed store key.
pub trait Snapshot: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KEY: &'static str;

    /// Carries forward every entry of `old` this snapshot failed to refresh.
    fn fill_from(&mut self, old: Self);

    fn len(&self) -> usize;

    fn valid_len(&self) -> usize;
}

/// Reconciles `new` with the serialized previous snapshot.
///
/// A missing or undecodable `old` yields `new` untouched; the latter is
/// logged and never aborts the cycle.
pub fn merge<S: Snapshot>(new: S, old: Option<&str>) -> S {
    let Some(raw) = old else {
        return new;
    };

    match serde_json::from_str::<S>(raw) {
        Ok(previous) => {
            let mut merged = new;
            merged.fill_from(previous);
            merged
        }
        Err(e) => {
            tracing::warn!("⚠️ Stored {} snapshot is unreadable, keeping fresh data only: {}", S::KEY, e);
            new
        }
    }
}

/// Keyed datasets (gas per chain, quotes per token).
pub fn fill_map<V: Validated>(new: &mut BTreeMap<String, V>, old: BTreeMap<String, V>) {
    for (key, previous) in old {
        let refreshed = new.get(&key).is_some_and(Validated::is_valid);
        if !refreshed {
            new.insert(key, previous);
        }
    }
}

/// One (pool category, chain) partition.
///
/// Fresh records keep their fetch order; an invalid fresh record is swapped
/// for its previous version in place, and previous records this cycle did not
/// produce at all are appended after the fresh ones.
pub fn fill_partition<R: Validated + Identified>(new: &mut Vec<R>, old: Vec<R>) {
    let positions: HashMap<String, usize> = new
        .iter()
        .enumerate()
        .map(|(i, record)| (record.identity().to_owned(), i))
        .collect();
    let mut appended = HashSet::new();

    for previous in old {
        match positions.get(previous.identity()) {
            Some(&i) => {
                if !new[i].is_valid() {
                    new[i] = previous;
                }
            }
            None => {
                if appended.insert(previous.identity().to_owned()) {
                    new.push(previous);
                }
            }
        }
    }
}
