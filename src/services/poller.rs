use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::merge::{merge, Snapshot};
use super::store::{SnapshotStore, StoreError};
use crate::sources::SnapshotSource;

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub entries: usize,
    pub valid: usize,
}

#[derive(Debug, Default)]
pub struct PollerStats {
    pub cycles: AtomicU64,
    pub failures: AtomicU64,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl PollerStats {
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    fn record(&self, ok: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if ok {
            *self.last_success.write() = Some(Utc::now());
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Fetch, merge and store loop for one dataset.
pub struct Poller<S> {
    source: Arc<S>,
    store: Arc<dyn SnapshotStore>,
    delay: Duration,
    stats: Arc<PollerStats>,
}

impl<S> Poller<S>
where
    S: SnapshotSource + 'static,
{
    pub fn new(source: S, store: Arc<dyn SnapshotStore>, delay: Duration) -> Self {
        Self {
            source: Arc::new(source),
            store,
            delay,
            stats: Arc::new(PollerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    /// One fetch-merge-store pass.
    ///
    /// The previous snapshot is read before anything is written; if the read
    /// fails the cycle stops there, since merging against nothing would drop
    /// every stale entry.
    pub async fn run_cycle(&self) -> Result<CycleReport, PollerError> {
        let key = <S::Snapshot as Snapshot>::KEY;

        let fresh = self.source.fetch().await;
        let previous = self.store.get(key).await?;
        let merged = merge(fresh, previous.as_deref());

        let payload = serde_json::to_string(&merged)?;
        self.store.set(key, &payload).await?;

        Ok(CycleReport {
            entries: merged.len(),
            valid: merged.valid_len(),
        })
    }

    /// Runs cycles forever, `delay` apart. A failed or panicking cycle is
    /// logged and the loop carries on.
    pub async fn run(self) {
        let this = Arc::new(self);
        let key = <S::Snapshot as Snapshot>::KEY;
        tracing::info!(
            "✓ {} poller started: {} -> {} every {:?}",
            key,
            this.source.name(),
            this.store.name(),
            this.delay
        );

        loop {
            let started = Instant::now();
            let cycle = this.clone();
            let outcome = tokio::spawn(async move { cycle.run_cycle().await }).await;

            match outcome {
                Ok(Ok(report)) => {
                    this.stats.record(true);
                    tracing::info!(
                        "✓ {} snapshot stored: {}/{} valid ({}ms)",
                        key,
                        report.valid,
                        report.entries,
                        started.elapsed().as_millis()
                    );
                }
                Ok(Err(e)) => {
                    this.stats.record(false);
                    tracing::error!("❌ {} cycle failed, snapshot left as is: {}", key, e);
                }
                Err(e) => {
                    this.stats.record(false);
                    tracing::error!("❌ {} cycle aborted: {}", key, e);
                }
            }

            tokio::time::sleep(this.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GasEstimate, GasSnapshot, QuoteSnapshot};
    use crate::services::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Hands out scripted datasets; `None` panics.
    struct ScriptedGas {
        script: Mutex<VecDeque<Option<GasSnapshot>>>,
    }

    impl ScriptedGas {
        fn new(script: Vec<Option<GasSnapshot>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedGas {
        type Snapshot = GasSnapshot;

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self) -> GasSnapshot {
            let next = self.script.lock().pop_front().flatten();
            match next {
                Some(snapshot) => snapshot,
                None => panic!("oracle exploded"),
            }
        }
    }

    /// Answers every fetch and remembers when it was asked.
    struct TickingGas {
        fetched_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    }

    #[async_trait]
    impl SnapshotSource for TickingGas {
        type Snapshot = GasSnapshot;

        fn name(&self) -> &'static str {
            "ticking"
        }

        async fn fetch(&self) -> GasSnapshot {
            self.fetched_at.lock().push(tokio::time::Instant::now());
            gas(&[("bsc", Some(1.0))])
        }
    }

    struct StuckQuotes;

    #[async_trait]
    impl SnapshotSource for StuckQuotes {
        type Snapshot = QuoteSnapshot;

        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn fetch(&self) -> QuoteSnapshot {
            std::future::pending().await
        }
    }

    struct BrokenStore {
        writes: AtomicU64,
    }

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Io {
                path: key.into(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "down"),
            })
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn gas(entries: &[(&str, Option<f64>)]) -> GasSnapshot {
        entries
            .iter()
            .map(|(chain, value)| (chain.to_string(), value.map(|v| GasEstimate::new(v, None, None))))
            .collect()
    }

    async fn stored(store: &MemoryStore) -> GasSnapshot {
        let raw = store.get("gas").await.unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn partial_failure_keeps_previous_values() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedGas::new(vec![
            Some(gas(&[("bsc", Some(5.0)), ("ethereum", Some(8.0))])),
            Some(gas(&[("bsc", None), ("ethereum", Some(9.0)), ("polygon", Some(3.0))])),
        ]);
        let poller = Poller::new(source, store.clone(), Duration::ZERO);

        let first = poller.run_cycle().await.unwrap();
        assert_eq!(first, CycleReport { entries: 2, valid: 2 });

        let second = poller.run_cycle().await.unwrap();
        assert_eq!(second, CycleReport { entries: 3, valid: 3 });

        let snapshot = stored(&store).await;
        assert_eq!(snapshot.get("bsc").and_then(|e| e.value), Some(5.0));
        assert_eq!(snapshot.get("ethereum").and_then(|e| e.value), Some(9.0));
        assert_eq!(snapshot.get("polygon").and_then(|e| e.value), Some(3.0));
    }

    #[tokio::test]
    async fn corrupt_stored_snapshot_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store.set("gas", "{{{ definitely not json").await.unwrap();
        let poller = Poller::new(
            ScriptedGas::new(vec![Some(gas(&[("bsc", Some(1.0))]))]),
            store.clone(),
            Duration::ZERO,
        );

        poller.run_cycle().await.unwrap();

        assert_eq!(stored(&store).await.get("bsc").and_then(|e| e.value), Some(1.0));
    }

    #[tokio::test]
    async fn unreadable_store_skips_the_write() {
        let store = Arc::new(BrokenStore {
            writes: AtomicU64::new(0),
        });
        let poller = Poller::new(
            ScriptedGas::new(vec![Some(gas(&[("bsc", None)]))]),
            store.clone(),
            Duration::ZERO,
        );

        let result = poller.run_cycle().await;

        assert!(matches!(result, Err(PollerError::Store(_))));
        assert_eq!(store.writes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn loop_survives_a_panicking_cycle() {
        let store = Arc::new(MemoryStore::new());
        let source = ScriptedGas::new(vec![None, Some(gas(&[("bsc", Some(2.0))]))]);
        let poller = Poller::new(source, store.clone(), Duration::from_millis(5));
        let stats = poller.stats();

        let handle = tokio::spawn(poller.run());
        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.cycles.load(Ordering::Relaxed) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("poller stalled");
        handle.abort();

        assert!(stats.failures.load(Ordering::Relaxed) >= 1);
        assert!(stats.last_success().is_some());
        assert_eq!(stored(&store).await.get("bsc").and_then(|e| e.value), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_source_does_not_hold_up_other_datasets() {
        let store = Arc::new(MemoryStore::new());
        let fetched_at = Arc::new(Mutex::new(Vec::new()));
        let delay = Duration::from_secs(30);

        let gas_poller = Poller::new(
            TickingGas {
                fetched_at: fetched_at.clone(),
            },
            store.clone(),
            delay,
        );
        let quote_poller = Poller::new(StuckQuotes, store.clone(), delay);
        let gas_stats = gas_poller.stats();
        let quote_stats = quote_poller.stats();

        let handles = [tokio::spawn(gas_poller.run()), tokio::spawn(quote_poller.run())];
        tokio::time::sleep(Duration::from_secs(95)).await;
        for handle in &handles {
            handle.abort();
        }

        let fetched_at = fetched_at.lock().clone();
        assert!(fetched_at.len() >= 3, "only {} gas cycles", fetched_at.len());
        for pair in fetched_at.windows(2) {
            assert!(pair[1] - pair[0] >= delay, "cycles {:?} apart", pair[1] - pair[0]);
        }
        assert!(gas_stats.cycles.load(Ordering::Relaxed) >= 3);
        assert_eq!(quote_stats.cycles.load(Ordering::Relaxed), 0);
        assert!(store.get("gas").await.unwrap().is_some());
        assert!(store.get("quotes").await.unwrap().is_none());
    }
}
