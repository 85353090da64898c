//! Symbol history store.
//!
//! One bounded rolling buffer of klines per (symbol, timeframe). A kline
//! with the same `open_time` as the newest entry replaces it (partial
//! candle update); a newer one is appended and the oldest entry evicted
//! once capacity is exceeded. Callers only ever receive copies.

use dashmap::DashMap;
use klmon_core::{Kline, SeriesKey};
use klmon_telemetry::Metrics;
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Default klines kept per series.
pub const DEFAULT_CAPACITY: usize = 100;

/// How an update changed a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Same `open_time` as the newest entry; replaced in place.
    Replaced,
    /// New `open_time`; appended.
    Appended,
    /// Older than the newest entry; ignored.
    Stale,
}

/// Result of [`HistoryStore::update`].
#[derive(Debug, Clone)]
pub struct HistoryUpdate {
    pub kind: UpdateKind,
    /// Copy of the buffer after the update.
    pub snapshot: Vec<Kline>,
}

/// Bounded, `open_time`-ordered kline buffer.
#[derive(Debug)]
struct RollingBuffer {
    klines: VecDeque<Kline>,
    capacity: usize,
}

impl RollingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            klines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn apply(&mut self, kline: Kline) -> UpdateKind {
        match self.klines.back_mut() {
            Some(last) if last.open_time == kline.open_time => {
                *last = kline;
                UpdateKind::Replaced
            }
            Some(last) if last.open_time > kline.open_time => UpdateKind::Stale,
            _ => {
                self.klines.push_back(kline);
                while self.klines.len() > self.capacity {
                    self.klines.pop_front();
                }
                UpdateKind::Appended
            }
        }
    }

    /// Merge a batch, keeping existing entries on `open_time` collisions.
    fn merge(&mut self, klines: Vec<Kline>) {
        let mut merged: BTreeMap<i64, Kline> =
            klines.into_iter().map(|k| (k.open_time, k)).collect();
        for existing in self.klines.drain(..) {
            merged.insert(existing.open_time, existing);
        }
        let skip = merged.len().saturating_sub(self.capacity);
        self.klines = merged.into_values().skip(skip).collect();
    }

    fn snapshot(&self) -> Vec<Kline> {
        self.klines.iter().cloned().collect()
    }
}

type SeriesEntry = Arc<RwLock<RollingBuffer>>;

/// Concurrent store of rolling buffers keyed by series.
pub struct HistoryStore {
    series: DashMap<SeriesKey, SeriesEntry>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store keeping at most `capacity` klines per series.
    pub fn new(capacity: usize) -> Self {
        Self {
            series: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get or create series entry.
    fn get_or_create(&self, key: &SeriesKey) -> SeriesEntry {
        if let Some(entry) = self.series.get(key) {
            return entry.clone();
        }
        let entry = self
            .series
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(RollingBuffer::new(self.capacity))))
            .clone();
        Metrics::history_series(self.series.len());
        entry
    }

    /// Apply one kline and return a copy of the resulting buffer.
    pub fn update(&self, key: &SeriesKey, kline: Kline) -> HistoryUpdate {
        let entry = self.get_or_create(key);
        let mut buffer = entry.write();
        let open_time = kline.open_time;
        let kind = buffer.apply(kline);
        if kind == UpdateKind::Stale {
            debug!(series = %key, open_time, "Ignoring out-of-order kline");
        }
        HistoryUpdate {
            kind,
            snapshot: buffer.snapshot(),
        }
    }

    /// Copy of a series, if present.
    pub fn get(&self, key: &SeriesKey) -> Option<Vec<Kline>> {
        self.series.get(key).map(|entry| entry.read().snapshot())
    }

    /// Install historical klines for a series.
    ///
    /// Input may be unordered and contain duplicates; the stored series is
    /// sorted, unique by `open_time` and trimmed to capacity. Entries
    /// already present win over seeded ones. Returns the stored length.
    pub fn seed(&self, key: &SeriesKey, klines: Vec<Kline>) -> usize {
        let entry = self.get_or_create(key);
        let mut buffer = entry.write();
        buffer.merge(klines);
        buffer.klines.len()
    }

    /// Drop a series. Returns whether it was held.
    pub fn remove(&self, key: &SeriesKey) -> bool {
        let removed = self.series.remove(key).is_some();
        if removed {
            Metrics::history_series(self.series.len());
        }
        removed
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.contains_key(key)
    }

    /// Number of series held.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn keys(&self) -> Vec<SeriesKey> {
        self.series.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klmon_core::{Symbol, Timeframe};

    fn test_key() -> SeriesKey {
        SeriesKey::new(Symbol::new("BTCUSDT").unwrap(), Timeframe::M3)
    }

    fn kline(open_time: i64, close: f64) -> Kline {
        Kline {
            open_time,
            close_time: open_time + 179_999,
            open: 100.0,
            high: close.max(100.0),
            low: close.min(100.0),
            close,
            volume: 1.0,
            quote_volume: 100.0,
            taker_buy_base_volume: 0.5,
            taker_buy_quote_volume: 50.0,
            trades: 10,
        }
    }

    fn assert_strictly_increasing(klines: &[Kline]) {
        assert!(klines.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[test]
    fn test_duplicate_open_time_replaces() {
        let store = HistoryStore::default();
        let key = test_key();

        assert_eq!(store.update(&key, kline(0, 101.0)).kind, UpdateKind::Appended);
        assert_eq!(store.update(&key, kline(0, 102.0)).kind, UpdateKind::Replaced);
        let update = store.update(&key, kline(180_000, 103.0));

        assert_eq!(update.kind, UpdateKind::Appended);
        assert_eq!(update.snapshot.len(), 2);
        assert_eq!(update.snapshot[0].close, 102.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = HistoryStore::new(100);
        let key = test_key();

        for i in 0..150 {
            store.update(&key, kline(i * 180_000, 100.0 + i as f64));
        }

        let klines = store.get(&key).unwrap();
        assert_eq!(klines.len(), 100);
        assert_eq!(klines[0].open_time, 50 * 180_000);
        assert_eq!(klines[99].open_time, 149 * 180_000);
        assert_strictly_increasing(&klines);
    }

    #[test]
    fn test_out_of_order_kline_is_stale() {
        let store = HistoryStore::default();
        let key = test_key();
        store.update(&key, kline(360_000, 101.0));

        let update = store.update(&key, kline(180_000, 99.0));
        assert_eq!(update.kind, UpdateKind::Stale);
        assert_eq!(update.snapshot.len(), 1);
    }

    #[test]
    fn test_arbitrary_sequences_keep_invariants() {
        let store = HistoryStore::new(100);
        let key = test_key();
        // Deterministic pseudo-random walk over open times with repeats
        // and regressions.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..5_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let slot = (state % 400) as i64;
            let update = store.update(&key, kline(slot * 60_000, 100.0));
            assert!(update.snapshot.len() <= 100);
            assert_strictly_increasing(&update.snapshot);
        }
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = HistoryStore::default();
        let key = test_key();
        let before = store.update(&key, kline(0, 101.0)).snapshot;
        store.update(&key, kline(0, 150.0));

        assert_eq!(before[0].close, 101.0);
        assert_eq!(store.get(&key).unwrap()[0].close, 150.0);
    }

    #[test]
    fn test_get_missing_series() {
        let store = HistoryStore::default();
        assert!(store.get(&test_key()).is_none());
        assert!(!store.contains(&test_key()));
    }

    #[test]
    fn test_seed_sorts_dedups_and_trims() {
        let store = HistoryStore::new(3);
        let key = test_key();
        let seeded = store.seed(
            &key,
            vec![
                kline(4 * 180_000, 104.0),
                kline(180_000, 101.0),
                kline(3 * 180_000, 103.0),
                kline(180_000, 101.5),
                kline(2 * 180_000, 102.0),
            ],
        );

        assert_eq!(seeded, 3);
        let klines = store.get(&key).unwrap();
        let opens: Vec<i64> = klines.iter().map(|k| k.open_time).collect();
        assert_eq!(opens, vec![2 * 180_000, 3 * 180_000, 4 * 180_000]);
    }

    #[test]
    fn test_remove_series() {
        let store = HistoryStore::default();
        let key = test_key();
        store.update(&key, kline(0, 100.0));

        assert!(store.remove(&key));
        assert!(!store.remove(&key));
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_seed_keeps_live_entries() {
        let store = HistoryStore::default();
        let key = test_key();
        store.update(&key, kline(180_000, 150.0));

        store.seed(&key, vec![kline(0, 100.0), kline(180_000, 101.0)]);

        let klines = store.get(&key).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].close, 150.0);
    }

    #[test]
    fn test_concurrent_series_updates() {
        let store = Arc::new(HistoryStore::default());
        let handles: Vec<_> = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT"]
            .into_iter()
            .map(|symbol| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let key = SeriesKey::new(Symbol::new(symbol).unwrap(), Timeframe::M1);
                    for i in 0..500 {
                        store.update(&key, kline(i * 60_000, 100.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 4);
        for key in store.keys() {
            assert_eq!(store.get(&key).unwrap().len(), 100);
        }
    }
}
