//! Active stream registry.
//!
//! Records which symbol streams should be live, per timeframe. The
//! transport never remembers subscriptions itself; after every reconnect
//! the owner of this registry replays it through the batcher.

use klmon_core::{SeriesKey, Symbol, Timeframe};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
struct Inner {
    /// Symbols per timeframe, in insertion order.
    by_timeframe: BTreeMap<Timeframe, Vec<Symbol>>,
    members: HashSet<SeriesKey>,
}

/// Set of streams that should be subscribed.
#[derive(Default)]
pub struct ActiveStreams {
    inner: RwLock<Inner>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record symbols for a timeframe. Returns the ones not yet present.
    pub fn record(&self, timeframe: Timeframe, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut inner = self.inner.write();
        let mut added = Vec::new();
        for symbol in symbols {
            let key = SeriesKey::new(symbol.clone(), timeframe);
            if inner.members.insert(key) {
                added.push(symbol.clone());
            }
        }
        inner
            .by_timeframe
            .entry(timeframe)
            .or_default()
            .extend(added.iter().cloned());
        added
    }

    /// Forget a series.
    pub fn remove(&self, key: &SeriesKey) -> bool {
        let mut inner = self.inner.write();
        if !inner.members.remove(key) {
            return false;
        }
        if let Some(symbols) = inner.by_timeframe.get_mut(&key.timeframe) {
            symbols.retain(|s| s != &key.symbol);
        }
        true
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.inner.read().members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Symbols to resubscribe, grouped by timeframe.
    pub fn replay_plan(&self) -> Vec<(Timeframe, Vec<Symbol>)> {
        self.inner
            .read()
            .by_timeframe
            .iter()
            .filter(|(_, symbols)| !symbols.is_empty())
            .map(|(tf, symbols)| (*tf, symbols.clone()))
            .collect()
    }
}
