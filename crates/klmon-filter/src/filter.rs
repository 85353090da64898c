//! Adaptive symbol filter.
//!
//! Score records live in a sharded map keyed by symbol; observations and
//! maintenance sweeps both go through the map's per-shard locking. The
//! published ranking is an immutable snapshot swapped wholesale.

use crate::config::FilterConfig;
use crate::error::FilterResult;
use crate::score::{raw_score, smooth};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use klmon_core::{Alert, Features, Symbol};
use klmon_telemetry::Metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Per-symbol score record.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolScore {
    pub last_active_time: DateTime<Utc>,
    pub alert_count: u64,
    /// Diagnostics only.
    pub volume_spike_count: u64,
    pub last_alert_time: Option<DateTime<Utc>>,
    /// Smoothed score, conceptually 0..=100.
    pub score: f64,
}

/// Why a symbol was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Inactive,
    LowScore,
    AlertStale,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::LowScore => "low_score",
            Self::AlertStale => "alert_stale",
        }
    }
}

/// Top-N symbols at a single point in time.
#[derive(Debug, Clone, Default)]
pub struct RankingSnapshot {
    /// Highest score first.
    pub symbols: Vec<Symbol>,
    pub produced_at: Option<DateTime<Utc>>,
}

/// Adaptive scoring filter.
pub struct AdaptiveFilter {
    config: FilterConfig,
    scores: DashMap<Symbol, SymbolScore>,
    ranking: RwLock<Arc<RankingSnapshot>>,
}

impl AdaptiveFilter {
    pub fn new(config: FilterConfig) -> FilterResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scores: DashMap::new(),
            ranking: RwLock::new(Arc::new(RankingSnapshot::default())),
        })
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Fold one feature computation and its alerts into the symbol's record.
    pub fn observe(&self, features: &Features, alerts: &[Alert], now: DateTime<Utc>) -> f64 {
        let raw = raw_score(features);
        let spike = features.volume_ratio5 > self.config.volume_spike_ratio;
        let alpha = self.config.smoothing_alpha;

        let score = {
            let mut entry = self
                .scores
                .entry(features.symbol.clone())
                .and_modify(|record| record.score = smooth(record.score, raw, alpha))
                .or_insert_with(|| SymbolScore {
                    last_active_time: now,
                    alert_count: 0,
                    volume_spike_count: 0,
                    last_alert_time: None,
                    score: raw,
                });
            let record = entry.value_mut();
            record.last_active_time = now;
            if spike {
                record.volume_spike_count += 1;
            }
            if !alerts.is_empty() {
                record.alert_count += alerts.len() as u64;
                record.last_alert_time = Some(now);
            }
            record.score
        };

        Metrics::filter_score(score);
        Metrics::filter_tracked(self.scores.len());
        debug!(
            symbol = %features.symbol,
            raw,
            score,
            alerts = alerts.len(),
            "Score updated"
        );
        score
    }

    fn eviction_reason(&self, record: &SymbolScore, now: DateTime<Utc>) -> Option<EvictionReason> {
        if now - record.last_active_time > self.config.inactivity_timeout() {
            return Some(EvictionReason::Inactive);
        }
        if record.score < self.config.score_floor {
            return Some(EvictionReason::LowScore);
        }
        match record.last_alert_time {
            Some(last) if record.alert_count > 0 && now - last > self.config.alert_staleness() => {
                Some(EvictionReason::AlertStale)
            }
            _ => None,
        }
    }

    /// Remove every symbol matching an eviction rule.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> Vec<(Symbol, EvictionReason)> {
        let mut evicted = Vec::new();
        self.scores.retain(|symbol, record| match self.eviction_reason(record, now) {
            Some(reason) => {
                evicted.push((symbol.clone(), reason));
                false
            }
            None => true,
        });

        for (symbol, reason) in &evicted {
            Metrics::filter_evicted(reason.as_str());
            debug!(symbol = %symbol, reason = reason.as_str(), "Symbol evicted");
        }
        Metrics::filter_tracked(self.scores.len());
        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                remaining = self.scores.len(),
                "Eviction sweep"
            );
        }
        evicted
    }

    /// Rank all current scores and publish the top N.
    pub fn publish_ranking(&self, now: DateTime<Utc>) -> Arc<RankingSnapshot> {
        let mut ranked: Vec<(Symbol, f64)> = self
            .scores
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().score))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.config.top_n);

        let snapshot = Arc::new(RankingSnapshot {
            symbols: ranked.into_iter().map(|(symbol, _)| symbol).collect(),
            produced_at: Some(now),
        });
        *self.ranking.write() = snapshot.clone();
        debug!(count = snapshot.symbols.len(), "Ranking published");
        snapshot
    }

    /// Latest published ranking.
    pub fn ranking(&self) -> Arc<RankingSnapshot> {
        self.ranking.read().clone()
    }

    pub fn filtered_top_symbols(&self) -> Vec<Symbol> {
        self.ranking().symbols.clone()
    }

    /// Copy of a symbol's record.
    pub fn score(&self, symbol: &Symbol) -> Option<SymbolScore> {
        self.scores.get(symbol).map(|entry| entry.value().clone())
    }

    pub fn is_tracked(&self, symbol: &Symbol) -> bool {
        self.scores.contains_key(symbol)
    }

    pub fn tracked_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.scores.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Run eviction and ranking on their intervals until cancelled.
    ///
    /// An eviction that removes symbols republishes the ranking right away
    /// so evicted symbols leave the filtered set.
    pub fn spawn_maintenance(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let eviction_every = self.config.eviction_interval();
            let ranking_every = self.config.ranking_interval();
            let mut eviction = interval_at(Instant::now() + eviction_every, eviction_every);
            let mut ranking = interval_at(Instant::now() + ranking_every, ranking_every);
            eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ranking.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = eviction.tick() => {
                        let now = Utc::now();
                        if !self.evict_stale(now).is_empty() {
                            self.publish_ranking(now);
                        }
                    }
                    _ = ranking.tick() => {
                        self.publish_ranking(Utc::now());
                    }
                }
            }
            debug!("Filter maintenance stopped");
        })
    }
}
