//! Instrument catalog.

use klmon_core::Symbol;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

/// `GET /fapi/v1/exchangeInfo` response (fields used here only).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

/// One instrument of the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    #[serde(default)]
    pub contract_type: String,
    pub quote_asset: String,
}

impl SymbolInfo {
    pub fn is_perpetual_usdt(&self) -> bool {
        self.contract_type == "PERPETUAL" && self.quote_asset == "USDT" && self.status == "TRADING"
    }
}

/// Trading USDT-margined perpetuals, sorted and deduplicated.
pub fn select_perpetual_usdt(info: &ExchangeInfo) -> Vec<Symbol> {
    let selected: BTreeSet<Symbol> = info
        .symbols
        .iter()
        .filter(|s| s.is_perpetual_usdt())
        .filter_map(|s| match Symbol::new(&s.symbol) {
            Ok(symbol) => Some(symbol),
            Err(e) => {
                debug!(symbol = %s.symbol, error = %e, "Skipping unusable catalog symbol");
                None
            }
        })
        .collect();
    selected.into_iter().collect()
}
