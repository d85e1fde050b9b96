//! Canonical OHLCV column names shared by every pipeline stage.

use crate::domain::dataset::frame::Frame;

pub const TIMESTAMP: &str = "timestamp";
pub const SYMBOL: &str = "symbol";
pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";
pub const ADJ_CLOSE: &str = "adj_close";
pub const VOLUME: &str = "volume";

/// Value columns in canonical order. `adj_close` is optional.
pub const VALUE_COLUMNS: &[&str] = &[OPEN, HIGH, LOW, CLOSE, ADJ_CLOSE, VOLUME];

/// Value columns a provider response must carry.
pub const REQUIRED_VALUE_COLUMNS: &[&str] = &[OPEN, HIGH, LOW, CLOSE, VOLUME];

/// Columns that are winsorized by the preprocessor when present.
pub const PRICE_COLUMNS: &[&str] = &[OPEN, HIGH, LOW, CLOSE, ADJ_CLOSE];

/// Price basis for return-style computations: `adj_close` when it carries at
/// least one value, else `close`.
///
/// Callers pass one symbol's partition. A combined frame holds `adj_close` for
/// every symbol as soon as one provider supplied it, and symbols without it
/// read as all-missing there.
pub fn price_basis(frame: &Frame) -> &'static str {
    match frame.float(ADJ_CLOSE) {
        Some(adj) if adj.iter().any(|v| v.is_finite()) => ADJ_CLOSE,
        _ => CLOSE,
    }
}
