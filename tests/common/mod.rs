#![allow(dead_code)]

use chrono::{Duration, FixedOffset, NaiveDate, TimeZone};
use dailytrade::domain::dataset::{Frame, Timestamp};
use dailytrade::domain::ports::RawTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap()
}

pub fn timestamp(day: usize) -> Timestamp {
    let tz = FixedOffset::east_opt(9 * 3600).unwrap();
    let date = start_date() + Duration::days(day as i64);
    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
        .unwrap()
}

/// OHLCV frame sorted by (timestamp, symbol) with one row per calendar day.
/// `close(symbol_index, day)` drives every price column.
pub fn ohlcv_frame<F>(symbols: &[&str], days: usize, close: F) -> Frame
where
    F: Fn(usize, usize) -> f64,
{
    let mut ts = Vec::new();
    let mut syms = Vec::new();
    let mut open = Vec::new();
    let mut high = Vec::new();
    let mut low = Vec::new();
    let mut closes = Vec::new();
    let mut volume = Vec::new();
    for (s, symbol) in symbols.iter().enumerate() {
        for d in 0..days {
            let c = close(s, d);
            ts.push(timestamp(d));
            syms.push(symbol.to_string());
            open.push(c * 0.995);
            high.push(c * 1.01);
            low.push(c * 0.99);
            closes.push(c);
            volume.push(1_000.0 + ((d * 7 + s * 3) % 11) as f64 * 100.0);
        }
    }
    let mut frame = Frame::new(ts, syms).unwrap();
    frame.insert_float("open", open).unwrap();
    frame.insert_float("high", high).unwrap();
    frame.insert_float("low", low).unwrap();
    frame.insert_float("close", closes).unwrap();
    frame.insert_float("volume", volume).unwrap();
    frame.sorted_by_time_symbol()
}

pub fn linear_trend(symbols: &[&str], days: usize) -> Frame {
    ohlcv_frame(symbols, days, |s, d| 100.0 + 10.0 * s as f64 + d as f64)
}

/// Seeded random walk, one independent path per symbol.
pub fn random_walk(symbols: &[&str], days: usize, seed: u64) -> Frame {
    let paths: Vec<Vec<f64>> = (0..symbols.len())
        .map(|s| {
            let mut rng = StdRng::seed_from_u64(seed + s as u64);
            let mut price = 100.0;
            (0..days)
                .map(|_| {
                    price *= 1.0 + rng.random_range(-0.02..0.02);
                    price
                })
                .collect()
        })
        .collect();
    ohlcv_frame(symbols, days, |s, d| paths[s][d])
}

/// Provider-style table with yfinance headers.
pub fn raw_table(days: usize) -> RawTable {
    RawTable::new(
        ["Date", "Open", "High", "Low", "Close", "Adj Close", "Volume"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        (0..days)
            .map(|d| {
                let date = start_date() + Duration::days(d as i64);
                let p = 100.0 + d as f64;
                vec![
                    date.format("%Y-%m-%d").to_string(),
                    (p - 0.5).to_string(),
                    (p + 1.0).to_string(),
                    (p - 1.0).to_string(),
                    p.to_string(),
                    p.to_string(),
                    "1000".to_string(),
                ]
            })
            .collect(),
    )
}

/// Rows of one symbol, in time order.
pub fn symbol_rows(frame: &Frame, symbol: &str) -> Frame {
    frame
        .partition_by_symbol()
        .into_iter()
        .find(|(s, _)| s == symbol)
        .map(|(_, f)| f)
        .unwrap()
}

/// NaN-aware equality.
pub fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() <= 1e-9 * a.abs().max(1.0)
}
