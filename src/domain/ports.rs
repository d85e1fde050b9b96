use crate::domain::errors::Result;
use crate::domain::market::Interval;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Inclusive calendar range; an open bound means "as far as the provider goes".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

/// Raw provider response: header row plus string records, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, records: Vec<Vec<String>>) -> Self {
        Self { headers, records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Source of raw OHLCV bars for one symbol.
///
/// Implementations report transient failures as `PipelineError::Fetch` (or
/// `Io`) so the loader's retry policy can tell them apart from contract errors.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, symbol: &str, range: DateRange, interval: Interval) -> Result<RawTable>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_range_bounds_are_inclusive() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let range = DateRange::new(Some(d(2)), Some(d(5)));
        assert!(!range.contains(d(1)));
        assert!(range.contains(d(2)));
        assert!(range.contains(d(5)));
        assert!(!range.contains(d(6)));
        assert!(DateRange::default().contains(d(1)));
    }
}
