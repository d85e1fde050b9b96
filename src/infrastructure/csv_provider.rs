//! Market-data provider backed by a directory of per-symbol CSV exports.

use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::Interval;
use crate::domain::ports::{DateRange, MarketDataProvider, RawTable};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads `<dir>/<symbol>_<interval>.csv`, falling back to `<dir>/<symbol>.csv`.
///
/// Rows outside the requested date range are skipped when their date column
/// parses; anything else is passed through for the loader to normalize.
pub struct CsvDirectoryProvider {
    dir: PathBuf,
}

impl CsvDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn resolve(&self, symbol: &str, interval: Interval) -> Option<PathBuf> {
        [
            self.dir.join(format!("{}_{}.csv", symbol, interval.as_str())),
            self.dir.join(format!("{}.csv", symbol)),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    fn read(path: &Path, range: DateRange) -> Result<RawTable> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let date_idx = headers.iter().position(|h| {
            matches!(
                h.trim().to_lowercase().as_str(),
                "date" | "datetime" | "timestamp"
            )
        });

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            let keep = match date_idx.and_then(|i| record.get(i)) {
                Some(raw) => leading_date(raw).is_none_or(|d| range.contains(d)),
                None => true,
            };
            if keep {
                records.push(record.iter().map(str::to_string).collect());
            }
        }
        Ok(RawTable::new(headers, records))
    }
}

fn leading_date(raw: &str) -> Option<NaiveDate> {
    raw.get(..10)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

#[async_trait]
impl MarketDataProvider for CsvDirectoryProvider {
    async fn fetch(&self, symbol: &str, range: DateRange, interval: Interval) -> Result<RawTable> {
        let Some(path) = self.resolve(symbol, interval) else {
            debug!("CsvDirectoryProvider: no file for {} in {:?}", symbol, self.dir);
            return Ok(RawTable::default());
        };
        debug!("CsvDirectoryProvider: reading {:?}", path);
        Self::read(&path, range)
    }

    fn name(&self) -> &str {
        "csv"
    }
}
