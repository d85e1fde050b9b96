//! Loader configuration: what to fetch and how hard to try.

use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::Interval;
use crate::domain::market::timezone::parse_offset;
use crate::domain::ports::DateRange;
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub symbols: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub interval: Interval,
    /// Target UTC offset, e.g. `"+09:00"` or `"UTC"`.
    pub timezone: String,
    pub retry_count: usize,
    pub retry_delay_secs: f64,
    pub retry_max_delay_secs: f64,
    pub max_concurrency: usize,
    pub save_raw: bool,
    pub save_dir: PathBuf,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            start: None,
            end: None,
            interval: Interval::Daily,
            timezone: "+09:00".to_string(),
            retry_count: 3,
            retry_delay_secs: 1.0,
            retry_max_delay_secs: 10.0,
            max_concurrency: 4,
            save_raw: false,
            save_dir: PathBuf::from("data/ohlcv"),
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry_count == 0 {
            return Err(PipelineError::Config(
                "load.retry_count must be at least 1".to_string(),
            ));
        }
        if !(self.retry_delay_secs.is_finite() && self.retry_delay_secs >= 0.0) {
            return Err(PipelineError::Config(format!(
                "load.retry_delay_secs must be >= 0, got {}",
                self.retry_delay_secs
            )));
        }
        if !(self.retry_max_delay_secs.is_finite()
            && self.retry_max_delay_secs >= self.retry_delay_secs)
        {
            return Err(PipelineError::Config(format!(
                "load.retry_max_delay_secs ({}) must be >= retry_delay_secs ({})",
                self.retry_max_delay_secs, self.retry_delay_secs
            )));
        }
        if self.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "load.max_concurrency must be at least 1".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(PipelineError::Config(format!(
                "load.start {} is after load.end {}",
                start, end
            )));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(PipelineError::Config(
                "load.symbols contains an empty symbol".to_string(),
            ));
        }
        self.target_offset()?;
        Ok(())
    }

    pub fn target_offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone)
            .map_err(|_| PipelineError::Config(format!("load.timezone: {}", self.timezone)))
    }

    pub fn date_range(&self) -> DateRange {
        DateRange::new(self.start, self.end)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_max_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_defaults_are_valid() {
        let config = LoadConfig::default();
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.max_delay(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let config = LoadConfig {
            start: NaiveDate::from_ymd_opt(2024, 2, 1),
            end: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_unparseable_timezone_rejected() {
        let config = LoadConfig {
            timezone: "Asia/Tokyo".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
