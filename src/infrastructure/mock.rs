use crate::domain::errors::{PipelineError, Result};
use crate::domain::market::Interval;
use crate::domain::ports::{DateRange, MarketDataProvider, RawTable};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One scripted provider outcome.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Table(RawTable),
    /// Transient failure with the given reason.
    Fail(String),
    Empty,
}

/// In-memory provider with per-symbol scripted responses.
///
/// Each fetch pops the next scripted response for the symbol; the last one
/// repeats once the script is down to a single entry. Unknown symbols get
/// an empty table.
#[derive(Clone, Default)]
pub struct MockMarketDataProvider {
    scripts: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<RwLock<HashMap<String, usize>>>,
}

impl MockMarketDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answers `table` for `symbol`.
    pub async fn with_table(self, symbol: &str, table: RawTable) -> Self {
        self.script(symbol, vec![MockResponse::Table(table)]).await
    }

    pub async fn script(self, symbol: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .write()
            .await
            .insert(symbol.to_string(), responses.into());
        self
    }

    pub async fn call_count(&self, symbol: &str) -> usize {
        self.calls.read().await.get(symbol).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    async fn fetch(&self, symbol: &str, _range: DateRange, interval: Interval) -> Result<RawTable> {
        *self
            .calls
            .write()
            .await
            .entry(symbol.to_string())
            .or_insert(0) += 1;

        let response = {
            let mut scripts = self.scripts.write().await;
            match scripts.get_mut(symbol) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        debug!(
            "MockMarketDataProvider: {} ({}) -> {:?}",
            symbol,
            interval,
            response.as_ref().map(|r| match r {
                MockResponse::Table(t) => t.len(),
                _ => 0,
            })
        );

        match response {
            Some(MockResponse::Table(table)) => Ok(table),
            Some(MockResponse::Fail(reason)) => Err(PipelineError::Fetch {
                symbol: symbol.to_string(),
                attempts: 1,
                reason,
            }),
            Some(MockResponse::Empty) | None => Ok(RawTable::default()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
