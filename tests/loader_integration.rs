mod common;

use common::raw_table;
use dailytrade::application::market_data::loader::Loader;
use dailytrade::application::pipeline::DatasetPipeline;
use dailytrade::config::{LoadConfig, PipelineConfig};
use dailytrade::domain::errors::PipelineError;
use dailytrade::infrastructure::{MockMarketDataProvider, MockResponse};
use std::sync::Arc;
use std::time::Duration;

fn load_config(symbols: &[&str]) -> LoadConfig {
    LoadConfig {
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        timezone: "+09:00".to_string(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let provider = MockMarketDataProvider::new()
        .script(
            "7203.T",
            vec![
                MockResponse::Fail("timeout".into()),
                MockResponse::Fail("timeout".into()),
                MockResponse::Table(raw_table(30)),
            ],
        )
        .await;
    let loader = Loader::new(Arc::new(provider.clone()), load_config(&["7203.T"])).unwrap();

    let started = tokio::time::Instant::now();
    let frame = loader.load(&["7203.T".to_string()]).await.unwrap();

    assert_eq!(frame.len(), 30);
    assert_eq!(provider.call_count("7203.T").await, 3);
    // 1s then 2s of backoff
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(frame.has_column("adj_close"));
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_all_symbols_sorted() {
    let provider = MockMarketDataProvider::new()
        .with_table("B", raw_table(5))
        .await
        .with_table("A", raw_table(5))
        .await;
    let loader = Loader::new(Arc::new(provider), load_config(&["B", "A"])).unwrap();
    let frame = loader
        .load(&["B".to_string(), "A".to_string()])
        .await
        .unwrap();

    assert_eq!(frame.len(), 10);
    assert_eq!(&frame.symbols()[..2], &["A", "B"]);
    assert!(frame.timestamps().windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(frame.timestamps()[0].offset().local_minus_utc(), 9 * 3600);
}

#[tokio::test(start_paused = true)]
async fn test_every_symbol_failing_is_no_data() {
    let provider = MockMarketDataProvider::new()
        .script("X", vec![MockResponse::Fail("down".into())])
        .await;
    let loader = Loader::new(Arc::new(provider), load_config(&["X", "Y"])).unwrap();
    let err = loader
        .load(&["X".to_string(), "Y".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoData { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_build_from_provider() {
    let provider = MockMarketDataProvider::new()
        .with_table("AAA", raw_table(80))
        .await
        .script(
            "BBB",
            vec![MockResponse::Empty],
        )
        .await;
    let config = PipelineConfig {
        load: load_config(&["AAA", "BBB"]),
        ..Default::default()
    };
    let pipeline = DatasetPipeline::new(&config, Arc::new(provider)).unwrap();
    let dataset = pipeline.build().await.unwrap();

    assert_eq!(dataset.frame.distinct_symbols(), vec!["AAA"]);
    assert_eq!(dataset.frame.len(), 79);
    assert_eq!(dataset.preprocess_stats.records_before, 80);
}
