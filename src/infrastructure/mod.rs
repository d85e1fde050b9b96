pub mod core;
pub mod csv_provider;
pub mod mock;
pub mod observability;
pub mod persistence;

pub use csv_provider::CsvDirectoryProvider;
pub use mock::{MockMarketDataProvider, MockResponse};
