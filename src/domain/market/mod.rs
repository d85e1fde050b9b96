pub mod interval;
pub mod ohlcv;
pub mod timezone;

pub use interval::Interval;
