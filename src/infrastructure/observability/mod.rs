//! Log stream setup for the binaries.
//!
//! Library components never touch the global subscriber; they carry a
//! `tracing::Span` handed to them at construction and log inside it.

pub mod logging;

pub use logging::init_logging;
