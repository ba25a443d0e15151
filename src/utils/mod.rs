//! Ambient-stack helpers that aren't part of the core row/diff/bulk model.

pub mod logger;

pub use logger::init_tracing;
