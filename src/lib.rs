//! Linked QC trend charts: filtering, per-instrument projection, robust
//! normal-range bands, cross-chart synchronization and point annotation.

pub mod color;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod persistence;
pub mod state;
pub mod widget;

pub use error::{EngineError, PersistenceError};
pub use state::Session;
