//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup
//! - The [`WorkerObserver`] diagnostic hook
//! - [`WorkerCounters`], an observer that counts worker events

pub mod metrics;
pub mod observer;
pub mod tracing;

pub use metrics::{WorkerCounters, WorkerCountersSnapshot};
pub use observer::{NoopObserver, WorkerObserver};
