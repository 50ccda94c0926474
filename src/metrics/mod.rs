//! Metrics pipeline: events, aggregation, and the snapshot endpoint.
//!
//! Request handlers and health probers emit [`MetricEvent`]s into a
//! bounded channel without blocking; a single consumer task folds them
//! into the store, and `GET /metrics` serves a JSON snapshot.

mod collector;
mod endpoint;
mod event;
mod store;

pub use collector::{CollectorTask, MetricsCollector};
pub use endpoint::handle_snapshot;
pub use event::MetricEvent;
pub use store::{BackendMetrics, MetricsStore, Snapshot};
