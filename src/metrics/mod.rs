// Metrics module - request/latency/token observability

pub mod collector;

pub use collector::MetricsCollector;
