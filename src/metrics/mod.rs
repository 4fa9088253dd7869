//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks runs, phase outcomes, degraded results and external backend usage.
//!
//! ```ignore
//! use keyword_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_phase("semantic_analysis", "completed", 3.2, false);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};
