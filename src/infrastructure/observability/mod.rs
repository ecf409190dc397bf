//! Push-based observability (spec.md §6): outbound-only. Structured JSON
//! snapshots to stdout plus a Prometheus `Metrics` registry callers can
//! render on demand (e.g. a `/metrics` scrape endpoint in the supervisor).

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
