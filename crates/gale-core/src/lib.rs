mod metrics;
pub mod types;
mod watchdog;

pub use metrics::Metrics;
pub use watchdog::Watchdog;
