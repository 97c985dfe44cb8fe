//! Price-refresh engine: last-known cache, portfolio aggregation and the
//! refresh scheduler that drives them.

pub mod aggregator;
pub mod cache;
pub mod publisher;
pub mod scheduler;

pub use aggregator::{PortfolioAggregator, ResolvedSnapshot, SnapshotSource};
pub use cache::LastKnownCache;
pub use publisher::Publisher;
pub use scheduler::{RefreshScheduler, RetryPolicy, SchedulerConfig, SchedulerState, SchedulerStatus};
