//! Background job scheduler and job implementations.

mod overdue_payments;
mod pool_metrics;
mod scheduler;

pub use overdue_payments::{OverduePaymentsJob, SweepSummary};
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
