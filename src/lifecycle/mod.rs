//! Model lifecycle: training runs, metric recording and promotion.

pub mod locks;
pub mod promotion;
pub mod run;
pub mod sink;

pub use locks::EntityLocks;
pub use promotion::{CycleReport, LifecycleSettings, ModelBuilder, PromotionDecision, PromotionEngine};
pub use run::{RunContext, RunStatus, RunSummary};
pub use sink::{FileMetricsSink, InMemoryMetricsSink, MetricsRecord, MetricsSink};
