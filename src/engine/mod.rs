use thiserror::Error;

use crate::store::StoreError;

pub mod caps;
pub mod delta;
pub mod ledger;
pub mod milestone;
pub mod rank;
pub mod rules;
pub mod scheduler;

pub mod prelude {
    pub use crate::engine::caps::{CapUsage, apply_caps, scale_to_cap};
    pub use crate::engine::delta::{AwardResult, DeltaProcessor};
    pub use crate::engine::ledger::PointsLedger;
    pub use crate::engine::milestone::MilestoneRewardChecker;
    pub use crate::engine::rank::{RankCalculator, RankEntry};
    pub use crate::engine::rules::RuleResolver;
    pub use crate::engine::scheduler::{BatchScheduler, SchedulerConfig, SweepReport};
}

pub type EngineResult<T> = core::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("post '{post_id}' reports negative metrics")]
    InvalidMetrics { post_id: String },
}
