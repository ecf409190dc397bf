//! Pluggable signal producers (spec.md §9 "Dynamic dispatch / strategy
//! plugins"; Non-goal: "the core does not define strategies themselves").

pub mod registry;
pub mod rubric;
pub mod traits;

pub use registry::{StrategyKind, StrategyRegistry};
pub use rubric::RubricStrategy;
pub use traits::{AnalysisContext, ScoredSignal, Strategy};
