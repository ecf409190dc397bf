//! Tagged-variant strategy registry (spec.md §9: "Use a tagged-variant
//! registry keyed by strategy identifier... constructed from a factory
//! record", replacing the original's dotted-path import mounting).
//!
//! Grounded on the teacher's `StrategyFactory` (`strategies/strategy_factory.rs`),
//! which matches a `StrategyMode` enum to a concrete `Arc<dyn TradingStrategy>`.

use super::rubric::RubricStrategy;
use super::traits::Strategy;
use std::sync::Arc;

/// Factory record identifying which built-in strategy to mount. The source
/// system resolved this via a dotted Python import path; here it is a plain
/// tag, since every variant must exist in this binary at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Rubric,
}

impl StrategyKind {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "rubric" => Some(Self::Rubric),
            _ => None,
        }
    }
}

pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { strategies: Vec::new() }
    }

    pub fn with_kind(mut self, kind: StrategyKind) -> Self {
        self.strategies.push(Self::build(kind));
        self
    }

    fn build(kind: StrategyKind) -> Arc<dyn Strategy> {
        match kind {
            StrategyKind::Rubric => Arc::new(RubricStrategy::new()),
        }
    }

    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }
}

impl Default for StrategyRegistry {
    /// The default mount: the built-in rubric alone, matching the one
    /// producer spec.md §4.4 fully specifies.
    fn default() -> Self {
        Self::new().with_kind(StrategyKind::Rubric)
    }
}
