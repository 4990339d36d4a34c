pub mod exploration;
pub mod features;
pub mod feedback;
pub mod guardrails;
pub mod orchestrator;
pub mod ranking;
pub mod scoring;

pub use exploration::{ExplorationLog, ExplorationSelector, StrategyBudget};
pub use features::{CriteriaProvider, FeatureProvider, InMemoryPropertyStore};
pub use feedback::FeedbackStore;
pub use orchestrator::RankingOrchestrator;
pub use ranking::{ModelRegistry, ModelTrainer, PersonalizedModel};
pub use scoring::{RuleBasedScorer, RULES_MODEL_VERSION};
