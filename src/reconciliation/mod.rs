//! Reconciliation of invoices against bank transactions
//!
//! Import (guarded by [`IdempotencyGuard`]) feeds the [`AssignmentEngine`],
//! which scores pairs with the [`SimilarityScorer`] and hands accepted pairs
//! to the [`MatchLifecycleManager`] as proposals. Operators may ask the
//! [`ExplanationAnnotator`] why a pair was proposed, then confirm it.

pub mod assignment;
pub mod engine;
pub mod explanation;
pub mod idempotency;
pub mod lifecycle;
pub mod scorer;

pub use assignment::*;
pub use engine::*;
pub use explanation::*;
pub use idempotency::*;
pub use lifecycle::*;
pub use scorer::*;
