//! Passes run by the refinement pipeline, in pipeline order:
//!
//! 1. [`inline::Inliner`] makes every call site see concrete operand types.
//! 2. [`cse::CommonSubexpressionElimination`] merges duplicate shape
//!    computations.
//! 3. [`refine::ShapeRefinement`] propagates static shapes and folds shape
//!    arithmetic to a fixpoint.
//! 4. [`canonicalize::CanonicalizeDynamism`] rewrites dynamism operations
//!    whose results became static.
pub mod canonicalize;
pub mod cse;
mod fold;
pub mod inline;
pub mod refine;

pub use canonicalize::CanonicalizeDynamism;
pub use cse::CommonSubexpressionElimination;
pub use inline::Inliner;
pub use refine::ShapeRefinement;
