//! Render-engine expressions
//!
//! Analysis time series become an [`Expr`] tree first and are serialized to
//! the engine's expression syntax exactly once, when the filter graph is
//! assembled. Trees can be evaluated in-process, which is how budgets and
//! value ranges are checked without running the engine.

mod ast;
mod synth;

pub use ast::{BinaryOp, Bindings, Expr, Func, Var};
pub use synth::{smooth_and_normalize, ExpressionBudget, ExpressionSynthesizer, Timeline, ZoomParams};
