//! The interaction rule language
//!
//! Templates carry an ordered list of rules `{on, if?, do, else?}` whose
//! conditions and effects are JSON tuples tagged by an op string. The
//! parser turns those tuples into sum types at the edge; the evaluator
//! runs them synchronously against the store, re-reading entities on
//! every reference so intra-rule mutations stay visible.

pub mod eval;
pub mod parse;

pub use eval::fire;
pub use parse::{
    parse_rules, CondBlock, Condition, Effect, EffectEntry, InteractionRule, RefBase, Reference,
};
