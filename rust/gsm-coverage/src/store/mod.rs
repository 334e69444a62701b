//! Persistence for operators, aggregates, scans and their lines.
//!
//! Every function takes the connection it runs on so callers decide the
//! transaction boundary.

pub(crate) mod lines;
pub(crate) mod operators;
pub(crate) mod scans;

pub use operators::ResolvedOperator;
