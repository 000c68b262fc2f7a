//! MCore: the typed, high-level functional core IR accepted as input.
//!
//! MCore arrives fully type-checked; every expression carries its source
//! type and every binder was stamped by the front end. The passes here are
//! read-only analyses consumed by the lowering: free variables, recursive
//! binding groups and the escape pre-pass.

pub mod escape;
pub mod free_vars;
pub mod pretty;
pub mod scc;
pub mod term;

pub use term::{Expr, FnLit, Program, Term, TopItem};
