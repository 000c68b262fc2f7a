//! Middle-end of the compiler: lowers the typed functional core IR (MCore)
//! into the closure-converted, explicitly-typed stack-machine IR (Clam).
//!
//! The pipeline is deliberately small: an escape pre-pass, address
//! pre-registration for every top-level function, then a single top-down walk
//! that performs intrinsic specialization, return-to-join rewriting and
//! closure conversion as it goes. See [`lower::transl_prog`] for the entry
//! point.

use std::sync::LazyLock;

use lasso::ThreadedRodeo;

pub mod clam;
pub mod config;
pub mod diagnostics;
pub mod global_env;
pub mod ident;
pub mod lower;
pub mod mcore;
pub mod source;
pub mod types;

pub static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(|| ThreadedRodeo::new());

/// Intern a name and get its key. Shorthand used all over the crate.
pub fn intern(s: &str) -> lasso::Spur {
    INTERNER.get_or_intern(s)
}

/// Resolve an interned key back to its text.
pub fn resolve(s: &lasso::Spur) -> &'static str {
    INTERNER.resolve(s)
}
