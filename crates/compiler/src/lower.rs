//! Lowering of MCore into Clam.
//!
//! The passes compose in a fixed order: the escape pre-pass, address
//! pre-registration of every top-level function, object method wrapper
//! synthesis, then one top-down walk of the items. Intrinsic rewriting,
//! return-to-join conversion and closure conversion all happen during that
//! walk; the context value in [`context`] carries every table.

pub mod addr;
pub mod closure;
pub mod context;
pub mod intrinsics;
pub mod returns;
pub mod transl;
pub mod types;

#[cfg(test)]
mod tests;

use crate::{
    clam::term::Prog,
    config::Config,
    global_env::GlobalEnv,
    mcore::term::Program,
};

/// Translate a whole checked program. Deterministic: equal inputs produce
/// bit-equal output, including identifier stamps, type ids and item order.
pub fn transl_prog(program: &Program, env: &dyn GlobalEnv, config: &Config) -> Prog {
    let mut ctx = context::Ctx::new(program, env, config);
    ctx.run(program)
}
