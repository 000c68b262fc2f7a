//! Clam: the lowered, closure-converted IR handed to the stack-machine
//! backend.
//!
//! Everything is explicitly typed: control constructs that produce values
//! carry their lowered type, allocations and field accesses carry a type id
//! into the accumulated `type_defs`, and all functions live at top level
//! behind opaque addresses. The S-expression printer in [`pretty`] is the
//! stable observable between components.

pub mod ltype;
pub mod pretty;
pub mod term;

pub use ltype::{Addr, FnSig, LowType, Tid, TypeDef};
pub use term::{Lambda, Prog, TopFuncItem};
