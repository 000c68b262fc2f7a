//! The address table: every function identifier with a statically known
//! calling convention.
//!
//! Populated in two phases. `collect_top_items` pre-registers each top-level
//! function before any body is lowered, so forward references resolve;
//! closure lowering installs `Local` entries for well-known local functions
//! as it rewrites their definitions. Escaping locals never appear here;
//! their calls go through the closure value.

use hashlink::LinkedHashMap;
use once_cell::unsync::OnceCell;

use crate::{
    clam::ltype::{Addr, LowType, Tid},
    ident::Ident,
};

#[derive(Debug, Default)]
pub struct AddrGen {
    next: u32,
}

impl AddrGen {
    pub fn new() -> Self {
        AddrGen { next: 0 }
    }

    pub fn fresh(&mut self, name: lasso::Spur) -> Addr {
        let addr = Addr { index: self.next, name };
        self.next += 1;
        addr
    }
}

/// How a well-known local function receives its captured environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEnv {
    /// No captures; nothing is passed.
    None,
    /// A single captured value is passed directly, no record.
    Value(Ident, LowType),
    /// A capture record, passed by reference. The identifier is the binding
    /// that holds the record at call sites.
    Struct(Ident, Tid),
}

/// The wrapper synthesized the first time a top-level function escapes as a
/// value.
#[derive(Debug, Clone, Copy)]
pub struct WrapperInfo {
    pub name: Ident,
    pub addr: Addr,
    pub tid: Tid,
}

#[derive(Debug)]
pub enum FuncRef {
    Toplevel {
        addr: Addr,
        params: Vec<LowType>,
        ret: LowType,
        /// Set lazily on first value use; forces wrapper emission.
        name_as_closure: OnceCell<WrapperInfo>,
    },
    Local {
        addr: Addr,
        env: LocalEnv,
    },
}

impl FuncRef {
    pub fn addr(&self) -> Addr {
        match self {
            FuncRef::Toplevel { addr, .. } | FuncRef::Local { addr, .. } => *addr,
        }
    }
}

#[derive(Debug, Default)]
pub struct AddrTable {
    map: LinkedHashMap<Ident, FuncRef>,
}

impl AddrTable {
    pub fn new() -> Self {
        AddrTable { map: LinkedHashMap::new() }
    }

    pub fn insert_toplevel(&mut self, id: Ident, addr: Addr, params: Vec<LowType>, ret: LowType) {
        let prev = self.map.insert(
            id,
            FuncRef::Toplevel { addr, params, ret, name_as_closure: OnceCell::new() },
        );
        assert!(prev.is_none(), "address issued twice for {id}");
    }

    pub fn insert_local(&mut self, id: Ident, addr: Addr, env: LocalEnv) {
        let prev = self.map.insert(id, FuncRef::Local { addr, env });
        assert!(prev.is_none(), "address issued twice for {id}");
    }

    pub fn get(&self, id: &Ident) -> Option<&FuncRef> {
        self.map.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Ident, &FuncRef)> {
        self.map.iter()
    }
}
