use std::fmt;

use lasso::Spur;

use crate::{INTERNER, mcore::term::Tag};

/// An interned type id. Indexes the `type_defs` table of the program being
/// produced; stable for the life of a translation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The address of a top-level function symbol. Issued exactly once; the
/// name rides along only for printing.
#[derive(Clone, Copy)]
pub struct Addr {
    pub index: u32,
    pub name: Spur,
}

impl PartialEq for Addr {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Addr {}

impl std::hash::Hash for Addr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{}", self.index, INTERNER.resolve(&self.name))
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Lowered types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowType {
    /// Booleans, as i32 0/1.
    I32Bool,
    /// Unit, as i32 0.
    I32Unit,
    I32,
    I64,
    F32,
    F64,
    Ref(Tid),
    /// Reference whose fields may still be uninitialized; used for the
    /// shared capture record of a mutually recursive bundle.
    RefLazyInit(Tid),
    RefNullable(Tid),
    RefBytes,
    RefString,
    RefFunc,
    RefExtern,
    RefAny,
}

impl LowType {
    pub fn is_nullable_ref(&self) -> bool {
        matches!(self, LowType::RefNullable(_))
    }

    pub fn tid(&self) -> Option<Tid> {
        match self {
            LowType::Ref(t) | LowType::RefLazyInit(t) | LowType::RefNullable(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for LowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LowType::I32Bool => write!(f, "i32_bool"),
            LowType::I32Unit => write!(f, "i32_unit"),
            LowType::I32 => write!(f, "i32"),
            LowType::I64 => write!(f, "i64"),
            LowType::F32 => write!(f, "f32"),
            LowType::F64 => write!(f, "f64"),
            LowType::Ref(t) => write!(f, "(ref {t})"),
            LowType::RefLazyInit(t) => write!(f, "(ref_lazy_init {t})"),
            LowType::RefNullable(t) => write!(f, "(ref_nullable {t})"),
            LowType::RefBytes => write!(f, "ref_bytes"),
            LowType::RefString => write!(f, "ref_string"),
            LowType::RefFunc => write!(f, "ref_func"),
            LowType::RefExtern => write!(f, "ref_extern"),
            LowType::RefAny => write!(f, "ref_any"),
        }
    }
}

/// A lowered function signature. Interned so structurally equal signatures
/// share one abstract-closure type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnSig {
    pub params: Vec<LowType>,
    pub ret: LowType,
}

/// An entry of the `type_defs` table.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    /// The nominal closure interface for one function signature; call sites
    /// of first-class functions go through this.
    ClosureAbstract { sig: FnSig },
    /// A concrete capture record: code witness plus the captured fields, in
    /// capture-list order.
    Closure { fn_sig_tid: Tid, captures: Vec<LowType> },
    Struct { fields: Vec<LowType> },
    Tuple { fields: Vec<LowType> },
    /// Capture record of a mutually recursive bundle; fields are written
    /// after the closures over it exist.
    LateInitStruct { fields: Vec<LowType> },
    /// An enum, by name; each constructor has its own def.
    Enum { name: Spur, cases: u32 },
    Constructor { enum_tid: Tid, tag: Tag, fields: Vec<LowType> },
    /// An abstract object interface: a method table shape.
    Object { methods: Vec<FnSig> },
    /// A concrete witness of an object interface over one self type.
    ConcreteObject { abstract_tid: Tid, self_: LowType },
    /// Growable array record `{ buf, len }`.
    Array { elem: LowType },
    /// Raw fixed-length buffer.
    FixedArray { elem: LowType },
    /// View record `{ buf, start, len }`.
    ArrayView { elem: LowType },
    /// View record `{ bytes, start, len }`.
    BytesView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;

    #[test]
    fn addr_identity_is_the_index() {
        let a = Addr { index: 3, name: intern("f") };
        let b = Addr { index: 3, name: intern("g") };
        let c = Addr { index: 4, name: intern("f") };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ref_types_expose_their_tid() {
        assert_eq!(LowType::Ref(Tid(7)).tid(), Some(Tid(7)));
        assert_eq!(LowType::RefNullable(Tid(1)).tid(), Some(Tid(1)));
        assert_eq!(LowType::I64.tid(), None);
        assert!(LowType::RefNullable(Tid(0)).is_nullable_ref());
    }
}
