use std::fmt;

use lasso::Spur;

use crate::INTERNER;

/// A package-qualified type name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypePath {
    pub pkg: Spur,
    pub name: Spur,
}

impl TypePath {
    pub fn new(pkg: Spur, name: Spur) -> Self {
        TypePath { pkg, name }
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            INTERNER.resolve(&self.pkg),
            INTERNER.resolve(&self.name)
        )
    }
}

impl fmt::Debug for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// The source-level type language the lowering consumes. Every MCore
/// expression, parameter and binder carries one of these; the checker has
/// already resolved everything, so lowering never infers.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum CoreType {
    Unit,
    Bool,
    Char,
    Int,
    Int64,
    Float,
    Double,
    String,
    Bytes,
    /// A function type. `err` is present on error-raising arrows; the
    /// physical result of such a function is `Result { ok: ret, err }`.
    Arrow {
        params: Vec<CoreType>,
        ret: Box<CoreType>,
        err: Option<Box<CoreType>>,
    },
    Tuple(Vec<CoreType>),
    /// A user-declared record, enum or object interface; its shape comes
    /// from `GlobalEnv::find_all_type_by_path`.
    Named {
        path: TypePath,
        args: Vec<CoreType>,
    },
    /// Growable array record `{ buf, len }`.
    Array(Box<CoreType>),
    /// Raw fixed-length buffer.
    FixedArray(Box<CoreType>),
    /// View record `{ buf, start, len }` over a fixed array.
    ArrayView(Box<CoreType>),
    /// View record `{ bytes, start, len }` over a byte buffer.
    BytesView,
    /// Internal iterator: `((T) -> Int) -> Int` over the GO/END sentinels.
    Iter(Box<CoreType>),
    /// The built-in result sum.
    Result {
        ok: Box<CoreType>,
        err: Box<CoreType>,
    },
    /// Nullable reference over a reference payload.
    Option(Box<CoreType>),
    /// One-field mutable heap cell; the device mutable captures are boxed
    /// through.
    RefCell(Box<CoreType>),
}

impl CoreType {
    pub fn arrow(params: Vec<CoreType>, ret: CoreType) -> CoreType {
        CoreType::Arrow {
            params,
            ret: Box::new(ret),
            err: None,
        }
    }

    pub fn iter_sink(elem: &CoreType) -> CoreType {
        CoreType::arrow(vec![elem.clone()], CoreType::Int)
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, CoreType::Unit)
    }

    /// The parameter/return decomposition of a callable type. Iterators are
    /// callable: `Iter<T>` behaves as `((T) -> Int) -> Int`.
    pub fn as_arrow(&self) -> Option<(Vec<CoreType>, CoreType, Option<CoreType>)> {
        match self {
            CoreType::Arrow { params, ret, err } => Some((
                params.clone(),
                (**ret).clone(),
                err.as_deref().cloned(),
            )),
            CoreType::Iter(elem) => Some((
                vec![CoreType::iter_sink(elem)],
                CoreType::Int,
                None,
            )),
            _ => None,
        }
    }
}

impl fmt::Debug for CoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreType::Unit => write!(f, "Unit"),
            CoreType::Bool => write!(f, "Bool"),
            CoreType::Char => write!(f, "Char"),
            CoreType::Int => write!(f, "Int"),
            CoreType::Int64 => write!(f, "Int64"),
            CoreType::Float => write!(f, "Float"),
            CoreType::Double => write!(f, "Double"),
            CoreType::String => write!(f, "String"),
            CoreType::Bytes => write!(f, "Bytes"),
            CoreType::Arrow { params, ret, err } => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p:?}")?;
                }
                write!(f, ") -> {ret:?}")?;
                if let Some(err) = err {
                    write!(f, " raise {err:?}")?;
                }
                Ok(())
            }
            CoreType::Tuple(tys) => {
                write!(f, "(")?;
                for (i, t) in tys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t:?}")?;
                }
                write!(f, ")")
            }
            CoreType::Named { path, args } => {
                write!(f, "{path}")?;
                if !args.is_empty() {
                    write!(f, "[")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{a:?}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            CoreType::Array(t) => write!(f, "Array[{t:?}]"),
            CoreType::FixedArray(t) => write!(f, "FixedArray[{t:?}]"),
            CoreType::ArrayView(t) => write!(f, "ArrayView[{t:?}]"),
            CoreType::BytesView => write!(f, "BytesView"),
            CoreType::Iter(t) => write!(f, "Iter[{t:?}]"),
            CoreType::Result { ok, err } => write!(f, "Result[{ok:?}, {err:?}]"),
            CoreType::Option(t) => write!(f, "Option[{t:?}]"),
            CoreType::RefCell(t) => write!(f, "Ref[{t:?}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_is_callable() {
        let it = CoreType::Iter(Box::new(CoreType::Int));
        let (params, ret, err) = it.as_arrow().unwrap();
        assert_eq!(params, vec![CoreType::arrow(vec![CoreType::Int], CoreType::Int)]);
        assert_eq!(ret, CoreType::Int);
        assert!(err.is_none());
    }

    #[test]
    fn plain_types_are_not_callable() {
        assert!(CoreType::Int.as_arrow().is_none());
        assert!(CoreType::Tuple(vec![]).as_arrow().is_none());
    }
}
