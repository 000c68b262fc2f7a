//! The front-end collaborators the lowering consults: type shapes, dot
//! methods and the intrinsic table.

use hashlink::LinkedHashMap;
use lasso::Spur;

use crate::{ident::Ident, types::{CoreType, TypePath}};

/// Tags attached to known built-in methods. An apply whose target carries a
/// tag is handed to the intrinsic rewriter instead of being lowered as an
/// ordinary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    FixedArrayIter,
    IterIter,
    IterMap,
    IterFilter,
    IterTake,
    IterReduce,
    IterFlatMap,
    IterRepeat,
    IterConcat,
    IterFromArray,
    ArrayLength,
    ArrayViewLength,
    BytesViewLength,
    ArrayGet,
    ArraySet,
    ArrayUnsafeGet,
    ArrayUnsafeSet,
    ArrayViewUnsafeGet,
    ArrayViewUnsafeSet,
    BytesViewUnsafeGet,
    BytesViewUnsafeSet,
    ArrayViewUnsafeAsView,
    BytesViewUnsafeAsView,
    CharToString,
    OpLt,
    OpLe,
    OpGt,
    OpGe,
    OpNotEqual,
}

impl Intrinsic {
    pub fn tag_name(&self) -> &'static str {
        match self {
            Intrinsic::FixedArrayIter => "fixedarray_iter",
            Intrinsic::IterIter => "iter_iter",
            Intrinsic::IterMap => "iter_map",
            Intrinsic::IterFilter => "iter_filter",
            Intrinsic::IterTake => "iter_take",
            Intrinsic::IterReduce => "iter_reduce",
            Intrinsic::IterFlatMap => "iter_flat_map",
            Intrinsic::IterRepeat => "iter_repeat",
            Intrinsic::IterConcat => "iter_concat",
            Intrinsic::IterFromArray => "iter_from_array",
            Intrinsic::ArrayLength => "array_length",
            Intrinsic::ArrayViewLength => "arrayview_length",
            Intrinsic::BytesViewLength => "bytesview_length",
            Intrinsic::ArrayGet => "array_get",
            Intrinsic::ArraySet => "array_set",
            Intrinsic::ArrayUnsafeGet => "array_unsafe_get",
            Intrinsic::ArrayUnsafeSet => "array_unsafe_set",
            Intrinsic::ArrayViewUnsafeGet => "arrayview_unsafe_get",
            Intrinsic::ArrayViewUnsafeSet => "arrayview_unsafe_set",
            Intrinsic::BytesViewUnsafeGet => "bytesview_unsafe_get",
            Intrinsic::BytesViewUnsafeSet => "bytesview_unsafe_set",
            Intrinsic::ArrayViewUnsafeAsView => "arrayview_unsafe_as_view",
            Intrinsic::BytesViewUnsafeAsView => "bytesview_unsafe_as_view",
            Intrinsic::CharToString => "char_to_string",
            Intrinsic::OpLt => "op_lt",
            Intrinsic::OpLe => "op_le",
            Intrinsic::OpGt => "op_gt",
            Intrinsic::OpGe => "op_ge",
            Intrinsic::OpNotEqual => "op_notequal",
        }
    }
}

/// One resolved dot method.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    /// The implementing function.
    pub id: Ident,
    /// Slot in the object's method table.
    pub index: usize,
    /// Method type with the receiver as first parameter.
    pub ty: CoreType,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: Spur,
    pub ty: CoreType,
    pub mutable: bool,
}

#[derive(Debug, Clone)]
pub struct ConstrInfo {
    pub name: Spur,
    pub args: Vec<CoreType>,
}

/// The shape of a named type, as declared.
#[derive(Debug, Clone)]
pub enum TypeInfo {
    Record { fields: Vec<FieldInfo> },
    Enum { constrs: Vec<ConstrInfo> },
    Object { methods: Vec<(Spur, CoreType)> },
    Extern,
}

/// Global environment lookup. The lowering only reads; the front end built
/// all of this during checking.
pub trait GlobalEnv {
    fn find_dot_method(&self, type_name: TypePath, method_name: Spur) -> Vec<MethodInfo>;
    fn find_all_type_by_path(&self, path: TypePath) -> Option<&TypeInfo>;
    fn intrinsic_of(&self, f: &Ident) -> Option<Intrinsic>;
}

/// Table-backed environment; what the driver hands to `transl_prog` and what
/// the tests construct by hand.
#[derive(Default)]
pub struct TableEnv {
    types: LinkedHashMap<TypePath, TypeInfo>,
    methods: LinkedHashMap<(TypePath, Spur), Vec<MethodInfo>>,
    intrinsics: LinkedHashMap<Ident, Intrinsic>,
}

impl TableEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(&mut self, path: TypePath, info: TypeInfo) {
        self.types.insert(path, info);
    }

    pub fn declare_method(&mut self, path: TypePath, name: Spur, info: MethodInfo) {
        self.methods
            .entry((path, name))
            .or_insert_with(Vec::new)
            .push(info);
    }

    pub fn declare_intrinsic(&mut self, f: Ident, tag: Intrinsic) {
        self.intrinsics.insert(f, tag);
    }
}

impl GlobalEnv for TableEnv {
    fn find_dot_method(&self, type_name: TypePath, method_name: Spur) -> Vec<MethodInfo> {
        self.methods
            .get(&(type_name, method_name))
            .cloned()
            .unwrap_or_default()
    }

    fn find_all_type_by_path(&self, path: TypePath) -> Option<&TypeInfo> {
        self.types.get(&path)
    }

    fn intrinsic_of(&self, f: &Ident) -> Option<Intrinsic> {
        self.intrinsics.get(f).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ident::IdGen, intern};

    #[test]
    fn table_env_round_trips() {
        let mut env = TableEnv::new();
        let path = TypePath::new(intern("pkg"), intern("Point"));
        env.declare_type(
            path,
            TypeInfo::Record {
                fields: vec![
                    FieldInfo {
                        name: intern("x"),
                        ty: CoreType::Int,
                        mutable: false,
                    },
                    FieldInfo {
                        name: intern("y"),
                        ty: CoreType::Int,
                        mutable: true,
                    },
                ],
            },
        );
        assert!(matches!(
            env.find_all_type_by_path(path),
            Some(TypeInfo::Record { fields }) if fields.len() == 2
        ));
        assert!(env.find_all_type_by_path(TypePath::new(intern("pkg"), intern("No"))).is_none());
    }

    #[test]
    fn intrinsics_resolve_by_identifier() {
        let mut env = TableEnv::new();
        let mut idg = IdGen::new();
        let f = idg.fresh("iter_map");
        env.declare_intrinsic(f, Intrinsic::IterMap);
        assert_eq!(env.intrinsic_of(&f), Some(Intrinsic::IterMap));
        assert_eq!(env.intrinsic_of(&idg.fresh("other")), None);
    }
}
