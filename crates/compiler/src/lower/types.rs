//! Source-to-lowered type mapping and the type-def table.
//!
//! Every table here is keyed get-or-insert and iterated in insertion order,
//! so two translations of equal programs intern identical tids. Function
//! signatures share one abstract-closure def; capture records, late-init
//! structs and object witnesses mint fresh ids at every request.

use hashlink::LinkedHashMap;

use crate::{
    clam::ltype::{FnSig, LowType, Tid, TypeDef},
    global_env::{GlobalEnv, TypeInfo},
    mcore::term::Tag,
    types::{CoreType, TypePath},
};

/// The interned pieces of one lowered result sum.
#[derive(Debug, Clone, Copy)]
pub struct ResultTids {
    pub enum_tid: Tid,
    pub ok_tid: Tid,
    pub err_tid: Tid,
}

pub struct TypeLowering {
    defs: Vec<Option<TypeDef>>,
    sigs: LinkedHashMap<FnSig, Tid>,
    tuples: LinkedHashMap<Vec<LowType>, Tid>,
    named: LinkedHashMap<TypePath, Tid>,
    constrs: LinkedHashMap<(Tid, usize), Tid>,
    results: LinkedHashMap<(LowType, LowType), ResultTids>,
    arrays: LinkedHashMap<LowType, Tid>,
    fixed_arrays: LinkedHashMap<LowType, Tid>,
    array_views: LinkedHashMap<LowType, Tid>,
    bytes_view: Option<Tid>,
    ref_cells: LinkedHashMap<LowType, Tid>,
    concrete_objects: LinkedHashMap<(Tid, LowType), Tid>,
    use_js_builtin_string: bool,
}

impl TypeLowering {
    pub fn new(use_js_builtin_string: bool) -> Self {
        TypeLowering {
            defs: Vec::new(),
            sigs: LinkedHashMap::new(),
            tuples: LinkedHashMap::new(),
            named: LinkedHashMap::new(),
            constrs: LinkedHashMap::new(),
            results: LinkedHashMap::new(),
            arrays: LinkedHashMap::new(),
            fixed_arrays: LinkedHashMap::new(),
            array_views: LinkedHashMap::new(),
            bytes_view: None,
            ref_cells: LinkedHashMap::new(),
            concrete_objects: LinkedHashMap::new(),
            use_js_builtin_string,
        }
    }

    fn alloc(&mut self, def: TypeDef) -> Tid {
        let tid = Tid(self.defs.len() as u32);
        self.defs.push(Some(def));
        tid
    }

    /// Reserve a tid before its definition is known; recursive named types
    /// need the id while their fields are still being lowered.
    fn alloc_placeholder(&mut self) -> Tid {
        let tid = Tid(self.defs.len() as u32);
        self.defs.push(None);
        tid
    }

    fn set_def(&mut self, tid: Tid, def: TypeDef) {
        self.defs[tid.0 as usize] = Some(def);
    }

    pub fn def_of(&self, tid: Tid) -> &TypeDef {
        self.defs[tid.0 as usize]
            .as_ref()
            .expect("type id defined before use")
    }

    /// The accumulated `type_defs` table, in allocation order.
    pub fn take_defs(self) -> Vec<(Tid, TypeDef)> {
        self.defs
            .into_iter()
            .enumerate()
            .map(|(i, def)| {
                (
                    Tid(i as u32),
                    def.expect("every reserved type id was defined"),
                )
            })
            .collect()
    }

    /// Lower a source type.
    pub fn lower_ty(&mut self, env: &dyn GlobalEnv, ty: &CoreType) -> LowType {
        match ty {
            CoreType::Unit => LowType::I32Unit,
            CoreType::Bool => LowType::I32Bool,
            CoreType::Char | CoreType::Int => LowType::I32,
            CoreType::Int64 => LowType::I64,
            CoreType::Float => LowType::F32,
            CoreType::Double => LowType::F64,
            CoreType::String => {
                if self.use_js_builtin_string {
                    LowType::RefExtern
                } else {
                    LowType::RefString
                }
            }
            CoreType::Bytes => LowType::RefBytes,
            CoreType::Arrow { params, ret, err } => {
                let sig = self.fn_sig(env, params, ret, err.as_deref());
                LowType::Ref(self.abstract_closure(sig))
            }
            CoreType::Iter(elem) => {
                let sink = CoreType::iter_sink(elem);
                let sig = self.fn_sig(env, &[sink], &CoreType::Int, None);
                LowType::Ref(self.abstract_closure(sig))
            }
            CoreType::Tuple(tys) => {
                let fields: Vec<_> = tys.iter().map(|t| self.lower_ty(env, t)).collect();
                LowType::Ref(self.tuple_tid(fields))
            }
            CoreType::Named { path, .. } => LowType::Ref(self.named_tid(env, *path)),
            CoreType::Array(elem) => {
                let elem = self.lower_ty(env, elem);
                LowType::Ref(self.array_tid(elem))
            }
            CoreType::FixedArray(elem) => {
                let elem = self.lower_ty(env, elem);
                LowType::Ref(self.fixed_array_tid(elem))
            }
            CoreType::ArrayView(elem) => {
                let elem = self.lower_ty(env, elem);
                LowType::Ref(self.array_view_tid(elem))
            }
            CoreType::BytesView => LowType::Ref(self.bytes_view_tid()),
            CoreType::Result { ok, err } => {
                let tids = self.result_tids(env, ok, err);
                LowType::Ref(tids.enum_tid)
            }
            CoreType::Option(payload) => {
                let inner = self.lower_ty(env, payload);
                match inner {
                    LowType::Ref(tid) => LowType::RefNullable(tid),
                    other => panic!("nullable over non-reference payload: {other}"),
                }
            }
            CoreType::RefCell(elem) => {
                let elem = self.lower_ty(env, elem);
                LowType::Ref(self.ref_cell_tid(elem))
            }
        }
    }

    /// Lower an arrow's pieces into a signature. Error arrows return the
    /// lowered result sum.
    pub fn fn_sig(
        &mut self,
        env: &dyn GlobalEnv,
        params: &[CoreType],
        ret: &CoreType,
        err: Option<&CoreType>,
    ) -> FnSig {
        let params = params.iter().map(|t| self.lower_ty(env, t)).collect();
        let ret = match err {
            None => self.lower_ty(env, ret),
            Some(err) => {
                let tids = self.result_tids(env, ret, err);
                LowType::Ref(tids.enum_tid)
            }
        };
        FnSig { params, ret }
    }

    /// The abstract-closure tid for a signature; each signature is
    /// materialized at most once.
    pub fn abstract_closure(&mut self, sig: FnSig) -> Tid {
        if let Some(tid) = self.sigs.get(&sig) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::ClosureAbstract { sig: sig.clone() });
        self.sigs.insert(sig, tid);
        tid
    }

    /// A fresh concrete capture record for one closure.
    pub fn closure_tid(&mut self, fn_sig_tid: Tid, captures: Vec<LowType>) -> Tid {
        self.alloc(TypeDef::Closure { fn_sig_tid, captures })
    }

    /// A fresh struct record (well-known multi-capture environments).
    pub fn struct_tid(&mut self, fields: Vec<LowType>) -> Tid {
        self.alloc(TypeDef::Struct { fields })
    }

    /// A fresh late-init record (mutually recursive bundle environments).
    pub fn late_init_struct_tid(&mut self, fields: Vec<LowType>) -> Tid {
        self.alloc(TypeDef::LateInitStruct { fields })
    }

    pub fn tuple_tid(&mut self, fields: Vec<LowType>) -> Tid {
        if let Some(tid) = self.tuples.get(&fields) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::Tuple { fields: fields.clone() });
        self.tuples.insert(fields, tid);
        tid
    }

    /// The tid of a user-declared named type, creating its def (and, for
    /// enums, its constructor defs) on first sight.
    pub fn named_tid(&mut self, env: &dyn GlobalEnv, path: TypePath) -> Tid {
        if let Some(tid) = self.named.get(&path) {
            return *tid;
        }
        let info = env
            .find_all_type_by_path(path)
            .unwrap_or_else(|| panic!("unknown type path {path}"));
        let info = info.clone();
        let tid = self.alloc_placeholder();
        self.named.insert(path, tid);
        let def = match &info {
            TypeInfo::Record { fields } => {
                let fields = fields
                    .iter()
                    .map(|f| self.lower_ty(env, &f.ty))
                    .collect();
                TypeDef::Struct { fields }
            }
            TypeInfo::Enum { constrs } => {
                for (index, c) in constrs.iter().enumerate() {
                    let fields: Vec<_> =
                        c.args.iter().map(|t| self.lower_ty(env, t)).collect();
                    let ctid = self.alloc(TypeDef::Constructor {
                        enum_tid: tid,
                        tag: Tag { name: c.name, index },
                        fields,
                    });
                    self.constrs.insert((tid, index), ctid);
                }
                TypeDef::Enum {
                    name: path.name,
                    cases: constrs.len() as u32,
                }
            }
            TypeInfo::Object { methods } => {
                let methods = methods
                    .iter()
                    .map(|(_, ty)| {
                        let (params, ret, err) = ty
                            .as_arrow()
                            .unwrap_or_else(|| panic!("object method is not a function"));
                        self.fn_sig(env, &params, &ret, err.as_ref())
                    })
                    .collect();
                TypeDef::Object { methods }
            }
            TypeInfo::Extern => TypeDef::Struct { fields: vec![] },
        };
        self.set_def(tid, def);
        tid
    }

    /// The constructor tid for a tag of an already-lowered enum.
    pub fn constr_tid(&mut self, enum_tid: Tid, tag: &Tag) -> Tid {
        *self
            .constrs
            .get(&(enum_tid, tag.index))
            .unwrap_or_else(|| panic!("constructor {tag:?} of {enum_tid} was never lowered"))
    }

    /// The lowered pieces of `Result<ok, err>`.
    pub fn result_tids(&mut self, env: &dyn GlobalEnv, ok: &CoreType, err: &CoreType) -> ResultTids {
        let ok_low = self.lower_ty(env, ok);
        let err_low = self.lower_ty(env, err);
        if let Some(tids) = self.results.get(&(ok_low, err_low)) {
            return *tids;
        }
        let enum_tid = self.alloc(TypeDef::Enum {
            name: crate::intern("Result"),
            cases: 2,
        });
        let ok_tid = self.alloc(TypeDef::Constructor {
            enum_tid,
            tag: Tag { name: crate::intern("Ok"), index: 0 },
            fields: vec![ok_low],
        });
        let err_tid = self.alloc(TypeDef::Constructor {
            enum_tid,
            tag: Tag { name: crate::intern("Err"), index: 1 },
            fields: vec![err_low],
        });
        self.constrs.insert((enum_tid, 0), ok_tid);
        self.constrs.insert((enum_tid, 1), err_tid);
        let tids = ResultTids { enum_tid, ok_tid, err_tid };
        self.results.insert((ok_low, err_low), tids);
        tids
    }

    pub fn array_tid(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.arrays.get(&elem) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::Array { elem });
        self.arrays.insert(elem, tid);
        tid
    }

    pub fn fixed_array_tid(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.fixed_arrays.get(&elem) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::FixedArray { elem });
        self.fixed_arrays.insert(elem, tid);
        tid
    }

    pub fn array_view_tid(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.array_views.get(&elem) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::ArrayView { elem });
        self.array_views.insert(elem, tid);
        tid
    }

    pub fn bytes_view_tid(&mut self) -> Tid {
        if let Some(tid) = self.bytes_view {
            return tid;
        }
        let tid = self.alloc(TypeDef::BytesView);
        self.bytes_view = Some(tid);
        tid
    }

    pub fn ref_cell_tid(&mut self, elem: LowType) -> Tid {
        if let Some(tid) = self.ref_cells.get(&elem) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::Struct { fields: vec![elem] });
        self.ref_cells.insert(elem, tid);
        tid
    }

    /// The witness tid for one (interface, self type) pair.
    pub fn concrete_object_tid(&mut self, abstract_tid: Tid, self_: LowType) -> Tid {
        if let Some(tid) = self.concrete_objects.get(&(abstract_tid, self_)) {
            return *tid;
        }
        let tid = self.alloc(TypeDef::ConcreteObject { abstract_tid, self_ });
        self.concrete_objects.insert((abstract_tid, self_), tid);
        tid
    }
}
