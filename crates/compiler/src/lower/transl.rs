//! The top-down walk from MCore expressions to Clam.

use crate::{
    clam::{
        ltype::{FnSig, LowType},
        term::{
            AllocKind, ArrayAccessKind, FieldKind, FnItemKind, GetItemExtra, JoinKind, LFunc,
            LParam, Lambda, PrimFn, SetFieldKind, Target, TopFuncItem,
        },
    },
    global_env::TypeInfo,
    ident::Ident,
    intern,
    lower::{
        addr::{FuncRef, LocalEnv, WrapperInfo},
        context::{Ctx, Frame, FrameState, StubInfo},
        returns::{ReturnCtx, ReturnStyle},
    },
    mcore::term::{
        ApplyKind, Constant, Expr, FnLit, HandleKind, LetFnKind, Prim, Program, ReturnKind, Term,
        TopItem,
    },
    resolve,
    types::CoreType,
};

use crate::clam::term::Prog;

pub(crate) struct LoweredFn {
    pub params: Vec<LParam>,
    pub body: Lambda,
    pub ret: LowType,
}

/// Reads of non-nullable reference fields come back nullable from the
/// backend's point of view; cast them back.
pub(crate) fn non_null_read(ty: LowType, read: Lambda) -> Lambda {
    match ty {
        LowType::Ref(_) | LowType::RefString | LowType::RefBytes | LowType::RefFunc => {
            Lambda::Prim { prim: PrimFn::AsNonNull, args: vec![read] }
        }
        _ => read,
    }
}

pub(crate) fn wrap_binds(binds: Vec<(Ident, Lambda)>, body: Lambda) -> Lambda {
    binds
        .into_iter()
        .rev()
        .fold(body, |body, (id, value)| Lambda::let_(id, value, body))
}

impl<'a> Ctx<'a> {
    pub fn run(&mut self, program: &Program) -> Prog {
        log::debug!(
            "lowering {} top items, {} escaping identifiers",
            program.items.len(),
            self.escape.len()
        );
        self.frames.push(Frame { state: FrameState::InitialTop, ret: None });
        self.collect_top_items(program);
        self.synthesize_object_wrappers(program);

        let mut main = None;
        let mut init_exprs = Vec::new();

        for item in &program.items {
            match item {
                TopItem::Fn { binder, func, export, is_main } => {
                    self.base = func.body.loc;
                    if *is_main {
                        let lowered =
                            self.lower_fn_with(func, None, vec![], FrameState::InitialTop);
                        let body = self.event(lowered.body);
                        main = Some(LFunc {
                            params: lowered.params,
                            body,
                            return_ty: Some(lowered.ret),
                        });
                    } else {
                        let addr = self
                            .addrs
                            .get(binder)
                            .unwrap_or_else(|| panic!("top function {binder} was not collected"))
                            .addr();
                        let lowered =
                            self.lower_fn_with(func, None, vec![], FrameState::InitialTop);
                        let kind = match export {
                            Some(name) => FnItemKind::TopPub { export_name: *name },
                            None => FnItemKind::TopPrivate,
                        };
                        let body = self.event(lowered.body);
                        self.top_items.push(TopFuncItem {
                            binder: addr,
                            kind,
                            func: LFunc {
                                params: lowered.params,
                                body,
                                return_ty: Some(lowered.ret),
                            },
                            tid: None,
                        });
                    }
                }

                TopItem::Let { binder, expr } => {
                    self.base = expr.loc;
                    match &expr.term {
                        Term::Const(c) if self.is_simple_global(c) => {
                            self.globals.push((binder.id, Some(c.clone())));
                        }
                        _ => {
                            let value = self.transl(expr);
                            let value = self.event(value);
                            self.globals.push((binder.id, None));
                            self.binds_init.push((binder.id, value));
                        }
                    }
                }

                TopItem::Expr { expr } => {
                    self.base = expr.loc;
                    let value = self.transl(expr);
                    init_exprs.push(self.event(value));
                }

                TopItem::Stub { .. } => {}
            }
        }

        self.frames.pop();

        let mut init_body = match init_exprs.len() {
            0 => Lambda::unit(),
            1 => init_exprs.pop().unwrap(),
            _ => {
                let last = init_exprs.pop().unwrap();
                Lambda::Sequence { exprs: init_exprs, last: Box::new(last) }
            }
        };
        for (id, value) in std::mem::take(&mut self.binds_init).into_iter().rev() {
            init_body = Lambda::let_(id, value, init_body);
        }

        let types = std::mem::replace(
            &mut self.types,
            crate::lower::types::TypeLowering::new(false),
        );
        Prog {
            fns: std::mem::take(&mut self.top_items),
            main,
            init: LFunc { params: vec![], body: init_body, return_ty: None },
            globals: std::mem::take(&mut self.globals),
            type_defs: types.take_defs(),
        }
    }

    fn is_simple_global(&self, c: &Constant) -> bool {
        match c {
            Constant::Bool(_)
            | Constant::Char(_)
            | Constant::Int(_)
            | Constant::Int64(_)
            | Constant::Double(_) => true,
            Constant::String(_) => self.config.use_js_builtin_string,
            Constant::Unit | Constant::Bytes(_) => false,
        }
    }

    /// Phase one of the address table: register every top-level function and
    /// stub before any body is lowered.
    fn collect_top_items(&mut self, program: &Program) {
        for item in &program.items {
            match item {
                TopItem::Fn { binder, func, is_main, .. } if !is_main => {
                    let params: Vec<_> =
                        func.params.iter().map(|p| self.lower_ty(&p.ty)).collect();
                    let ret = self.lower_ty(&func.ret_ty);
                    let addr = self.addrgen.fresh(binder.base_name());
                    self.addrs.insert_toplevel(*binder, addr, params, ret);
                }
                TopItem::Stub { binder, foreign_name, params_ty, return_ty } => {
                    self.stubs.insert(
                        *binder,
                        StubInfo {
                            foreign_name: *foreign_name,
                            params_ty: params_ty.clone(),
                            return_ty: *return_ty,
                            wrapper: once_cell::unsync::OnceCell::new(),
                        },
                    );
                }
                _ => {}
            }
        }
    }

    /// One wrapper item per (interface, method slot) of every declared
    /// implementation; dynamic dispatch jumps through these.
    fn synthesize_object_wrappers(&mut self, program: &Program) {
        for imp in &program.object_impls {
            let abstract_tid = self.types.named_tid(self.env, imp.abstract_path);
            let Some(TypeInfo::Object { methods }) =
                self.env.find_all_type_by_path(imp.abstract_path).cloned()
            else {
                panic!("object impl over non-object type {}", imp.abstract_path)
            };
            let number_of_methods = methods.len();
            assert_eq!(
                imp.methods.len(),
                number_of_methods,
                "impl for {} does not cover the method table",
                imp.abstract_path
            );

            let self_low = self.lower_ty(&imp.self_ty);
            let concrete_tid = self.types.concrete_object_tid(abstract_tid, self_low);

            let mut wrapper_addrs = Vec::new();
            for (slot, impl_fn) in imp.methods.iter().enumerate() {
                let Some(FuncRef::Toplevel { addr, params, ret, .. }) = self.addrs.get(impl_fn)
                else {
                    panic!("object method {impl_fn} is not a registered top function")
                };
                let (impl_addr, impl_params, impl_ret) = (*addr, params.clone(), *ret);

                let wrapper_name = intern(&format!(
                    "{}::{}",
                    resolve(&imp.abstract_path.name),
                    resolve(&methods[slot].0)
                ));
                let waddr = self.addrgen.fresh(wrapper_name);

                let self_id = self.idgen.fresh("self");
                let self_cast = self.idgen.fresh("self.c");
                let recv = self.idgen.fresh("recv");

                let mut wparams =
                    vec![LParam { name: self_id, ty: LowType::Ref(abstract_tid) }];
                let mut call_args = vec![Lambda::var(recv)];
                for (i, pty) in impl_params.iter().enumerate().skip(1) {
                    let p = self.idgen.fresh(&format!("a{i}"));
                    wparams.push(LParam { name: p, ty: *pty });
                    call_args.push(Lambda::var(p));
                }

                let recv_read = non_null_read(
                    impl_params[0],
                    Lambda::GetField {
                        obj: Box::new(Lambda::var(self_cast)),
                        tid: concrete_tid,
                        index: 0,
                        kind: FieldKind::Object { number_of_methods },
                    },
                );
                let body = Lambda::let_(
                    self_cast,
                    Lambda::Cast {
                        expr: Box::new(Lambda::var(self_id)),
                        target_ty: LowType::Ref(concrete_tid),
                    },
                    Lambda::let_(
                        recv,
                        recv_read,
                        Lambda::Apply {
                            target: Target::StaticFn(impl_addr),
                            prim: None,
                            args: call_args,
                        },
                    ),
                );

                self.top_items.push(TopFuncItem {
                    binder: waddr,
                    kind: FnItemKind::TopPrivate,
                    func: LFunc { params: wparams, body, return_ty: Some(impl_ret) },
                    tid: Some(concrete_tid),
                });
                wrapper_addrs.push(waddr);
            }
            self.object_wrappers
                .insert((imp.abstract_path, imp.self_ty.clone()), wrapper_addrs);
        }
    }

    /// Lower a function literal: parameters, optional leading environment
    /// parameter, prologue bindings, the body, and the return joins.
    pub(crate) fn lower_fn_with(
        &mut self,
        f: &FnLit,
        env_param: Option<LParam>,
        prologue: Vec<(Ident, Lambda)>,
        state: FrameState,
    ) -> LoweredFn {
        let mut params = Vec::new();
        if let Some(p) = env_param {
            params.push(p);
        }
        for b in &f.params {
            let p = self.lower_binder(b);
            params.push(p);
        }
        let ret_low = self.lower_ty(&f.ret_ty);

        let wrap_style = match &f.ret_ty {
            CoreType::Result { ok, err } if f.body.ty != f.ret_ty => {
                let tids = self.types.result_tids(self.env, ok, err);
                let ok_low = self.lower_ty(ok);
                let err_low = self.lower_ty(err);
                Some(ReturnStyle::WrapResult {
                    enum_tid: tids.enum_tid,
                    ok_tid: tids.ok_tid,
                    err_tid: tids.err_tid,
                    ok_low,
                    err_low,
                })
            }
            _ => None,
        };
        let needs_ret = wrap_style.is_some() || f.has_return();
        let ret_ctx = needs_ret.then(|| {
            let style = wrap_style.unwrap_or(ReturnStyle::Direct { ret: ret_low });
            ReturnCtx::new(self.idgen.fresh("return"), self.idgen.fresh("raise"), style)
        });

        log::trace!("lowering a {state:?} body with {} params", params.len());
        self.frames.push(Frame { state, ret: ret_ctx });
        let mut body = self.transl(&f.body);
        let frame = self.frames.pop().expect("frame pushed above");
        if let Some(ret) = frame.ret {
            if ret.wraps_result() {
                body = ret.route_tail(body);
            }
            body = ret.wrap_body(body);
        }
        for (id, value) in prologue.into_iter().rev() {
            body = Lambda::let_(id, value, body);
        }
        LoweredFn { params, body, ret: ret_low }
    }

    /// Lower an operand; anything that is not a variable, constant or
    /// function literal is hoisted into a binding.
    pub(crate) fn bind_operand(
        &mut self,
        e: &Expr,
        name: &str,
        binds: &mut Vec<(Ident, Lambda)>,
    ) -> Lambda {
        if e.is_trivial() {
            self.transl(e)
        } else {
            let tmp = self.idgen.fresh(name);
            let value = self.transl(e);
            binds.push((tmp, value));
            Lambda::var(tmp)
        }
    }

    /// Like `bind_operand`, but always yields an identifier; switch
    /// scrutinees and object receivers must be variables.
    pub(crate) fn bind_var(
        &mut self,
        e: &Expr,
        name: &str,
        binds: &mut Vec<(Ident, Lambda)>,
    ) -> Ident {
        if let Term::Var(id) = &e.term
            && !id.is_global()
        {
            return *id;
        }
        let tmp = self.idgen.fresh(name);
        let value = self.transl(e);
        binds.push((tmp, value));
        tmp
    }

    pub(crate) fn transl(&mut self, e: &Expr) -> Lambda {
        match &e.term {
            Term::Const(Constant::Unit) => Lambda::unit(),
            Term::Const(c) => Lambda::Const(c.clone()),

            Term::Var(id) => self.transl_var(id),

            Term::Prim { prim, args } => self.transl_prim(e, *prim, args),

            Term::And(a, b) => {
                let a = self.transl(a);
                let b = self.transl(b);
                Lambda::If {
                    pred: Box::new(a),
                    ifso: Box::new(b),
                    ifnot: Box::new(Lambda::Const(Constant::Bool(false))),
                    ty: LowType::I32Bool,
                }
            }
            Term::Or(a, b) => {
                let a = self.transl(a);
                let b = self.transl(b);
                Lambda::If {
                    pred: Box::new(a),
                    ifso: Box::new(Lambda::Const(Constant::Bool(true))),
                    ifnot: Box::new(b),
                    ty: LowType::I32Bool,
                }
            }

            Term::Let { binder, value, body } => {
                let value = self.transl(value);
                let body = self.transl(body);
                Lambda::let_(binder.id, value, body)
            }

            Term::Letfn { binder, func, kind, body } => match kind {
                LetFnKind::TailJoin | LetFnKind::NontailJoin => {
                    let params = func.params.iter().map(|b| self.lower_binder(b)).collect();
                    // A join body is part of the enclosing function: same
                    // frame, same return joins.
                    let value = self.transl(&func.body);
                    let body = self.transl(body);
                    let ty = self.lower_ty(&e.ty);
                    Lambda::Joinlet {
                        name: binder.id,
                        params,
                        value: Box::new(value),
                        body: Box::new(body),
                        kind: match kind {
                            LetFnKind::TailJoin => JoinKind::TailJoin,
                            _ => JoinKind::NontailJoin,
                        },
                        ty,
                    }
                }
                LetFnKind::Nonrec | LetFnKind::Rec => {
                    self.lower_letfn(binder, func, *kind == LetFnKind::Rec, body)
                }
            },

            Term::Letrec { bindings, body } => self.lower_letrec(bindings, body),

            Term::Function { func, is_raw } => {
                if *is_raw {
                    let addr = self.addrgen.fresh(intern("raw"));
                    let lowered =
                        self.lower_fn_with(func, None, vec![], FrameState::InLocalBody);
                    self.top_items.push(TopFuncItem {
                        binder: addr,
                        kind: FnItemKind::TopPrivate,
                        func: LFunc {
                            params: lowered.params,
                            body: lowered.body,
                            return_ty: Some(lowered.ret),
                        },
                        tid: None,
                    });
                    Lambda::GetRawFunc(addr)
                } else {
                    self.lower_anon(func)
                }
            }

            Term::Apply { func, kind, args } => self.transl_apply(e, func, kind, args),

            Term::Tuple(xs) => {
                let fields_low: Vec<_> = xs.iter().map(|x| self.lower_ty(&x.ty)).collect();
                let tid = self.types.tuple_tid(fields_low);
                let fields = xs.iter().map(|x| self.transl(x)).collect();
                Lambda::Allocate { kind: AllocKind::Tuple, tid, fields }
            }

            Term::Record { path, fields } => {
                let tid = self.types.named_tid(self.env, *path);
                let fields = fields.iter().map(|x| self.transl(x)).collect();
                Lambda::Allocate { kind: AllocKind::Struct, tid, fields }
            }

            Term::RecordUpdate { base, updates } => {
                let CoreType::Named { path, .. } = &base.ty else {
                    panic!("record update over non-record type {:?}", base.ty)
                };
                let Some(TypeInfo::Record { fields }) =
                    self.env.find_all_type_by_path(*path).cloned()
                else {
                    panic!("record update over unknown record {path}")
                };
                let tid = self.types.named_tid(self.env, *path);
                let mut binds = Vec::new();
                let base_var = self.bind_var(base, "base", &mut binds);
                let alloc_fields = (0..fields.len())
                    .map(|i| match updates.iter().find(|(j, _)| *j == i) {
                        Some((_, v)) => self.transl(v),
                        None => {
                            let fty = self.lower_ty(&fields[i].ty);
                            non_null_read(
                                fty,
                                Lambda::GetField {
                                    obj: Box::new(Lambda::var(base_var)),
                                    tid,
                                    index: i,
                                    kind: FieldKind::Struct,
                                },
                            )
                        }
                    })
                    .collect();
                wrap_binds(
                    binds,
                    Lambda::Allocate { kind: AllocKind::Struct, tid, fields: alloc_fields },
                )
            }

            Term::Field { obj, index } => self.transl_field(obj, *index),

            Term::Mutate { obj, index, value } => {
                let value_l = self.transl(value);
                // Constructor-view binders mutate through the enum kind.
                if let Term::Var(id) = &obj.term
                    && let Some(ctid) = self.constr_binders.get(id).copied()
                {
                    return Lambda::SetField {
                        obj: Box::new(Lambda::var(*id)),
                        tid: ctid,
                        index: *index,
                        value: Box::new(value_l),
                        kind: SetFieldKind::Enum,
                    };
                }
                let CoreType::Named { path, .. } = &obj.ty else {
                    panic!("field mutation over non-record type {:?}", obj.ty)
                };
                let tid = self.types.named_tid(self.env, *path);
                let obj = self.transl(obj);
                Lambda::SetField {
                    obj: Box::new(obj),
                    tid,
                    index: *index,
                    value: Box::new(value_l),
                    kind: SetFieldKind::Struct,
                }
            }

            Term::Constructor { tag, args } => {
                let enum_tid = match &e.ty {
                    CoreType::Named { path, .. } => self.types.named_tid(self.env, *path),
                    CoreType::Result { ok, err } => {
                        self.types.result_tids(self.env, ok, err).enum_tid
                    }
                    other => panic!("constructor of non-enum type {other:?}"),
                };
                let tid = self.types.constr_tid(enum_tid, tag);
                let fields = args.iter().map(|a| self.transl(a)).collect();
                Lambda::Allocate { kind: AllocKind::Enum { tag: *tag }, tid, fields }
            }

            Term::Array(elems) => {
                let tid = match &e.ty {
                    CoreType::Array(elem) => {
                        let elem = self.lower_ty(elem);
                        self.types.array_tid(elem)
                    }
                    CoreType::FixedArray(elem) => {
                        let elem = self.lower_ty(elem);
                        self.types.fixed_array_tid(elem)
                    }
                    other => panic!("array literal of non-array type {other:?}"),
                };
                let elems = elems.iter().map(|x| self.transl(x)).collect();
                Lambda::MakeArray { tid, elems }
            }

            Term::Assign { var, value } => {
                assert!(var.is_mutable(), "assignment to immutable {var}");
                let value = self.transl(value);
                Lambda::Assign { var: *var, expr: Box::new(value) }
            }

            Term::Sequence { exprs, last } => {
                let exprs = exprs.iter().map(|x| self.transl(x)).collect();
                let last = self.transl(last);
                Lambda::Sequence { exprs, last: Box::new(last) }
            }

            Term::If { cond, ifso, ifnot } => {
                let ty = self.lower_ty(&e.ty);
                let cond = self.transl(cond);
                let ifso = self.transl(ifso);
                let ifnot = match ifnot {
                    Some(e) => self.transl(e),
                    None => Lambda::unit(),
                };
                Lambda::If {
                    pred: Box::new(cond),
                    ifso: Box::new(ifso),
                    ifnot: Box::new(ifnot),
                    ty,
                }
            }

            Term::SwitchConstr { obj, cases, default } => {
                let enum_tid = match &obj.ty {
                    CoreType::Named { path, .. } => self.types.named_tid(self.env, *path),
                    CoreType::Result { ok, err } => {
                        self.types.result_tids(self.env, ok, err).enum_tid
                    }
                    other => panic!("constructor switch over non-enum type {other:?}"),
                };
                let ty = self.lower_ty(&e.ty);
                let mut binds = Vec::new();
                let obj_var = self.bind_var(obj, "scrut", &mut binds);
                let cases = cases
                    .iter()
                    .map(|case| {
                        let ctid = self.types.constr_tid(enum_tid, &case.tag);
                        let body = match &case.binder {
                            Some(b) => {
                                self.constr_binders.insert(b.id, ctid);
                                let body = self.transl(&case.body);
                                Lambda::let_(
                                    b.id,
                                    Lambda::Cast {
                                        expr: Box::new(Lambda::var(obj_var)),
                                        target_ty: LowType::Ref(ctid),
                                    },
                                    body,
                                )
                            }
                            None => self.transl(&case.body),
                        };
                        (case.tag, body)
                    })
                    .collect();
                let default = default.as_ref().map(|d| Box::new(self.transl(d)));
                wrap_binds(binds, Lambda::Switch { obj: obj_var, cases, default, ty })
            }

            Term::SwitchConstant { obj, cases, default } => {
                self.transl_switch_constant(e, obj, cases, default)
            }

            Term::Loop { params, args, body, label } => {
                let ty = self.lower_ty(&e.ty);
                let params = params.iter().map(|b| self.lower_binder(b)).collect();
                let args = args.iter().map(|a| self.transl(a)).collect();
                let body = self.transl(body);
                Lambda::Loop { params, body: Box::new(body), args, label: *label, ty }
            }

            Term::Break { arg, label } => {
                let arg = arg.as_ref().map(|a| Box::new(self.transl(a)));
                Lambda::Break { arg, label: *label }
            }

            Term::Continue { args, label } => {
                let args = args.iter().map(|a| self.transl(a)).collect();
                Lambda::Continue { args, label: *label }
            }

            Term::Return { value, kind } => {
                let value = self.transl(value);
                match kind {
                    ReturnKind::Plain => self.return_ctx().apply_return(value),
                    ReturnKind::Error { .. } => self.return_ctx().apply_raise(value),
                }
            }

            Term::HandleError { obj, kind } => self.transl_handle_error(obj, kind),

            Term::MakeObject { obj_path, value } => {
                let abstract_tid = self.types.named_tid(self.env, *obj_path);
                let self_low = self.lower_ty(&value.ty);
                let concrete_tid = self.types.concrete_object_tid(abstract_tid, self_low);
                let methods = self
                    .object_wrappers
                    .get(&(*obj_path, value.ty.clone()))
                    .cloned()
                    .unwrap_or_else(|| {
                        panic!("no impl of {obj_path} for {:?}", value.ty)
                    });
                let value = self.transl(value);
                Lambda::Allocate {
                    kind: AllocKind::Object { methods },
                    tid: concrete_tid,
                    fields: vec![value],
                }
            }
        }
    }

    fn transl_var(&mut self, id: &Ident) -> Lambda {
        // A top-level function or stub in value position becomes a closure
        // over its wrapper; plain variables stay variables.
        if let Some(FuncRef::Toplevel { .. }) = self.addrs.get(id) {
            let w = self.top_fn_wrapper(id);
            return Lambda::Closure(crate::clam::term::ClosureAlloc {
                captures: vec![],
                address: crate::clam::term::ClosureAddress::Normal(w.addr),
                tid: w.tid,
            });
        }
        if self.stubs.contains_key(id) {
            let w = self.stub_wrapper(id);
            return Lambda::Closure(crate::clam::term::ClosureAlloc {
                captures: vec![],
                address: crate::clam::term::ClosureAddress::Normal(w.addr),
                tid: w.tid,
            });
        }
        if let Some(FuncRef::Local { .. }) = self.addrs.get(id) {
            panic!("well-known function {id} referenced as a value");
        }
        Lambda::var(*id)
    }

    /// The closure wrapper of a top-level function, minted on first use.
    fn top_fn_wrapper(&mut self, id: &Ident) -> WrapperInfo {
        let Some(FuncRef::Toplevel { addr, params, ret, name_as_closure }) = self.addrs.get(id)
        else {
            unreachable!()
        };
        if let Some(w) = name_as_closure.get() {
            return *w;
        }
        let (fn_addr, params, ret) = (*addr, params.clone(), *ret);

        let sig = FnSig { params: params.clone(), ret };
        let abs_tid = self.types.abstract_closure(sig);
        let tid = self.types.closure_tid(abs_tid, vec![]);
        let wrapper_name = intern(&format!("{}.clo", resolve(&fn_addr.name)));
        let waddr = self.addrgen.fresh(wrapper_name);
        let name = self.idgen.fresh(&format!("{}.clo", resolve(&fn_addr.name)));

        let env_id = self.idgen.fresh("env");
        let mut wparams = vec![LParam { name: env_id, ty: LowType::Ref(abs_tid) }];
        let mut args = Vec::new();
        for (i, pty) in params.iter().enumerate() {
            let p = self.idgen.fresh(&format!("a{i}"));
            wparams.push(LParam { name: p, ty: *pty });
            args.push(Lambda::var(p));
        }
        self.top_items.push(TopFuncItem {
            binder: waddr,
            kind: FnItemKind::TopPrivate,
            func: LFunc {
                params: wparams,
                body: Lambda::Apply { target: Target::StaticFn(fn_addr), prim: None, args },
                return_ty: Some(ret),
            },
            tid: None,
        });

        let info = WrapperInfo { name, addr: waddr, tid };
        let Some(FuncRef::Toplevel { name_as_closure, .. }) = self.addrs.get(id) else {
            unreachable!()
        };
        name_as_closure.set(info).ok().expect("wrapper minted once");
        info
    }

    /// The closure wrapper of a stub, minted on first value use. The body
    /// early-outs around the foreign call.
    fn stub_wrapper(&mut self, id: &Ident) -> WrapperInfo {
        let stub = self.stubs.get(id).expect("stub registered");
        if let Some(w) = stub.wrapper.get() {
            return *w;
        }
        let (foreign_name, params, ret) =
            (stub.foreign_name, stub.params_ty.clone(), stub.return_ty);

        let ret_low = ret.unwrap_or(LowType::I32Unit);
        let sig = FnSig { params: params.clone(), ret: ret_low };
        let abs_tid = self.types.abstract_closure(sig);
        let tid = self.types.closure_tid(abs_tid, vec![]);
        let wrapper_name = intern(&format!("{}.clo", resolve(&foreign_name)));
        let waddr = self.addrgen.fresh(wrapper_name);
        let name = self.idgen.fresh(&format!("{}.clo", resolve(&foreign_name)));

        let env_id = self.idgen.fresh("env");
        let mut wparams = vec![LParam { name: env_id, ty: LowType::Ref(abs_tid) }];
        let mut args = Vec::new();
        for (i, pty) in params.iter().enumerate() {
            let p = self.idgen.fresh(&format!("a{i}"));
            wparams.push(LParam { name: p, ty: *pty });
            args.push(Lambda::var(p));
        }
        self.top_items.push(TopFuncItem {
            binder: waddr,
            kind: FnItemKind::TopPrivate,
            func: LFunc {
                params: wparams,
                body: Lambda::Return(Box::new(Lambda::StubCall {
                    foreign_name,
                    args,
                    params_ty: params,
                    return_ty: ret,
                })),
                return_ty: Some(ret_low),
            },
            tid: None,
        });

        let info = WrapperInfo { name, addr: waddr, tid };
        self.stubs
            .get(id)
            .expect("stub registered")
            .wrapper
            .set(info)
            .ok()
            .expect("wrapper minted once");
        info
    }

    fn transl_prim(&mut self, e: &Expr, prim: Prim, args: &[Expr]) -> Lambda {
        let low_args = |ctx: &mut Self| args.iter().map(|a| ctx.transl(a)).collect::<Vec<_>>();
        match prim {
            Prim::Arith { op, ty } => {
                Lambda::Prim { prim: PrimFn::Arith { op, ty }, args: low_args(self) }
            }
            Prim::Compare { op, ty } => {
                Lambda::Prim { prim: PrimFn::Compare { op, ty }, args: low_args(self) }
            }
            Prim::Not => Lambda::Prim { prim: PrimFn::Not, args: low_args(self) },
            Prim::Panic => Lambda::Prim { prim: PrimFn::Panic, args: low_args(self) },
            Prim::Null => {
                let prim = if self.config.use_js_builtin_string
                    && matches!(&e.ty, CoreType::Option(p) if **p == CoreType::String)
                {
                    PrimFn::NullStringExtern
                } else {
                    PrimFn::Null
                };
                Lambda::Prim { prim, args: vec![] }
            }
            Prim::IsNull => Lambda::Prim { prim: PrimFn::IsNull, args: low_args(self) },
            Prim::AsNonNull => Lambda::Prim { prim: PrimFn::AsNonNull, args: low_args(self) },
            Prim::RefMake => {
                let CoreType::RefCell(elem) = &e.ty else {
                    panic!("ref cell creation at non-cell type {:?}", e.ty)
                };
                let elem = self.lower_ty(elem);
                let tid = self.types.ref_cell_tid(elem);
                Lambda::Allocate { kind: AllocKind::Struct, tid, fields: low_args(self) }
            }
            Prim::RefGet => {
                let CoreType::RefCell(elem) = &args[0].ty else {
                    panic!("ref cell read at non-cell type {:?}", args[0].ty)
                };
                let elem_low = self.lower_ty(elem);
                let tid = self.types.ref_cell_tid(elem_low);
                let obj = self.transl(&args[0]);
                non_null_read(
                    elem_low,
                    Lambda::GetField {
                        obj: Box::new(obj),
                        tid,
                        index: 0,
                        kind: FieldKind::Struct,
                    },
                )
            }
            Prim::RefSet => {
                let CoreType::RefCell(elem) = &args[0].ty else {
                    panic!("ref cell write at non-cell type {:?}", args[0].ty)
                };
                let elem_low = self.lower_ty(elem);
                let tid = self.types.ref_cell_tid(elem_low);
                let obj = self.transl(&args[0]);
                let value = self.transl(&args[1]);
                Lambda::SetField {
                    obj: Box::new(obj),
                    tid,
                    index: 0,
                    value: Box::new(value),
                    kind: SetFieldKind::Struct,
                }
            }
            Prim::FixedArrayLength => {
                Lambda::Prim { prim: PrimFn::ArrayLen, args: low_args(self) }
            }
            Prim::FixedArrayUnsafeGet => {
                let CoreType::FixedArray(elem) = &args[0].ty else {
                    panic!("fixed array read at non-array type {:?}", args[0].ty)
                };
                let elem_low = self.lower_ty(elem);
                let tid = self.types.fixed_array_tid(elem_low);
                let arr = self.transl(&args[0]);
                let index = self.transl(&args[1]);
                Lambda::ArrayGetItem {
                    arr: Box::new(arr),
                    index: Box::new(index),
                    tid,
                    kind: ArrayAccessKind::Unsafe,
                    extra: get_item_extra(elem_low),
                }
            }
        }
    }

    fn transl_field(&mut self, obj: &Expr, index: usize) -> Lambda {
        if let Term::Var(id) = &obj.term
            && let Some(ctid) = self.constr_binders.get(id).copied()
        {
            return Lambda::GetField {
                obj: Box::new(Lambda::var(*id)),
                tid: ctid,
                index,
                kind: FieldKind::Enum,
            };
        }
        match &obj.ty {
            CoreType::Tuple(tys) => {
                let fields: Vec<_> = tys.iter().map(|t| self.lower_ty(t)).collect();
                let fty = fields[index];
                let tid = self.types.tuple_tid(fields);
                let obj = self.transl(obj);
                non_null_read(
                    fty,
                    Lambda::GetField {
                        obj: Box::new(obj),
                        tid,
                        index,
                        kind: FieldKind::Tuple,
                    },
                )
            }
            CoreType::Named { path, .. } => {
                let Some(TypeInfo::Record { fields }) =
                    self.env.find_all_type_by_path(*path).cloned()
                else {
                    panic!("field access on non-record {path}")
                };
                let tid = self.types.named_tid(self.env, *path);
                let fty = self.lower_ty(&fields[index].ty);
                let obj = self.transl(obj);
                non_null_read(
                    fty,
                    Lambda::GetField {
                        obj: Box::new(obj),
                        tid,
                        index,
                        kind: FieldKind::Struct,
                    },
                )
            }
            // The array/view records expose `len` and `buf`/`start` as plain
            // struct fields; the intrinsic rewrites read them this way.
            CoreType::Array(elem) => {
                let elem = self.lower_ty(elem);
                let tid = self.types.array_tid(elem);
                let obj = self.transl(obj);
                Lambda::GetField { obj: Box::new(obj), tid, index, kind: FieldKind::Struct }
            }
            CoreType::ArrayView(elem) => {
                let elem = self.lower_ty(elem);
                let tid = self.types.array_view_tid(elem);
                let obj = self.transl(obj);
                Lambda::GetField { obj: Box::new(obj), tid, index, kind: FieldKind::Struct }
            }
            CoreType::BytesView => {
                let tid = self.types.bytes_view_tid();
                let obj = self.transl(obj);
                Lambda::GetField { obj: Box::new(obj), tid, index, kind: FieldKind::Struct }
            }
            other => panic!("field access on {other:?}"),
        }
    }

    fn transl_switch_constant(
        &mut self,
        e: &Expr,
        obj: &Expr,
        cases: &[(Constant, Expr)],
        default: &Expr,
    ) -> Lambda {
        let ty = self.lower_ty(&e.ty);
        let mut binds = Vec::new();
        match &obj.ty {
            CoreType::Int | CoreType::Char | CoreType::Bool => {
                let obj_var = self.bind_var(obj, "scrut", &mut binds);
                let cases = cases
                    .iter()
                    .map(|(c, body)| (const_to_i32(c), self.transl(body)))
                    .collect();
                let default = self.transl(default);
                wrap_binds(
                    binds,
                    Lambda::Switchint { obj: obj_var, cases, default: Box::new(default), ty },
                )
            }
            CoreType::String => {
                let obj_var = self.bind_var(obj, "scrut", &mut binds);
                let cases = cases
                    .iter()
                    .map(|(c, body)| {
                        let Constant::String(s) = c else {
                            panic!("non-string case on string switch")
                        };
                        (*s, self.transl(body))
                    })
                    .collect();
                let default = self.transl(default);
                wrap_binds(
                    binds,
                    Lambda::Switchstring { obj: obj_var, cases, default: Box::new(default), ty },
                )
            }
            // No dense dispatch for wide keys: compare-and-branch chain.
            CoreType::Int64 | CoreType::Double => {
                let operand = if obj.ty == CoreType::Int64 {
                    crate::mcore::term::OperandTy::I64
                } else {
                    crate::mcore::term::OperandTy::F64
                };
                let obj_var = self.bind_var(obj, "scrut", &mut binds);
                let mut chain = self.transl(default);
                for (c, body) in cases.iter().rev() {
                    let body = self.transl(body);
                    chain = Lambda::If {
                        pred: Box::new(Lambda::Prim {
                            prim: PrimFn::Compare {
                                op: crate::mcore::term::CompareOp::Eq,
                                ty: operand,
                            },
                            args: vec![Lambda::var(obj_var), Lambda::Const(c.clone())],
                        }),
                        ifso: Box::new(body),
                        ifnot: Box::new(chain),
                        ty,
                    };
                }
                wrap_binds(binds, chain)
            }
            other => panic!("constant switch over {other:?}"),
        }
    }

    fn transl_handle_error(&mut self, obj: &Expr, kind: &HandleKind) -> Lambda {
        match kind {
            HandleKind::ToResult => {
                let CoreType::Result { ok, err } = obj_result_ty(obj) else {
                    panic!("to-result over a call that cannot fail")
                };
                let tids = self.types.result_tids(self.env, &ok, &err);
                let body = self.transl(obj);
                let ok_alloc = Lambda::Allocate {
                    kind: AllocKind::Enum {
                        tag: crate::mcore::term::Tag { name: intern("Ok"), index: 0 },
                    },
                    tid: tids.ok_tid,
                    fields: vec![body],
                };
                let err_alloc = Lambda::Allocate {
                    kind: AllocKind::Enum {
                        tag: crate::mcore::term::Tag { name: intern("Err"), index: 1 },
                    },
                    tid: tids.err_tid,
                    fields: vec![Lambda::Prim { prim: PrimFn::CaughtError, args: vec![] }],
                };
                Lambda::Catch {
                    body: Box::new(ok_alloc),
                    on_exception: Box::new(err_alloc),
                    ty: LowType::Ref(tids.enum_tid),
                }
            }
            HandleKind::JoinApply { join } => {
                let ty = self.lower_ty(&obj.ty);
                let body = self.transl(obj);
                Lambda::Catch {
                    body: Box::new(body),
                    on_exception: Box::new(Lambda::Joinapply {
                        name: *join,
                        args: vec![Lambda::Prim { prim: PrimFn::CaughtError, args: vec![] }],
                    }),
                    ty,
                }
            }
            HandleKind::ReturnErr { .. } => {
                let ty = self.lower_ty(&obj.ty);
                let body = self.transl(obj);
                let on_exception = self.return_ctx().propagate_caught();
                Lambda::Catch { body: Box::new(body), on_exception: Box::new(on_exception), ty }
            }
        }
    }

    fn transl_apply(
        &mut self,
        e: &Expr,
        func: &Ident,
        kind: &ApplyKind,
        args: &[Expr],
    ) -> Lambda {
        if matches!(kind, ApplyKind::Join) {
            let args = args.iter().map(|a| self.transl(a)).collect();
            return Lambda::Joinapply { name: *func, args };
        }

        let mut prim_tag = None;
        if let Some(tag) = self.env.intrinsic_of(func) {
            if let Some(rewritten) = self.try_intrinsic(tag, args, &e.ty) {
                return rewritten;
            }
            prim_tag = Some(tag);
        }

        if let Some(fref) = self.addrs.get(func) {
            return match fref {
                FuncRef::Toplevel { addr, .. } => {
                    let addr = *addr;
                    let args = args.iter().map(|a| self.transl(a)).collect();
                    Lambda::Apply { target: Target::StaticFn(addr), prim: prim_tag, args }
                }
                FuncRef::Local { addr, env } => {
                    let addr = *addr;
                    let env = env.clone();
                    let mut call_args = match &env {
                        LocalEnv::None => Vec::new(),
                        LocalEnv::Value(id, _) => vec![Lambda::var(*id)],
                        LocalEnv::Struct(id, _) => vec![Lambda::var(*id)],
                    };
                    call_args.extend(args.iter().map(|a| self.transl(a)));
                    Lambda::Apply {
                        target: Target::StaticFn(addr),
                        prim: prim_tag,
                        args: call_args,
                    }
                }
            };
        }

        if let Some(stub) = self.stubs.get(func) {
            let (foreign_name, params_ty, return_ty) =
                (stub.foreign_name, stub.params_ty.clone(), stub.return_ty);
            let args = args.iter().map(|a| self.transl(a)).collect();
            return Lambda::StubCall { foreign_name, args, params_ty, return_ty };
        }

        if let Ident::Method { name, .. } = func {
            // Dynamic dispatch through an object interface.
            let receiver = args.first().expect("method call without a receiver");
            let CoreType::Named { path, .. } = &receiver.ty else {
                panic!("method {func} on non-object receiver {:?}", receiver.ty)
            };
            let infos = self.env.find_dot_method(*path, *name);
            let info = infos
                .first()
                .unwrap_or_else(|| panic!("method {func} not found on {path}"));
            let method_index = info.index;
            let method_low = {
                let ty = info.ty.clone();
                self.lower_ty(&ty)
            };
            let mut binds = Vec::new();
            let obj_var = self.bind_var(receiver, "recv", &mut binds);
            let call_args = args[1..].iter().map(|a| self.transl(a)).collect();
            return wrap_binds(
                binds,
                Lambda::Apply {
                    target: Target::Object { obj: obj_var, method_index, method_ty: method_low },
                    prim: prim_tag,
                    args: call_args,
                },
            );
        }

        assert!(!func.is_global(), "unresolved global callee {func}");
        let args = args.iter().map(|a| self.transl(a)).collect();
        Lambda::Apply { target: Target::Dynamic(*func), prim: prim_tag, args }
    }
}

/// The result type produced by an error-raising call being handled.
fn obj_result_ty(obj: &Expr) -> CoreType {
    match &obj.term {
        Term::Apply { kind: ApplyKind::Normal { func_ty }, .. } => match func_ty {
            CoreType::Arrow { ret, err: Some(err), .. } => {
                CoreType::Result { ok: ret.clone(), err: err.clone() }
            }
            _ => panic!("handled call has no error component"),
        },
        _ => panic!("handle_error over a non-call"),
    }
}

pub(crate) fn const_to_i32(c: &Constant) -> i32 {
    match c {
        Constant::Int(i) => *i,
        Constant::Char(c) => *c as i32,
        Constant::Bool(b) => *b as i32,
        other => panic!("constant {other:?} in integer switch"),
    }
}

/// Element-dependent decoration of array reads.
pub(crate) fn get_item_extra(elem: LowType) -> GetItemExtra {
    match elem {
        LowType::Ref(_) | LowType::RefString | LowType::RefBytes | LowType::RefFunc => {
            GetItemExtra::NeedNonNullCast
        }
        LowType::I32Bool | LowType::I32Unit => GetItemExtra::NeedSignedInfo { signed: false },
        LowType::I32 => GetItemExtra::NeedSignedInfo { signed: true },
        _ => GetItemExtra::NoExtra,
    }
}
