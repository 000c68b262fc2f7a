//! Inline specialization of recognized built-in methods.
//!
//! Iterator combinators are rewritten as small MCore templates built with
//! fresh variables and fed back through the normal lowering, so the closure
//! conversion they need comes for free. Array and view accessors go
//! straight to Clam. A rewrite may decline (unknown element type, disabled
//! backend); the caller then emits a tagged call-through.

use crate::{
    clam::{
        ltype::LowType,
        term::{
            AllocKind, ArrayAccessKind, FieldKind, GetItemExtra, Lambda, PrimFn,
        },
    },
    global_env::Intrinsic,
    ident::Ident,
    lower::{
        context::Ctx,
        transl::{get_item_extra, wrap_binds},
    },
    mcore::term::{
        ApplyKind, ArithOp, Binder, CompareOp, Expr, FnLit, OperandTy, Prim, Term,
    },
    types::CoreType,
};

/// Iterator continuation sentinels.
const GO: i32 = 1;
const END: i32 = 0;

fn prim(p: Prim, args: Vec<Expr>, ty: CoreType) -> Expr {
    Expr::new(Term::Prim { prim: p, args }, ty)
}

fn add_i32(a: Expr, b: Expr) -> Expr {
    prim(
        Prim::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
        vec![a, b],
        CoreType::Int,
    )
}

fn lt_i32(a: Expr, b: Expr) -> Expr {
    prim(
        Prim::Compare { op: CompareOp::Lt, ty: OperandTy::I32 },
        vec![a, b],
        CoreType::Bool,
    )
}

fn eq_i32(a: Expr, b: Expr) -> Expr {
    prim(
        Prim::Compare { op: CompareOp::Eq, ty: OperandTy::I32 },
        vec![a, b],
        CoreType::Bool,
    )
}

fn go() -> Expr {
    Expr::int(GO)
}

fn end() -> Expr {
    Expr::int(END)
}

fn call(f: Ident, func_ty: CoreType, args: Vec<Expr>, ret: CoreType) -> Expr {
    Expr::new(
        Term::Apply { func: f, kind: ApplyKind::Normal { func_ty }, args },
        ret,
    )
}

fn lambda(params: Vec<Binder>, ret: CoreType, body: Expr) -> Expr {
    let f = FnLit::new(params, ret, body);
    let ty = f.ty();
    Expr::new(Term::Function { func: Box::new(f), is_raw: false }, ty)
}

fn iter_elem(ty: &CoreType) -> CoreType {
    match ty {
        CoreType::Iter(elem) => (**elem).clone(),
        other => panic!("iterator intrinsic over {other:?}"),
    }
}

fn arrow_ret(ty: &CoreType) -> CoreType {
    ty.as_arrow().expect("function argument of an intrinsic").1
}

impl<'a> Ctx<'a> {
    /// MCore-level operand hoisting for the templates.
    fn core_bind(&mut self, e: &Expr, name: &str, binds: &mut Vec<(Binder, Expr)>) -> Expr {
        if e.is_trivial() && !matches!(e.term, Term::Function { .. }) {
            return e.clone();
        }
        let binder = Binder::new(self.idgen.fresh(name), e.ty.clone());
        binds.push((binder.clone(), e.clone()));
        Expr::var_of(&binder)
    }

    /// Hoist an expression into callee position: always an identifier.
    fn core_bind_callee(
        &mut self,
        e: &Expr,
        name: &str,
        binds: &mut Vec<(Binder, Expr)>,
    ) -> (Ident, CoreType) {
        if let Term::Var(id) = &e.term
            && !id.is_global()
        {
            return (*id, e.ty.clone());
        }
        let binder = Binder::new(self.idgen.fresh(name), e.ty.clone());
        binds.push((binder.clone(), e.clone()));
        (binder.id, e.ty.clone())
    }

    /// Wrap the template in its hoisted bindings and lower it.
    fn finish_template(&mut self, binds: Vec<(Binder, Expr)>, body: Expr) -> Lambda {
        let wrapped = binds
            .into_iter()
            .rev()
            .fold(body, |body, (binder, value)| Expr::let_(binder, value, body));
        self.transl(&wrapped)
    }

    /// Attempt the rewrite; `None` means fall back to a tagged call.
    pub(crate) fn try_intrinsic(
        &mut self,
        tag: Intrinsic,
        args: &[Expr],
        ret_ty: &CoreType,
    ) -> Option<Lambda> {
        match tag {
            Intrinsic::FixedArrayIter => Some(self.fixed_array_iter(args)),
            Intrinsic::IterIter => Some(self.iter_iter(args)),
            Intrinsic::IterMap => Some(self.iter_map(args)),
            Intrinsic::IterFilter => Some(self.iter_filter(args)),
            Intrinsic::IterTake => Some(self.iter_take(args)),
            Intrinsic::IterReduce => Some(self.iter_reduce(args, ret_ty)),
            Intrinsic::IterFlatMap => Some(self.iter_flat_map(args)),
            Intrinsic::IterRepeat => Some(self.iter_repeat(args)),
            Intrinsic::IterConcat => Some(self.iter_concat(args)),
            Intrinsic::IterFromArray => Some(self.iter_from_array(args)),
            Intrinsic::ArrayLength => Some(self.record_length(&args[0], 1)),
            Intrinsic::ArrayViewLength | Intrinsic::BytesViewLength => {
                Some(self.record_length(&args[0], 2))
            }
            Intrinsic::ArrayUnsafeGet => Some(self.array_get(args, false)),
            Intrinsic::ArrayGet => Some(self.array_get(args, true)),
            Intrinsic::ArrayUnsafeSet => Some(self.array_set(args, false)),
            Intrinsic::ArraySet => Some(self.array_set(args, true)),
            Intrinsic::ArrayViewUnsafeGet => Some(self.view_get(args)),
            Intrinsic::ArrayViewUnsafeSet => Some(self.view_set(args)),
            Intrinsic::BytesViewUnsafeGet => Some(self.bytes_view_get(args)),
            Intrinsic::BytesViewUnsafeSet => Some(self.bytes_view_set(args)),
            Intrinsic::ArrayViewUnsafeAsView => Some(self.as_view(args)),
            Intrinsic::BytesViewUnsafeAsView => Some(self.bytes_as_view(args)),
            Intrinsic::CharToString => {
                if self.config.use_js_builtin_string {
                    let arg = self.transl(&args[0]);
                    Some(Lambda::Prim { prim: PrimFn::CharToString, args: vec![arg] })
                } else {
                    None
                }
            }
            Intrinsic::OpLt => self.compare(CompareOp::Lt, args),
            Intrinsic::OpLe => self.compare(CompareOp::Le, args),
            Intrinsic::OpGt => self.compare(CompareOp::Gt, args),
            Intrinsic::OpGe => self.compare(CompareOp::Ge, args),
            Intrinsic::OpNotEqual => self.compare(CompareOp::Ne, args),
        }
    }

    /// Polymorphic comparison, specialized on the first argument's type.
    fn compare(&mut self, op: CompareOp, args: &[Expr]) -> Option<Lambda> {
        let ty = match &args[0].ty {
            CoreType::Int | CoreType::Char | CoreType::Bool => OperandTy::I32,
            CoreType::Int64 => OperandTy::I64,
            CoreType::Float => OperandTy::F32,
            CoreType::Double => OperandTy::F64,
            _ => return None,
        };
        let a = self.transl(&args[0]);
        let b = self.transl(&args[1]);
        Some(Lambda::Prim { prim: PrimFn::Compare { op, ty }, args: vec![a, b] })
    }

    /// `arr.iter(f)`: an explicit counting loop over the raw buffer.
    fn fixed_array_iter(&mut self, args: &[Expr]) -> Lambda {
        let elem = match &args[0].ty {
            CoreType::FixedArray(e) => (**e).clone(),
            other => panic!("fixed array iteration over {other:?}"),
        };
        let mut binds = Vec::new();
        let arr = self.core_bind(&args[0], "arr", &mut binds);

        let len = Binder::new(self.idgen.fresh("len"), CoreType::Int);
        let i = Binder::new(self.idgen.fresh("i"), CoreType::Int);
        let p = Binder::new(self.idgen.fresh("p"), elem.clone());
        let label = self.idgen.fresh_label("iter");

        let get = prim(
            Prim::FixedArrayUnsafeGet,
            vec![arr.clone(), Expr::var_of(&i)],
            elem.clone(),
        );
        // A literal sink is inlined by binding its parameter; anything else
        // is called.
        let step = match &args[1].term {
            Term::Function { func, is_raw: false } if func.params.len() == 1 => Expr::let_(
                func.params[0].clone(),
                get,
                func.body.clone(),
            ),
            _ => {
                let (f, fty) = self.core_bind_callee(&args[1], "f", &mut binds);
                Expr::let_(
                    p.clone(),
                    get,
                    call(f, fty, vec![Expr::var_of(&p)], CoreType::Unit),
                )
            }
        };

        let body = Expr::new(
            Term::If {
                cond: Box::new(lt_i32(Expr::var_of(&i), Expr::var_of(&len))),
                ifso: Box::new(Expr::seq(
                    vec![step],
                    Expr::new(
                        Term::Continue {
                            args: vec![add_i32(Expr::var_of(&i), Expr::int(1))],
                            label,
                        },
                        CoreType::Unit,
                    ),
                )),
                ifnot: None,
            },
            CoreType::Unit,
        );
        let lp = Expr::new(
            Term::Loop {
                params: vec![i],
                args: vec![Expr::int(0)],
                body: Box::new(body),
                label,
            },
            CoreType::Unit,
        );
        let template = Expr::let_(
            len,
            prim(Prim::FixedArrayLength, vec![arr], CoreType::Int),
            lp,
        );
        self.finish_template(binds, template)
    }

    /// `it.each(f)`: drive the iterator with a sink that always continues.
    fn iter_iter(&mut self, args: &[Expr]) -> Lambda {
        let elem = iter_elem(&args[0].ty);
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let (f, f_ty) = self.core_bind_callee(&args[1], "f", &mut binds);

        let a = Binder::new(self.idgen.fresh("a"), elem.clone());
        let sink = lambda(
            vec![a.clone()],
            CoreType::Int,
            Expr::seq(
                vec![call(f, f_ty, vec![Expr::var_of(&a)], arrow_ret(&args[1].ty))],
                go(),
            ),
        );
        let drive = call(it, it_ty, vec![sink], CoreType::Int);
        let template = Expr::seq(vec![drive], Expr::unit());
        self.finish_template(binds, template)
    }

    /// `it.map(f)`: a new iterator feeding `f`'s results to the sink.
    fn iter_map(&mut self, args: &[Expr]) -> Lambda {
        let a_ty = iter_elem(&args[0].ty);
        let b_ty = arrow_ret(&args[1].ty);
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let (f, f_ty) = self.core_bind_callee(&args[1], "f", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&b_ty));
        let a = Binder::new(self.idgen.fresh("a"), a_ty);
        let inner = lambda(
            vec![a.clone()],
            CoreType::Int,
            call(
                k.id,
                k.ty.clone(),
                vec![call(f, f_ty, vec![Expr::var_of(&a)], b_ty)],
                CoreType::Int,
            ),
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            call(it, it_ty, vec![inner], CoreType::Int),
        );
        self.finish_template(binds, template)
    }

    /// `it.filter(f)`: pass matching elements, continue otherwise.
    fn iter_filter(&mut self, args: &[Expr]) -> Lambda {
        let a_ty = iter_elem(&args[0].ty);
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let (f, f_ty) = self.core_bind_callee(&args[1], "f", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&a_ty));
        let a = Binder::new(self.idgen.fresh("a"), a_ty);
        let inner = lambda(
            vec![a.clone()],
            CoreType::Int,
            Expr::new(
                Term::If {
                    cond: Box::new(call(f, f_ty, vec![Expr::var_of(&a)], CoreType::Bool)),
                    ifso: Box::new(call(
                        k.id,
                        k.ty.clone(),
                        vec![Expr::var_of(&a)],
                        CoreType::Int,
                    )),
                    ifnot: Some(Box::new(go())),
                },
                CoreType::Int,
            ),
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            call(it, it_ty, vec![inner], CoreType::Int),
        );
        self.finish_template(binds, template)
    }

    /// `it.take(n)`: count through a heap cell, early-exit at `n`.
    fn iter_take(&mut self, args: &[Expr]) -> Lambda {
        let a_ty = iter_elem(&args[0].ty);
        let cell_ty = CoreType::RefCell(Box::new(CoreType::Int));
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let n = self.core_bind(&args[1], "n", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&a_ty));
        let a = Binder::new(self.idgen.fresh("a"), a_ty);
        let cell = Binder::new(self.idgen.fresh("taken"), cell_ty.clone());

        let count = prim(Prim::RefGet, vec![Expr::var_of(&cell)], CoreType::Int);
        let bump = prim(
            Prim::RefSet,
            vec![Expr::var_of(&cell), add_i32(count.clone(), Expr::int(1))],
            CoreType::Unit,
        );
        let inner = lambda(
            vec![a.clone()],
            CoreType::Int,
            Expr::new(
                Term::If {
                    cond: Box::new(lt_i32(count, n)),
                    ifso: Box::new(Expr::seq(
                        vec![bump],
                        call(k.id, k.ty.clone(), vec![Expr::var_of(&a)], CoreType::Int),
                    )),
                    ifnot: Some(Box::new(end())),
                },
                CoreType::Int,
            ),
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            Expr::let_(
                cell,
                prim(Prim::RefMake, vec![Expr::int(0)], cell_ty),
                call(it, it_ty, vec![inner], CoreType::Int),
            ),
        );
        self.finish_template(binds, template)
    }

    /// `it.reduce(init, f)`: accumulate through a heap cell.
    fn iter_reduce(&mut self, args: &[Expr], ret_ty: &CoreType) -> Lambda {
        let a_ty = iter_elem(&args[0].ty);
        let acc_ty = ret_ty.clone();
        let cell_ty = CoreType::RefCell(Box::new(acc_ty.clone()));
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let init = self.core_bind(&args[1], "init", &mut binds);
        let (f, f_ty) = self.core_bind_callee(&args[2], "f", &mut binds);

        let a = Binder::new(self.idgen.fresh("a"), a_ty);
        let cell = Binder::new(self.idgen.fresh("acc"), cell_ty.clone());

        let folded = call(
            f,
            f_ty,
            vec![
                prim(Prim::RefGet, vec![Expr::var_of(&cell)], acc_ty.clone()),
                Expr::var_of(&a),
            ],
            acc_ty.clone(),
        );
        let sink = lambda(
            vec![a.clone()],
            CoreType::Int,
            Expr::seq(
                vec![prim(
                    Prim::RefSet,
                    vec![Expr::var_of(&cell), folded],
                    CoreType::Unit,
                )],
                go(),
            ),
        );
        let template = Expr::let_(
            cell.clone(),
            prim(Prim::RefMake, vec![init], cell_ty),
            Expr::seq(
                vec![call(it, it_ty, vec![sink], CoreType::Int)],
                prim(Prim::RefGet, vec![Expr::var_of(&cell)], acc_ty),
            ),
        );
        self.finish_template(binds, template)
    }

    /// `it.flat_map(f)`: run each produced iterator against the same sink.
    fn iter_flat_map(&mut self, args: &[Expr]) -> Lambda {
        let a_ty = iter_elem(&args[0].ty);
        let b_ty = iter_elem(&arrow_ret(&args[1].ty));
        let mut binds = Vec::new();
        let (it, it_ty) = self.core_bind_callee(&args[0], "it", &mut binds);
        let (f, f_ty) = self.core_bind_callee(&args[1], "f", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&b_ty));
        let a = Binder::new(self.idgen.fresh("a"), a_ty);
        let it2 = Binder::new(
            self.idgen.fresh("it2"),
            CoreType::Iter(Box::new(b_ty.clone())),
        );
        let inner = lambda(
            vec![a.clone()],
            CoreType::Int,
            Expr::let_(
                it2.clone(),
                call(f, f_ty, vec![Expr::var_of(&a)], it2.ty.clone()),
                call(
                    it2.id,
                    it2.ty.clone(),
                    vec![Expr::var_of(&k)],
                    CoreType::Int,
                ),
            ),
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            call(it, it_ty, vec![inner], CoreType::Int),
        );
        self.finish_template(binds, template)
    }

    /// `Iter::repeat(a)`: feed the sink forever, stop only on END.
    fn iter_repeat(&mut self, args: &[Expr]) -> Lambda {
        let a_ty = args[0].ty.clone();
        let mut binds = Vec::new();
        let a = self.core_bind(&args[0], "a", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&a_ty));
        let label = self.idgen.fresh_label("repeat");
        let body = Expr::new(
            Term::If {
                cond: Box::new(eq_i32(
                    call(k.id, k.ty.clone(), vec![a], CoreType::Int),
                    go(),
                )),
                ifso: Box::new(Expr::new(
                    Term::Continue { args: vec![], label },
                    CoreType::Int,
                )),
                ifnot: Some(Box::new(Expr::new(
                    Term::Break { arg: Some(Box::new(end())), label },
                    CoreType::Int,
                ))),
            },
            CoreType::Int,
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            Expr::new(
                Term::Loop { params: vec![], args: vec![], body: Box::new(body), label },
                CoreType::Int,
            ),
        );
        self.finish_template(binds, template)
    }

    /// `it1 + it2`: drive the first; only if it ran dry, drive the second.
    fn iter_concat(&mut self, args: &[Expr]) -> Lambda {
        let mut binds = Vec::new();
        let (it1, it1_ty) = self.core_bind_callee(&args[0], "it1", &mut binds);
        let (it2, it2_ty) = self.core_bind_callee(&args[1], "it2", &mut binds);
        let a_ty = iter_elem(&args[0].ty);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&a_ty));
        let r1 = Binder::new(self.idgen.fresh("r1"), CoreType::Int);
        let template = lambda(
            vec![k.clone()],
            CoreType::Int,
            Expr::let_(
                r1.clone(),
                call(it1, it1_ty, vec![Expr::var_of(&k)], CoreType::Int),
                Expr::new(
                    Term::If {
                        cond: Box::new(eq_i32(Expr::var_of(&r1), end())),
                        ifso: Box::new(end()),
                        ifnot: Some(Box::new(call(
                            it2,
                            it2_ty,
                            vec![Expr::var_of(&k)],
                            CoreType::Int,
                        ))),
                    },
                    CoreType::Int,
                ),
            ),
        );
        self.finish_template(binds, template)
    }

    /// `arr.iter()` as a first-class iterator over the raw buffer.
    fn iter_from_array(&mut self, args: &[Expr]) -> Lambda {
        let elem = match &args[0].ty {
            CoreType::FixedArray(e) => (**e).clone(),
            other => panic!("iterator over non-array {other:?}"),
        };
        let mut binds = Vec::new();
        let arr = self.core_bind(&args[0], "arr", &mut binds);

        let k = Binder::new(self.idgen.fresh("k"), CoreType::iter_sink(&elem));
        let len = Binder::new(self.idgen.fresh("len"), CoreType::Int);
        let i = Binder::new(self.idgen.fresh("i"), CoreType::Int);
        let p = Binder::new(self.idgen.fresh("p"), elem.clone());
        let label = self.idgen.fresh_label("iter");

        let step = Expr::let_(
            p.clone(),
            prim(
                Prim::FixedArrayUnsafeGet,
                vec![arr.clone(), Expr::var_of(&i)],
                elem,
            ),
            Expr::new(
                Term::If {
                    cond: Box::new(eq_i32(
                        call(k.id, k.ty.clone(), vec![Expr::var_of(&p)], CoreType::Int),
                        go(),
                    )),
                    ifso: Box::new(Expr::new(
                        Term::Continue {
                            args: vec![add_i32(Expr::var_of(&i), Expr::int(1))],
                            label,
                        },
                        CoreType::Int,
                    )),
                    ifnot: Some(Box::new(Expr::new(
                        Term::Break { arg: Some(Box::new(end())), label },
                        CoreType::Int,
                    ))),
                },
                CoreType::Int,
            ),
        );
        let body = Expr::new(
            Term::If {
                cond: Box::new(lt_i32(Expr::var_of(&i), Expr::var_of(&len))),
                ifso: Box::new(step),
                ifnot: Some(Box::new(go())),
            },
            CoreType::Int,
        );
        let template = lambda(
            vec![k],
            CoreType::Int,
            Expr::let_(
                len,
                prim(Prim::FixedArrayLength, vec![arr], CoreType::Int),
                Expr::new(
                    Term::Loop {
                        params: vec![i],
                        args: vec![Expr::int(0)],
                        body: Box::new(body),
                        label,
                    },
                    CoreType::Int,
                ),
            ),
        );
        self.finish_template(binds, template)
    }

    /// Length is a plain field of the record.
    fn record_length(&mut self, obj: &Expr, index: usize) -> Lambda {
        let tid = match &obj.ty {
            CoreType::Array(elem) => {
                let elem = self.lower_ty(elem);
                self.types.array_tid(elem)
            }
            CoreType::ArrayView(elem) => {
                let elem = self.lower_ty(elem);
                self.types.array_view_tid(elem)
            }
            CoreType::BytesView => self.types.bytes_view_tid(),
            other => panic!("length of {other:?}"),
        };
        let obj = self.transl(obj);
        Lambda::GetField { obj: Box::new(obj), tid, index, kind: FieldKind::Struct }
    }

    fn array_parts(&mut self, arr: &Expr) -> (LowType, crate::clam::ltype::Tid, crate::clam::ltype::Tid) {
        let CoreType::Array(elem) = &arr.ty else {
            panic!("array accessor over {:?}", arr.ty)
        };
        let elem_low = self.lower_ty(elem);
        let record_tid = self.types.array_tid(elem_low);
        let buf_tid = self.types.fixed_array_tid(elem_low);
        (elem_low, record_tid, buf_tid)
    }

    fn bounds_check(arr_var: Ident, index: Lambda, record_tid: crate::clam::ltype::Tid) -> Lambda {
        let len = Lambda::GetField {
            obj: Box::new(Lambda::var(arr_var)),
            tid: record_tid,
            index: 1,
            kind: FieldKind::Struct,
        };
        let lt_zero = Lambda::Prim {
            prim: PrimFn::Compare { op: CompareOp::Lt, ty: OperandTy::I32 },
            args: vec![index.clone(), Lambda::int(0)],
        };
        let ge_len = Lambda::Prim {
            prim: PrimFn::Compare { op: CompareOp::Ge, ty: OperandTy::I32 },
            args: vec![index, len],
        };
        let out_of_bounds = Lambda::If {
            pred: Box::new(lt_zero),
            ifso: Box::new(Lambda::Const(crate::mcore::term::Constant::Bool(true))),
            ifnot: Box::new(ge_len),
            ty: LowType::I32Bool,
        };
        Lambda::If {
            pred: Box::new(out_of_bounds),
            ifso: Box::new(Lambda::Prim { prim: PrimFn::Panic, args: vec![] }),
            ifnot: Box::new(Lambda::unit()),
            ty: LowType::I32Unit,
        }
    }

    fn array_buf(arr_var: Ident, record_tid: crate::clam::ltype::Tid) -> Lambda {
        Lambda::Prim {
            prim: PrimFn::AsNonNull,
            args: vec![Lambda::GetField {
                obj: Box::new(Lambda::var(arr_var)),
                tid: record_tid,
                index: 0,
                kind: FieldKind::Struct,
            }],
        }
    }

    fn array_get(&mut self, args: &[Expr], checked: bool) -> Lambda {
        let (elem_low, record_tid, buf_tid) = self.array_parts(&args[0]);
        let mut binds = Vec::new();
        let arr_var = self.bind_var(&args[0], "arr", &mut binds);
        let index = self.bind_operand(&args[1], "i", &mut binds);

        let get = Lambda::ArrayGetItem {
            arr: Box::new(Self::array_buf(arr_var, record_tid)),
            index: Box::new(index.clone()),
            tid: buf_tid,
            kind: ArrayAccessKind::Unsafe,
            extra: get_item_extra(elem_low),
        };
        let body = if checked {
            Lambda::seq2(Self::bounds_check(arr_var, index, record_tid), get)
        } else {
            get
        };
        wrap_binds(binds, body)
    }

    fn array_set(&mut self, args: &[Expr], checked: bool) -> Lambda {
        let (_, record_tid, buf_tid) = self.array_parts(&args[0]);
        let mut binds = Vec::new();
        let arr_var = self.bind_var(&args[0], "arr", &mut binds);
        let index = self.bind_operand(&args[1], "i", &mut binds);
        let value = self.transl(&args[2]);

        let set = Lambda::ArraySetItem {
            arr: Box::new(Self::array_buf(arr_var, record_tid)),
            index: Box::new(index.clone()),
            value: Box::new(value),
            tid: buf_tid,
            kind: ArrayAccessKind::Unsafe,
        };
        let body = if checked {
            Lambda::seq2(Self::bounds_check(arr_var, index, record_tid), set)
        } else {
            set
        };
        wrap_binds(binds, body)
    }

    fn view_parts(&mut self, view: &Expr) -> (LowType, crate::clam::ltype::Tid, crate::clam::ltype::Tid) {
        let CoreType::ArrayView(elem) = &view.ty else {
            panic!("view accessor over {:?}", view.ty)
        };
        let elem_low = self.lower_ty(elem);
        let view_tid = self.types.array_view_tid(elem_low);
        let buf_tid = self.types.fixed_array_tid(elem_low);
        (elem_low, view_tid, buf_tid)
    }

    fn offset_index(view_var: Ident, view_tid: crate::clam::ltype::Tid, index: Lambda) -> Lambda {
        let start = Lambda::GetField {
            obj: Box::new(Lambda::var(view_var)),
            tid: view_tid,
            index: 1,
            kind: FieldKind::Struct,
        };
        Lambda::Prim {
            prim: PrimFn::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
            args: vec![index, start],
        }
    }

    fn view_get(&mut self, args: &[Expr]) -> Lambda {
        let (elem_low, view_tid, buf_tid) = self.view_parts(&args[0]);
        let mut binds = Vec::new();
        let view_var = self.bind_var(&args[0], "view", &mut binds);
        let index = self.transl(&args[1]);

        let get = Lambda::ArrayGetItem {
            arr: Box::new(Self::array_buf(view_var, view_tid)),
            index: Box::new(Self::offset_index(view_var, view_tid, index)),
            tid: buf_tid,
            kind: ArrayAccessKind::Unsafe,
            extra: get_item_extra(elem_low),
        };
        wrap_binds(binds, get)
    }

    fn view_set(&mut self, args: &[Expr]) -> Lambda {
        let (_, view_tid, buf_tid) = self.view_parts(&args[0]);
        let mut binds = Vec::new();
        let view_var = self.bind_var(&args[0], "view", &mut binds);
        let index = self.transl(&args[1]);
        let value = self.transl(&args[2]);

        let set = Lambda::ArraySetItem {
            arr: Box::new(Self::array_buf(view_var, view_tid)),
            index: Box::new(Self::offset_index(view_var, view_tid, index)),
            value: Box::new(value),
            tid: buf_tid,
            kind: ArrayAccessKind::Unsafe,
        };
        wrap_binds(binds, set)
    }

    fn bytes_view_get(&mut self, args: &[Expr]) -> Lambda {
        let view_tid = self.types.bytes_view_tid();
        let mut binds = Vec::new();
        let view_var = self.bind_var(&args[0], "view", &mut binds);
        let index = self.transl(&args[1]);

        let get = Lambda::ArrayGetItem {
            arr: Box::new(Self::array_buf(view_var, view_tid)),
            index: Box::new(Self::offset_index(view_var, view_tid, index)),
            tid: view_tid,
            kind: ArrayAccessKind::Unsafe,
            extra: GetItemExtra::NeedSignedInfo { signed: false },
        };
        wrap_binds(binds, get)
    }

    fn bytes_view_set(&mut self, args: &[Expr]) -> Lambda {
        let view_tid = self.types.bytes_view_tid();
        let mut binds = Vec::new();
        let view_var = self.bind_var(&args[0], "view", &mut binds);
        let index = self.transl(&args[1]);
        let value = self.transl(&args[2]);

        let set = Lambda::ArraySetItem {
            arr: Box::new(Self::array_buf(view_var, view_tid)),
            index: Box::new(Self::offset_index(view_var, view_tid, index)),
            value: Box::new(value),
            tid: view_tid,
            kind: ArrayAccessKind::Unsafe,
        };
        wrap_binds(binds, set)
    }

    /// Build a view record over an array or a narrower view: same buffer,
    /// accumulated start, length `end - start`. A missing `end` defaults to
    /// the parent's length.
    fn as_view(&mut self, args: &[Expr]) -> Lambda {
        let (view_tid, parent_is_view, parent_tid) = match &args[0].ty {
            CoreType::Array(elem) => {
                let elem = self.lower_ty(elem);
                (self.types.array_view_tid(elem), false, self.types.array_tid(elem))
            }
            CoreType::ArrayView(elem) => {
                let elem = self.lower_ty(elem);
                let vt = self.types.array_view_tid(elem);
                (vt, true, vt)
            }
            other => panic!("as_view over {other:?}"),
        };
        let mut binds = Vec::new();
        let parent_var = self.bind_var(&args[0], "parent", &mut binds);
        let start = self.bind_operand(&args[1], "start", &mut binds);
        let end = match args.get(2) {
            Some(e) => self.bind_operand(e, "end", &mut binds),
            None => Lambda::GetField {
                obj: Box::new(Lambda::var(parent_var)),
                tid: parent_tid,
                index: if parent_is_view { 2 } else { 1 },
                kind: FieldKind::Struct,
            },
        };

        let buf = Self::array_buf(parent_var, parent_tid);
        let new_start = if parent_is_view {
            Lambda::Prim {
                prim: PrimFn::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
                args: vec![
                    start.clone(),
                    Lambda::GetField {
                        obj: Box::new(Lambda::var(parent_var)),
                        tid: parent_tid,
                        index: 1,
                        kind: FieldKind::Struct,
                    },
                ],
            }
        } else {
            start.clone()
        };
        let new_len = Lambda::Prim {
            prim: PrimFn::Arith { op: ArithOp::Sub, ty: OperandTy::I32 },
            args: vec![end, start],
        };
        wrap_binds(
            binds,
            Lambda::Allocate {
                kind: AllocKind::Struct,
                tid: view_tid,
                fields: vec![buf, new_start, new_len],
            },
        )
    }

    fn bytes_as_view(&mut self, args: &[Expr]) -> Lambda {
        let view_tid = self.types.bytes_view_tid();
        let parent_is_view = matches!(&args[0].ty, CoreType::BytesView);
        let mut binds = Vec::new();
        let parent_var = self.bind_var(&args[0], "parent", &mut binds);
        let start = self.bind_operand(&args[1], "start", &mut binds);

        let (buf, base_start, parent_len) = if parent_is_view {
            (
                Self::array_buf(parent_var, view_tid),
                Some(Lambda::GetField {
                    obj: Box::new(Lambda::var(parent_var)),
                    tid: view_tid,
                    index: 1,
                    kind: FieldKind::Struct,
                }),
                Lambda::GetField {
                    obj: Box::new(Lambda::var(parent_var)),
                    tid: view_tid,
                    index: 2,
                    kind: FieldKind::Struct,
                },
            )
        } else {
            (
                Lambda::var(parent_var),
                None,
                Lambda::Prim { prim: PrimFn::ArrayLen, args: vec![Lambda::var(parent_var)] },
            )
        };
        let end = match args.get(2) {
            Some(e) => self.bind_operand(e, "end", &mut binds),
            None => parent_len,
        };
        let new_start = match base_start {
            Some(base) => Lambda::Prim {
                prim: PrimFn::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
                args: vec![start.clone(), base],
            },
            None => start.clone(),
        };
        let new_len = Lambda::Prim {
            prim: PrimFn::Arith { op: ArithOp::Sub, ty: OperandTy::I32 },
            args: vec![end, start],
        };
        wrap_binds(
            binds,
            Lambda::Allocate {
                kind: AllocKind::Struct,
                tid: view_tid,
                fields: vec![buf, new_start, new_len],
            },
        )
    }
}
