use hashlink::LinkedHashSet;

use crate::{
    clam::{
        ltype::{LowType, TypeDef},
        pretty::PrettyOpts,
        term::{
            AllocKind, ArrayAccessKind, ClosureAddress, FnItemKind, GetItemExtra, Lambda, PrimFn,
            Prog, Target,
        },
    },
    config::Config,
    global_env::{ConstrInfo, GlobalEnv, Intrinsic, TableEnv, TypeInfo},
    ident::{IdGen, Ident},
    intern,
    lower::transl_prog,
    mcore::term::{
        ApplyKind, ArithOp, Binder, Constant, ConstrCase, Expr, FnLit, OperandTy, Prim, Program,
        ReturnKind, Tag, Term, TopItem,
    },
    types::{CoreType, TypePath},
};

fn global(name: &str) -> Ident {
    Ident::Qualified { pkg: intern("main"), name: intern(name) }
}

fn lower(program: &Program) -> Prog {
    let env = TableEnv::new();
    let config = Config::default();
    transl_prog(program, &env, &config)
}

fn lower_with(program: &Program, env: &dyn GlobalEnv) -> Prog {
    let config = Config::default();
    transl_prog(program, env, &config)
}

fn printed(prog: &Prog) -> String {
    prog.pretty_string(&PrettyOpts::default())
}

/// Every join application must sit under a joinlet binding its name.
fn check_join_locality(l: &Lambda, scope: &mut Vec<Ident>) {
    match l {
        Lambda::Joinapply { name, args } => {
            assert!(scope.contains(name), "join {name} escaped its joinlet");
            args.iter().for_each(|a| check_join_locality(a, scope));
        }
        Lambda::Joinlet { name, value, body, .. } => {
            check_join_locality(value, scope);
            scope.push(*name);
            check_join_locality(body, scope);
            scope.pop();
        }
        Lambda::Let { value, body, .. } => {
            check_join_locality(value, scope);
            check_join_locality(body, scope);
        }
        Lambda::Sequence { exprs, last } => {
            exprs.iter().for_each(|e| check_join_locality(e, scope));
            check_join_locality(last, scope);
        }
        Lambda::If { pred, ifso, ifnot, .. } => {
            check_join_locality(pred, scope);
            check_join_locality(ifso, scope);
            check_join_locality(ifnot, scope);
        }
        Lambda::Loop { body, args, .. } => {
            args.iter().for_each(|a| check_join_locality(a, scope));
            check_join_locality(body, scope);
        }
        Lambda::Apply { args, .. }
        | Lambda::Prim { args, .. }
        | Lambda::StubCall { args, .. }
        | Lambda::Continue { args, .. } => {
            args.iter().for_each(|a| check_join_locality(a, scope))
        }
        Lambda::Allocate { fields, .. } => {
            fields.iter().for_each(|f| check_join_locality(f, scope))
        }
        Lambda::MakeArray { elems, .. } => {
            elems.iter().for_each(|e| check_join_locality(e, scope))
        }
        Lambda::Switch { cases, default, .. } => {
            cases.iter().for_each(|(_, e)| check_join_locality(e, scope));
            if let Some(d) = default {
                check_join_locality(d, scope);
            }
        }
        Lambda::Switchint { cases, default, .. } => {
            cases.iter().for_each(|(_, e)| check_join_locality(e, scope));
            check_join_locality(default, scope);
        }
        Lambda::Switchstring { cases, default, .. } => {
            cases.iter().for_each(|(_, e)| check_join_locality(e, scope));
            check_join_locality(default, scope);
        }
        Lambda::Assign { expr, .. }
        | Lambda::Cast { expr, .. }
        | Lambda::Event { expr, .. }
        | Lambda::Return(expr) => check_join_locality(expr, scope),
        Lambda::Break { arg, .. } => {
            if let Some(a) = arg {
                check_join_locality(a, scope);
            }
        }
        Lambda::GetField { obj, .. } | Lambda::ClosureField { obj, .. } => {
            check_join_locality(obj, scope)
        }
        Lambda::SetField { obj, value, .. } => {
            check_join_locality(obj, scope);
            check_join_locality(value, scope);
        }
        Lambda::ArrayGetItem { arr, index, .. } => {
            check_join_locality(arr, scope);
            check_join_locality(index, scope);
        }
        Lambda::ArraySetItem { arr, index, value, .. } => {
            check_join_locality(arr, scope);
            check_join_locality(index, scope);
            check_join_locality(value, scope);
        }
        Lambda::Catch { body, on_exception, .. } => {
            check_join_locality(body, scope);
            check_join_locality(on_exception, scope);
        }
        Lambda::Letrec { body, .. } => check_join_locality(body, scope),
        Lambda::Const(_)
        | Lambda::Var { .. }
        | Lambda::Closure(_)
        | Lambda::GetRawFunc(_) => {}
    }
}

fn check_prog_invariants(prog: &Prog) {
    // Addresses are issued once and every static target has an item.
    let mut seen = LinkedHashSet::new();
    for item in &prog.fns {
        assert!(seen.insert(item.binder.index), "address emitted twice");
    }
    for item in &prog.fns {
        let mut scope = Vec::new();
        check_join_locality(&item.func.body, &mut scope);
    }
    let mut scope = Vec::new();
    check_join_locality(&prog.init.body, &mut scope);
    if let Some(main) = &prog.main {
        check_join_locality(&main.body, &mut scope);
    }
}

#[test]
fn scenario_unit_literal() {
    let program = Program {
        items: vec![TopItem::Expr { expr: Expr::unit() }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    assert!(prog.fns.is_empty());
    assert!(prog.main.is_none());
    assert!(prog.globals.is_empty());
    assert_eq!(prog.init.body, Lambda::Const(Constant::Int(0)));
}

#[test]
fn scenario_top_function_value_escape() {
    let f = global("f");
    let g = global("g");
    let f_ty = CoreType::arrow(vec![], CoreType::Int);
    let program = Program {
        items: vec![
            TopItem::Fn {
                binder: f,
                func: FnLit::new(vec![], CoreType::Int, Expr::int(1)),
                export: None,
                is_main: false,
            },
            TopItem::Let {
                binder: Binder::new(g, f_ty.clone()),
                expr: Expr::var(f, f_ty),
            },
        ],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    // The original function plus its closure wrapper.
    assert_eq!(prog.fns.len(), 2);
    let f_item = &prog.fns[0];
    let wrapper = &prog.fns[1];
    assert!(matches!(
        &wrapper.func.body,
        Lambda::Apply { target: Target::StaticFn(a), args, .. }
            if *a == f_item.binder && args.is_empty()
    ));
    // The wrapper takes the abstract environment.
    assert_eq!(wrapper.func.params.len(), 1);

    assert_eq!(prog.globals, vec![(g, None)]);
    let Lambda::Let { name, value, .. } = &prog.init.body else {
        panic!("init must bind the global")
    };
    assert_eq!(*name, g);
    assert!(matches!(
        &**value,
        Lambda::Closure(c)
            if c.captures.is_empty() && c.address == ClosureAddress::Normal(wrapper.binder)
    ));
}

#[test]
fn scenario_well_known_local_single_capture() {
    let mut idg = IdGen::new();
    let top = global("top");
    let x = Binder::new(idg.fresh("x"), CoreType::Int);
    let y = Binder::new(idg.fresh("y"), CoreType::Int);
    let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![CoreType::Int], CoreType::Int));

    let f_body = Expr::new(
        Term::Prim {
            prim: Prim::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
            args: vec![Expr::var_of(&y), Expr::var_of(&x)],
        },
        CoreType::Int,
    );
    let body = Expr::let_(
        x.clone(),
        Expr::int(3),
        Expr::new(
            Term::Letfn {
                binder: f.clone(),
                func: Box::new(FnLit::new(vec![y.clone()], CoreType::Int, f_body)),
                kind: crate::mcore::term::LetFnKind::Nonrec,
                body: Box::new(Expr::apply(
                    f.id,
                    f.ty.clone(),
                    vec![Expr::int(1)],
                    CoreType::Int,
                )),
            },
            CoreType::Int,
        ),
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    // The local function's code item receives the capture directly.
    assert_eq!(prog.fns.len(), 2);
    let f_item = &prog.fns[0];
    assert_eq!(f_item.func.params.len(), 2);
    assert_eq!(f_item.func.params[0].name, x.id);
    assert_eq!(f_item.func.params[0].ty, LowType::I32);

    // The call site passes the captured value then the argument.
    let s = printed(&prog);
    assert!(
        s.contains(&format!("(apply static {} x/0 1)", f_item.binder)),
        "call site not specialized: {s}"
    );
}

#[test]
fn scenario_mutually_recursive_well_known_pair() {
    let mut idg = IdGen::new();
    let top = global("top");
    let fn_ty = CoreType::arrow(vec![CoreType::Int], CoreType::Int);
    let f = Binder::new(idg.fresh("f"), fn_ty.clone());
    let g = Binder::new(idg.fresh("g"), fn_ty.clone());
    let xf = Binder::new(idg.fresh("x"), CoreType::Int);
    let xg = Binder::new(idg.fresh("x"), CoreType::Int);

    // f = fn(x) { if x == 0 { 0 } else { g(x - 1) } }; g = fn(x) { f(x - 1) }
    let sub1 = |v: &Binder| {
        Expr::new(
            Term::Prim {
                prim: Prim::Arith { op: ArithOp::Sub, ty: OperandTy::I32 },
                args: vec![Expr::var_of(v), Expr::int(1)],
            },
            CoreType::Int,
        )
    };
    let f_body = Expr::new(
        Term::If {
            cond: Box::new(Expr::new(
                Term::Prim {
                    prim: Prim::Compare {
                        op: crate::mcore::term::CompareOp::Eq,
                        ty: OperandTy::I32,
                    },
                    args: vec![Expr::var_of(&xf), Expr::int(0)],
                },
                CoreType::Bool,
            )),
            ifso: Box::new(Expr::int(0)),
            ifnot: Some(Box::new(Expr::apply(
                g.id,
                fn_ty.clone(),
                vec![sub1(&xf)],
                CoreType::Int,
            ))),
        },
        CoreType::Int,
    );
    let g_body = Expr::apply(f.id, fn_ty.clone(), vec![sub1(&xg)], CoreType::Int);

    let body = Expr::new(
        Term::Letrec {
            bindings: vec![
                (f.clone(), FnLit::new(vec![xf], CoreType::Int, f_body)),
                (g.clone(), FnLit::new(vec![xg], CoreType::Int, g_body)),
            ],
            body: Box::new(Expr::apply(
                f.id,
                fn_ty.clone(),
                vec![Expr::int(9)],
                CoreType::Int,
            )),
        },
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    // One shared late-init record.
    let late_inits: Vec<_> = prog
        .type_defs
        .iter()
        .filter(|(_, d)| matches!(d, TypeDef::LateInitStruct { .. }))
        .collect();
    assert_eq!(late_inits.len(), 1);
    let shared_tid = late_inits[0].0;

    // Both code items receive it lazily; the letrec binds both members to
    // well-known allocations over it.
    let env_tys: Vec<_> = prog.fns[..2]
        .iter()
        .map(|item| item.func.params[0].ty)
        .collect();
    assert_eq!(
        env_tys,
        vec![LowType::RefLazyInit(shared_tid), LowType::RefLazyInit(shared_tid)]
    );

    let top_item = &prog.fns[2];
    let Lambda::Letrec { names, fns, .. } = &top_item.func.body else {
        panic!("expected a letrec, got {:?}", top_item.func.body)
    };
    assert_eq!(names, &vec![f.id, g.id]);
    assert!(fns
        .iter()
        .all(|c| c.address == ClosureAddress::WellKnownMutRec && c.tid == shared_tid));
}

#[test]
fn scenario_result_return() {
    let top = global("top");
    let ret_ty = CoreType::Result {
        ok: Box::new(CoreType::Int),
        err: Box::new(CoreType::String),
    };
    // if true { return 1 } else { return-err "x" }; 2
    let body = Expr::seq(
        vec![Expr::new(
            Term::If {
                cond: Box::new(Expr::new(Term::Const(Constant::Bool(true)), CoreType::Bool)),
                ifso: Box::new(Expr::new(
                    Term::Return { value: Box::new(Expr::int(1)), kind: ReturnKind::Plain },
                    CoreType::Int,
                )),
                ifnot: Some(Box::new(Expr::new(
                    Term::Return {
                        value: Box::new(Expr::new(
                            Term::Const(Constant::String(intern("x"))),
                            CoreType::String,
                        )),
                        kind: ReturnKind::Error { return_ty: ret_ty.clone() },
                    },
                    CoreType::Int,
                ))),
            },
            CoreType::Unit,
        )],
        Expr::int(2),
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], ret_ty, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    let item = &prog.fns[0];
    // return join wraps Ok, raise join wraps Err, tail value routed.
    let Lambda::Joinlet { name: ret_join, value, body, .. } = &item.func.body else {
        panic!("missing return join: {:?}", item.func.body)
    };
    assert!(matches!(
        &**value,
        Lambda::Allocate { kind: AllocKind::Enum { tag }, .. } if tag.index == 0
    ));
    let Lambda::Joinlet { value: raise_value, body: inner, .. } = &**body else {
        panic!("missing raise join")
    };
    assert!(matches!(
        &**raise_value,
        Lambda::Allocate { kind: AllocKind::Enum { tag }, .. } if tag.index == 1
    ));
    let Lambda::Sequence { last, .. } = &**inner else {
        panic!("rewritten body should remain a sequence")
    };
    assert!(matches!(
        &**last,
        Lambda::Joinapply { name, args }
            if name == ret_join && args.len() == 1 && args[0] == Lambda::int(2)
    ));
}

#[test]
fn scenario_array_get_bounds_check() {
    let mut idg = IdGen::new();
    let top = global("top");
    let get = global("op_get");
    let arr = Binder::new(idg.fresh("arr"), CoreType::Array(Box::new(CoreType::Int)));
    let i = Binder::new(idg.fresh("i"), CoreType::Int);

    let mut env = TableEnv::new();
    env.declare_intrinsic(get, Intrinsic::ArrayGet);

    let get_ty = CoreType::arrow(
        vec![arr.ty.clone(), CoreType::Int],
        CoreType::Int,
    );
    let body = Expr::apply(
        get,
        get_ty,
        vec![Expr::var_of(&arr), Expr::var_of(&i)],
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![arr, i], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower_with(&program, &env);
    check_prog_invariants(&prog);

    let body = &prog.fns[0].func.body;
    let Lambda::Sequence { exprs, last } = body else {
        panic!("checked get should be a check then an access: {body:?}")
    };
    // The guard panics out of range.
    assert!(matches!(
        &exprs[0],
        Lambda::If { ifso, .. }
            if matches!(&**ifso, Lambda::Prim { prim: PrimFn::Panic, .. })
    ));
    assert!(matches!(
        &**last,
        Lambda::ArrayGetItem {
            kind: ArrayAccessKind::Unsafe,
            extra: GetItemExtra::NeedSignedInfo { signed: true },
            ..
        }
    ));
}

#[test]
fn unsafe_array_get_elides_the_check() {
    let mut idg = IdGen::new();
    let top = global("top");
    let get = global("unsafe_get");
    let arr = Binder::new(idg.fresh("arr"), CoreType::Array(Box::new(CoreType::Int)));
    let i = Binder::new(idg.fresh("i"), CoreType::Int);

    let mut env = TableEnv::new();
    env.declare_intrinsic(get, Intrinsic::ArrayUnsafeGet);

    let get_ty = CoreType::arrow(vec![arr.ty.clone(), CoreType::Int], CoreType::Int);
    let body = Expr::apply(
        get,
        get_ty,
        vec![Expr::var_of(&arr), Expr::var_of(&i)],
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![arr, i], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower_with(&program, &env);
    assert!(matches!(
        &prog.fns[0].func.body,
        Lambda::ArrayGetItem { kind: ArrayAccessKind::Unsafe, .. }
    ));
}

#[test]
fn escaping_local_closure_captures_in_order() {
    let mut idg = IdGen::new();
    let top = global("top");
    let use_fn = global("use");
    let a = Binder::new(idg.fresh("a"), CoreType::Int);
    let b = Binder::new(idg.fresh("b"), CoreType::Int);
    let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![], CoreType::Int));

    // f's body touches b then a; capture order must match first occurrence.
    let f_body = Expr::seq(
        vec![Expr::var_of(&b)],
        Expr::var_of(&a),
    );
    // Passing f to `use` makes it escape.
    let use_ty = CoreType::arrow(vec![f.ty.clone()], CoreType::Unit);
    let body = Expr::new(
        Term::Letfn {
            binder: f.clone(),
            func: Box::new(FnLit::new(vec![], CoreType::Int, f_body)),
            kind: crate::mcore::term::LetFnKind::Nonrec,
            body: Box::new(Expr::apply(
                use_fn,
                use_ty.clone(),
                vec![Expr::var_of(&f)],
                CoreType::Unit,
            )),
        },
        CoreType::Unit,
    );
    let program = Program {
        items: vec![
            TopItem::Fn {
                binder: use_fn,
                func: FnLit::new(
                    vec![Binder::new(idg.fresh("cb"), f.ty.clone())],
                    CoreType::Unit,
                    Expr::unit(),
                ),
                export: None,
                is_main: false,
            },
            TopItem::Fn {
                binder: top,
                func: FnLit::new(vec![a.clone(), b.clone()], CoreType::Unit, body),
                export: None,
                is_main: false,
            },
        ],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    // Find the allocation site inside `top`.
    let top_item = prog
        .fns
        .iter()
        .find(|it| crate::resolve(&it.binder.name) == "top")
        .unwrap();
    let Lambda::Let { value, .. } = &top_item.func.body else {
        panic!("letfn should lower to a let: {:?}", top_item.func.body)
    };
    let Lambda::Closure(alloc) = &**value else {
        panic!("escaping local must become a closure: {value:?}")
    };
    assert_eq!(alloc.captures, vec![b.id, a.id]);

    // The capture record layout matches the capture list.
    let (_, def) = prog
        .type_defs
        .iter()
        .find(|(tid, _)| *tid == alloc.tid)
        .unwrap();
    assert!(matches!(
        def,
        TypeDef::Closure { captures, .. } if captures.len() == 2
    ));

    // The code item unpacks the record in the same order.
    let code = prog
        .fns
        .iter()
        .find(|it| crate::resolve(&it.binder.name) == "f")
        .unwrap();
    let s = code.func.body.pretty_string(&PrettyOpts::default());
    assert!(s.contains("closure-field"), "code must unpack its env: {s}");
}

#[test]
fn iter_pipeline_rewrites_to_dynamic_drive() {
    let mut idg = IdGen::new();
    let top = global("top");
    let iter_iter = global("iter_iter");
    let it = Binder::new(idg.fresh("it"), CoreType::Iter(Box::new(CoreType::Int)));
    let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![CoreType::Int], CoreType::Unit));

    let mut env = TableEnv::new();
    env.declare_intrinsic(iter_iter, Intrinsic::IterIter);

    let apply_ty = CoreType::arrow(
        vec![it.ty.clone(), f.ty.clone()],
        CoreType::Unit,
    );
    let body = Expr::apply(
        iter_iter,
        apply_ty,
        vec![Expr::var_of(&it), Expr::var_of(&f)],
        CoreType::Unit,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![it.clone(), f.clone()], CoreType::Unit, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower_with(&program, &env);
    check_prog_invariants(&prog);

    // A sink closure item was synthesized, and the iterator is driven
    // dynamically with it.
    assert_eq!(prog.fns.len(), 2);
    let s = printed(&prog);
    assert!(s.contains("(apply dynamic it/0"), "drive missing: {s}");
    assert!(s.contains("closure"), "sink closure missing: {s}");
    // The sink continues with GO.
    let sink = prog
        .fns
        .iter()
        .find(|item| crate::resolve(&item.binder.name) == "anon")
        .expect("sink item");
    let sink_s = sink.func.body.pretty_string(&PrettyOpts::default());
    assert!(sink_s.contains("1"), "sink must yield GO: {sink_s}");
}

#[test]
fn switch_constr_binds_the_constructor_view() {
    let mut idg = IdGen::new();
    let top = global("top");
    let path = TypePath::new(intern("main"), intern("Shape"));
    let mut env = TableEnv::new();
    env.declare_type(
        path,
        TypeInfo::Enum {
            constrs: vec![
                ConstrInfo { name: intern("Dot"), args: vec![] },
                ConstrInfo { name: intern("Box"), args: vec![CoreType::Int] },
            ],
        },
    );

    let shape_ty = CoreType::Named { path, args: vec![] };
    let s = Binder::new(idg.fresh("s"), shape_ty.clone());
    let v = Binder::new(idg.fresh("v"), shape_ty.clone());
    let body = Expr::new(
        Term::SwitchConstr {
            obj: Box::new(Expr::var_of(&s)),
            cases: vec![
                ConstrCase {
                    tag: Tag { name: intern("Dot"), index: 0 },
                    binder: None,
                    body: Expr::int(0),
                },
                ConstrCase {
                    tag: Tag { name: intern("Box"), index: 1 },
                    binder: Some(v.clone()),
                    body: Expr::new(
                        Term::Field { obj: Box::new(Expr::var_of(&v)), index: 0 },
                        CoreType::Int,
                    ),
                },
            ],
            default: None,
        },
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![s.clone()], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower_with(&program, &env);
    check_prog_invariants(&prog);

    let Lambda::Switch { obj, cases, .. } = &prog.fns[0].func.body else {
        panic!("expected a switch: {:?}", prog.fns[0].func.body)
    };
    assert_eq!(*obj, s.id);
    // The binding case casts the scrutinee to the constructor type and
    // reads the payload through the enum kind.
    let (_, box_case) = &cases[1];
    let Lambda::Let { name, value, body } = box_case else {
        panic!("case binder must be bound: {box_case:?}")
    };
    assert_eq!(*name, v.id);
    assert!(matches!(&**value, Lambda::Cast { .. }));
    assert!(matches!(
        &**body,
        Lambda::GetField { kind: crate::clam::term::FieldKind::Enum, index: 0, .. }
    ));
}

#[test]
fn lowering_is_deterministic() {
    let mut idg = IdGen::new();
    let top = global("top");
    let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![], CoreType::Int));
    let body = Expr::new(
        Term::Letfn {
            binder: f.clone(),
            func: Box::new(FnLit::new(vec![], CoreType::Int, Expr::int(7))),
            kind: crate::mcore::term::LetFnKind::Nonrec,
            body: Box::new(Expr::apply(f.id, f.ty.clone(), vec![], CoreType::Int)),
        },
        CoreType::Int,
    );
    let program = Program {
        items: vec![
            TopItem::Fn {
                binder: top,
                func: FnLit::new(vec![], CoreType::Int, body),
                export: Some(intern("top")),
                is_main: false,
            },
            TopItem::Expr { expr: Expr::unit() },
        ],
        object_impls: vec![],
    };
    let a = lower(&program);
    let b = lower(&program);
    assert_eq!(a, b);
    assert_eq!(printed(&a), printed(&b));
}

#[test]
fn exported_functions_keep_their_export_name() {
    let top = global("entry");
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], CoreType::Int, Expr::int(1)),
            export: Some(intern("entry_point")),
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    assert!(matches!(
        prog.fns[0].kind,
        FnItemKind::TopPub { export_name } if crate::resolve(&export_name) == "entry_point"
    ));
}

#[test]
fn main_is_split_out() {
    let m = global("main");
    let program = Program {
        items: vec![TopItem::Fn {
            binder: m,
            func: FnLit::new(vec![], CoreType::Unit, Expr::unit()),
            export: None,
            is_main: true,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    assert!(prog.fns.is_empty());
    assert!(prog.main.is_some());
}

#[test]
fn well_known_functions_never_escape() {
    // EscapeSet monotonicity, checked on the lowered output: no well-known
    // address ever appears inside a closure allocation.
    let mut idg = IdGen::new();
    let top = global("top");
    let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![], CoreType::Int));
    let body = Expr::new(
        Term::Letfn {
            binder: f.clone(),
            func: Box::new(FnLit::new(vec![], CoreType::Int, Expr::int(3))),
            kind: crate::mcore::term::LetFnKind::Nonrec,
            body: Box::new(Expr::apply(f.id, f.ty.clone(), vec![], CoreType::Int)),
        },
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);
    let s = printed(&prog);
    assert!(!s.contains("(closure "), "no closure should exist: {s}");
    // The binder's placeholder value is unit.
    assert!(matches!(
        &prog.fns[1].func.body,
        Lambda::Let { value, .. } if **value == Lambda::unit()
    ));
}

#[test]
fn stub_calls_and_stub_values() {
    let mut idg = IdGen::new();
    let top = global("top");
    let put = global("put");
    let h = Binder::new(idg.fresh("h"), CoreType::arrow(vec![CoreType::Int], CoreType::Unit));

    let put_ty = CoreType::arrow(vec![CoreType::Int], CoreType::Unit);
    let body = Expr::seq(
        vec![Expr::apply(put, put_ty.clone(), vec![Expr::int(42)], CoreType::Unit)],
        Expr::let_(h.clone(), Expr::var(put, put_ty), Expr::unit()),
    );
    let program = Program {
        items: vec![
            TopItem::Stub {
                binder: put,
                foreign_name: intern("host_put"),
                params_ty: vec![LowType::I32],
                return_ty: None,
            },
            TopItem::Fn {
                binder: top,
                func: FnLit::new(vec![], CoreType::Unit, body),
                export: None,
                is_main: false,
            },
        ],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    let s = printed(&prog);
    // Direct calls go straight to the foreign surface.
    assert!(s.contains("(stub-call \"host_put\" 42)"), "{s}");
    // The value use goes through an early-out wrapper.
    let wrapper = prog
        .fns
        .iter()
        .find(|item| crate::resolve(&item.binder.name) == "host_put.clo")
        .expect("stub wrapper item");
    assert!(matches!(
        &wrapper.func.body,
        Lambda::Return(inner) if matches!(&**inner, Lambda::StubCall { .. })
    ));
}

#[test]
fn handle_error_to_result_catches_into_the_sum() {
    let top = global("top");
    let risky = global("risky");
    let risky_ty = CoreType::Arrow {
        params: vec![],
        ret: Box::new(CoreType::Int),
        err: Some(Box::new(CoreType::String)),
    };
    let result_ty = CoreType::Result {
        ok: Box::new(CoreType::Int),
        err: Box::new(CoreType::String),
    };
    let body = Expr::new(
        Term::HandleError {
            obj: Box::new(Expr::new(
                Term::Apply {
                    func: risky,
                    kind: ApplyKind::Normal { func_ty: risky_ty.clone() },
                    args: vec![],
                },
                CoreType::Int,
            )),
            kind: crate::mcore::term::HandleKind::ToResult,
        },
        result_ty.clone(),
    );
    let program = Program {
        items: vec![
            TopItem::Fn {
                binder: risky,
                func: FnLit::new(vec![], result_ty.clone(), Expr::int(1)),
                export: None,
                is_main: false,
            },
            TopItem::Fn {
                binder: top,
                func: FnLit::new(vec![], result_ty, body),
                export: None,
                is_main: false,
            },
        ],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    let top_item = prog
        .fns
        .iter()
        .find(|it| crate::resolve(&it.binder.name) == "top")
        .unwrap();
    let Lambda::Catch { body, on_exception, .. } = &top_item.func.body else {
        panic!("to-result must catch: {:?}", top_item.func.body)
    };
    assert!(matches!(
        &**body,
        Lambda::Allocate { kind: AllocKind::Enum { tag }, .. } if tag.index == 0
    ));
    assert!(matches!(
        &**on_exception,
        Lambda::Allocate { kind: AllocKind::Enum { tag }, fields, .. }
            if tag.index == 1
                && matches!(&fields[0], Lambda::Prim { prim: PrimFn::CaughtError, .. })
    ));
}

#[test]
fn loops_lower_with_labels_intact() {
    let mut idg = IdGen::new();
    let top = global("top");
    let i = Binder::new(idg.fresh("i"), CoreType::Int);
    let label = idg.fresh_label("l");

    // loop l (i = 0) { if i < 10 { continue l (i + 1) } else { break l i } }
    let body = Expr::new(
        Term::Loop {
            params: vec![i.clone()],
            args: vec![Expr::int(0)],
            body: Box::new(Expr::new(
                Term::If {
                    cond: Box::new(Expr::new(
                        Term::Prim {
                            prim: Prim::Compare {
                                op: crate::mcore::term::CompareOp::Lt,
                                ty: OperandTy::I32,
                            },
                            args: vec![Expr::var_of(&i), Expr::int(10)],
                        },
                        CoreType::Bool,
                    )),
                    ifso: Box::new(Expr::new(
                        Term::Continue {
                            args: vec![Expr::new(
                                Term::Prim {
                                    prim: Prim::Arith { op: ArithOp::Add, ty: OperandTy::I32 },
                                    args: vec![Expr::var_of(&i), Expr::int(1)],
                                },
                                CoreType::Int,
                            )],
                            label,
                        },
                        CoreType::Int,
                    )),
                    ifnot: Some(Box::new(Expr::new(
                        Term::Break { arg: Some(Box::new(Expr::var_of(&i))), label },
                        CoreType::Int,
                    ))),
                },
                CoreType::Int,
            )),
            label,
        },
        CoreType::Int,
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![], CoreType::Int, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower(&program);
    check_prog_invariants(&prog);

    let Lambda::Loop { label: out_label, args, ty, .. } = &prog.fns[0].func.body else {
        panic!("expected a loop")
    };
    assert_eq!(*out_label, label);
    assert_eq!(args, &vec![Lambda::int(0)]);
    assert_eq!(*ty, LowType::I32);
    let s = printed(&prog);
    assert!(s.contains(&format!("continue {label}")), "{s}");
    assert!(s.contains(&format!("break {label}")), "{s}");
}

#[test]
fn record_update_copies_unchanged_fields() {
    let mut idg = IdGen::new();
    let top = global("top");
    let path = TypePath::new(intern("main"), intern("Point"));
    let mut env = TableEnv::new();
    env.declare_type(
        path,
        TypeInfo::Record {
            fields: vec![
                crate::global_env::FieldInfo {
                    name: intern("x"),
                    ty: CoreType::Int,
                    mutable: false,
                },
                crate::global_env::FieldInfo {
                    name: intern("y"),
                    ty: CoreType::Int,
                    mutable: false,
                },
            ],
        },
    );
    let pt_ty = CoreType::Named { path, args: vec![] };
    let p = Binder::new(idg.fresh("p"), pt_ty.clone());
    let body = Expr::new(
        Term::RecordUpdate {
            base: Box::new(Expr::var_of(&p)),
            updates: vec![(1, Expr::int(5))],
        },
        pt_ty.clone(),
    );
    let program = Program {
        items: vec![TopItem::Fn {
            binder: top,
            func: FnLit::new(vec![p.clone()], pt_ty, body),
            export: None,
            is_main: false,
        }],
        object_impls: vec![],
    };
    let prog = lower_with(&program, &env);
    let Lambda::Allocate { kind: AllocKind::Struct, fields, .. } = &prog.fns[0].func.body
    else {
        panic!("update must reallocate: {:?}", prog.fns[0].func.body)
    };
    assert_eq!(fields.len(), 2);
    assert!(matches!(&fields[0], Lambda::GetField { index: 0, .. }));
    assert_eq!(fields[1], Lambda::int(5));
}

#[test]
fn object_impls_get_method_wrappers_and_dispatch() {
    let mut idg = IdGen::new();
    let show = global("show_impl");
    let top = global("top");
    let iface = TypePath::new(intern("main"), intern("Show"));
    let show_name = intern("show");

    let self_ty = CoreType::Int;
    let method_ty = CoreType::arrow(vec![CoreType::Named { path: iface, args: vec![] }], CoreType::Int);
    let mut env = TableEnv::new();
    env.declare_type(
        iface,
        TypeInfo::Object { methods: vec![(show_name, method_ty.clone())] },
    );
    env.declare_method(
        iface,
        show_name,
        crate::global_env::MethodInfo {
            id: Ident::Method { type_name: iface.name, name: show_name },
            index: 0,
            ty: method_ty.clone(),
        },
    );

    let obj_ty = CoreType::Named { path: iface, args: vec![] };
    let o = Binder::new(idg.fresh("o"), obj_ty.clone());
    // top(n) { let o = n as Show in o.show() }
    let n = Binder::new(idg.fresh("n"), CoreType::Int);
    let body = Expr::let_(
        o.clone(),
        Expr::new(
            Term::MakeObject { obj_path: iface, value: Box::new(Expr::var_of(&n)) },
            obj_ty.clone(),
        ),
        Expr::new(
            Term::Apply {
                func: Ident::Method { type_name: iface.name, name: show_name },
                kind: ApplyKind::Normal { func_ty: method_ty },
                args: vec![Expr::var_of(&o)],
            },
            CoreType::Int,
        ),
    );
    let program = Program {
        items: vec![
            TopItem::Fn {
                binder: show,
                func: FnLit::new(
                    vec![Binder::new(idg.fresh("self"), self_ty.clone())],
                    CoreType::Int,
                    Expr::int(0),
                ),
                export: None,
                is_main: false,
            },
            TopItem::Fn {
                binder: top,
                func: FnLit::new(vec![n], CoreType::Int, body),
                export: None,
                is_main: false,
            },
        ],
        object_impls: vec![crate::mcore::term::ObjectImpl {
            abstract_path: iface,
            self_ty,
            methods: vec![show],
        }],
    };
    let prog = lower_with(&program, &env);
    check_prog_invariants(&prog);

    // A wrapper item with the concrete witness tid exists.
    let wrapper = prog
        .fns
        .iter()
        .find(|item| item.tid.is_some())
        .expect("method wrapper");
    assert!(matches!(
        &wrapper.func.body,
        Lambda::Let { value, .. } if matches!(&**value, Lambda::Cast { .. })
    ));

    // The allocation carries the method table; the call dispatches by slot.
    let s = printed(&prog);
    assert!(s.contains("allocate object"), "{s}");
    assert!(s.contains("(apply object o/0 #0"), "{s}");
}
