//! Free-variable computation.
//!
//! Drives capture-list construction in closure lowering and the reference
//! graph of the SCC grouper. The returned map is insertion-ordered on first
//! occurrence, so capture records lay out deterministically.

use hashlink::LinkedHashMap;
use im::HashSet;

use crate::{
    ident::Ident,
    mcore::term::{ApplyKind, Expr, FnLit, LetFnKind, Term},
    types::CoreType,
};

pub type FreeVarMap = LinkedHashMap<Ident, CoreType>;

/// Free identifiers of a function literal under an extra exclusion set.
/// Parameters are always excluded; global identifiers and join callees never
/// count as free.
pub fn free_vars(f: &FnLit, exclude: &HashSet<Ident>) -> FreeVarMap {
    let mut bound = exclude.clone();
    for p in &f.params {
        bound.insert(p.id);
    }
    let mut out = FreeVarMap::new();
    go(&f.body, &bound, &mut out);
    out
}

/// Free identifiers of a bare expression.
pub fn free_vars_expr(e: &Expr, exclude: &HashSet<Ident>) -> FreeVarMap {
    let mut out = FreeVarMap::new();
    go(e, exclude, &mut out);
    out
}

fn add(out: &mut FreeVarMap, id: Ident, ty: CoreType) {
    if !out.contains_key(&id) {
        out.insert(id, ty);
    }
}

fn use_of(id: &Ident, ty: &CoreType, bound: &HashSet<Ident>, out: &mut FreeVarMap) {
    if id.is_global() || bound.contains(id) {
        return;
    }
    add(out, *id, ty.clone());
}

fn go_fn(f: &FnLit, bound: &HashSet<Ident>, out: &mut FreeVarMap) {
    let mut inner = bound.clone();
    for p in &f.params {
        inner.insert(p.id);
    }
    go(&f.body, &inner, out);
}

fn go(e: &Expr, bound: &HashSet<Ident>, out: &mut FreeVarMap) {
    match &e.term {
        Term::Const(_) => {}
        Term::Var(id) => use_of(id, &e.ty, bound, out),

        Term::Prim { args, .. } => args.iter().for_each(|a| go(a, bound, out)),

        Term::And(a, b) | Term::Or(a, b) => {
            go(a, bound, out);
            go(b, bound, out);
        }

        Term::Let { binder, value, body } => {
            go(value, bound, out);
            let inner = bound.update(binder.id);
            go(body, &inner, out);
        }

        Term::Letfn { binder, func, kind, body } => {
            let fn_bound = match kind {
                // The binder is in scope inside a recursive body.
                LetFnKind::Rec => bound.update(binder.id),
                LetFnKind::Nonrec | LetFnKind::TailJoin | LetFnKind::NontailJoin => bound.clone(),
            };
            go_fn(func, &fn_bound, out);
            let inner = bound.update(binder.id);
            go(body, &inner, out);
        }

        Term::Letrec { bindings, body } => {
            let mut inner = bound.clone();
            for (b, _) in bindings {
                inner.insert(b.id);
            }
            for (_, f) in bindings {
                go_fn(f, &inner, out);
            }
            go(body, &inner, out);
        }

        Term::Function { func, .. } => go_fn(func, bound, out),

        Term::Apply { func, kind, args } => {
            match kind {
                // Joins are second-class; their name is not a value use.
                ApplyKind::Join => {}
                ApplyKind::Normal { func_ty } => use_of(func, func_ty, bound, out),
                ApplyKind::Async => {
                    // No carried type: reconstruct the arrow from the call
                    // shape itself.
                    let func_ty = CoreType::Arrow {
                        params: args.iter().map(|a| a.ty.clone()).collect(),
                        ret: Box::new(e.ty.clone()),
                        err: None,
                    };
                    use_of(func, &func_ty, bound, out);
                }
            }
            args.iter().for_each(|a| go(a, bound, out));
        }

        Term::Tuple(xs) | Term::Array(xs) => xs.iter().for_each(|x| go(x, bound, out)),

        Term::Record { fields, .. } => fields.iter().for_each(|x| go(x, bound, out)),

        Term::RecordUpdate { base, updates } => {
            go(base, bound, out);
            updates.iter().for_each(|(_, x)| go(x, bound, out));
        }

        Term::Field { obj, .. } => go(obj, bound, out),

        Term::Mutate { obj, value, .. } => {
            go(obj, bound, out);
            go(value, bound, out);
        }

        Term::Constructor { args, .. } => args.iter().for_each(|a| go(a, bound, out)),

        Term::Assign { var, value } => {
            // Writing a variable still requires access to it.
            use_of(var, &value.ty, bound, out);
            go(value, bound, out);
        }

        Term::Sequence { exprs, last } => {
            exprs.iter().for_each(|x| go(x, bound, out));
            go(last, bound, out);
        }

        Term::If { cond, ifso, ifnot } => {
            go(cond, bound, out);
            go(ifso, bound, out);
            if let Some(e) = ifnot {
                go(e, bound, out);
            }
        }

        Term::SwitchConstr { obj, cases, default } => {
            go(obj, bound, out);
            for case in cases {
                match &case.binder {
                    Some(b) => {
                        let inner = bound.update(b.id);
                        go(&case.body, &inner, out);
                    }
                    None => go(&case.body, bound, out),
                }
            }
            if let Some(d) = default {
                go(d, bound, out);
            }
        }

        Term::SwitchConstant { obj, cases, default } => {
            go(obj, bound, out);
            cases.iter().for_each(|(_, x)| go(x, bound, out));
            go(default, bound, out);
        }

        Term::Loop { params, args, body, .. } => {
            args.iter().for_each(|a| go(a, bound, out));
            let mut inner = bound.clone();
            for p in params {
                inner.insert(p.id);
            }
            go(body, &inner, out);
        }

        Term::Break { arg, .. } => {
            if let Some(a) = arg {
                go(a, bound, out);
            }
        }

        Term::Continue { args, .. } => args.iter().for_each(|a| go(a, bound, out)),

        Term::Return { value, .. } => go(value, bound, out),

        Term::HandleError { obj, .. } => go(obj, bound, out),

        Term::MakeObject { value, .. } => go(value, bound, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ident::IdGen,
        intern,
        mcore::term::{ApplyKind, Binder, ConstrCase, Tag},
    };

    fn fnlit(params: Vec<Binder>, body: Expr) -> FnLit {
        FnLit::new(params, body.ty.clone(), body)
    }

    #[test]
    fn params_and_lets_are_bound() {
        let mut idg = IdGen::new();
        let x = Binder::new(idg.fresh("x"), CoreType::Int);
        let y = Binder::new(idg.fresh("y"), CoreType::Int);
        let free = idg.fresh("free");

        // fn(x) { let y = x in free + y }
        let body = Expr::let_(
            y.clone(),
            Expr::var_of(&x),
            Expr::new(
                Term::Tuple(vec![Expr::var(free, CoreType::Int), Expr::var_of(&y)]),
                CoreType::Tuple(vec![CoreType::Int, CoreType::Int]),
            ),
        );
        let fvs = free_vars(&fnlit(vec![x], body), &HashSet::new());
        assert_eq!(fvs.len(), 1);
        assert_eq!(fvs.get(&free), Some(&CoreType::Int));
    }

    #[test]
    fn join_callee_is_not_free_but_normal_callee_is() {
        let mut idg = IdGen::new();
        let j = idg.fresh("j");
        let g = idg.fresh("g");
        let g_ty = CoreType::arrow(vec![CoreType::Int], CoreType::Int);

        let body = Expr::seq(
            vec![Expr::new(
                Term::Apply {
                    func: j,
                    kind: ApplyKind::Join,
                    args: vec![Expr::int(1)],
                },
                CoreType::Int,
            )],
            Expr::apply(g, g_ty.clone(), vec![Expr::int(2)], CoreType::Int),
        );
        let fvs = free_vars(&fnlit(vec![], body), &HashSet::new());
        assert!(!fvs.contains_key(&j));
        assert_eq!(fvs.get(&g), Some(&g_ty));
    }

    #[test]
    fn globals_are_ignored() {
        let q = Ident::Qualified {
            pkg: intern("list"),
            name: intern("map"),
        };
        let body = Expr::var(q, CoreType::Int);
        let fvs = free_vars(&fnlit(vec![], body), &HashSet::new());
        assert!(fvs.is_empty());
    }

    #[test]
    fn letrec_binders_are_scoped_out() {
        let mut idg = IdGen::new();
        let f = Binder::new(idg.fresh("f"), CoreType::arrow(vec![], CoreType::Int));
        let g = Binder::new(idg.fresh("g"), CoreType::arrow(vec![], CoreType::Int));
        let outer = idg.fresh("outer");

        // letrec f = fn() { g() }; g = fn() { outer } in f()
        let f_fn = fnlit(
            vec![],
            Expr::apply(g.id, g.ty.clone(), vec![], CoreType::Int),
        );
        let g_fn = fnlit(vec![], Expr::var(outer, CoreType::Int));
        let body = Expr::new(
            Term::Letrec {
                bindings: vec![(f.clone(), f_fn), (g.clone(), g_fn)],
                body: Box::new(Expr::apply(f.id, f.ty.clone(), vec![], CoreType::Int)),
            },
            CoreType::Int,
        );
        let fvs = free_vars_expr(&body, &HashSet::new());
        assert_eq!(fvs.keys().collect::<Vec<_>>(), vec![&outer]);
    }

    #[test]
    fn case_binder_scopes_to_its_case_only() {
        let mut idg = IdGen::new();
        let scrut = idg.fresh("scrut");
        let v = Binder::new(idg.fresh("v"), CoreType::Int);
        let enum_ty = CoreType::Named {
            path: crate::types::TypePath::new(intern("pkg"), intern("E")),
            args: vec![],
        };

        let sw = Expr::new(
            Term::SwitchConstr {
                obj: Box::new(Expr::var(scrut, enum_ty)),
                cases: vec![ConstrCase {
                    tag: Tag { name: intern("Some"), index: 0 },
                    binder: Some(v.clone()),
                    body: Expr::var_of(&v),
                }],
                default: Some(Box::new(Expr::var_of(&v))),
            },
            CoreType::Int,
        );
        let fvs = free_vars_expr(&sw, &HashSet::new());
        // The binder leaks into the default only as a genuine free use.
        assert!(fvs.contains_key(&scrut));
        assert!(fvs.contains_key(&v.id));
    }

    #[test]
    fn loop_params_are_bound_in_body_not_args() {
        let mut idg = IdGen::new();
        let i = Binder::new(idg.fresh("i"), CoreType::Int);
        let seed = idg.fresh("seed");
        let label = idg.fresh_label("l");

        let lp = Expr::new(
            Term::Loop {
                params: vec![i.clone()],
                args: vec![Expr::var(seed, CoreType::Int)],
                body: Box::new(Expr::var_of(&i)),
                label,
            },
            CoreType::Int,
        );
        let fvs = free_vars_expr(&lp, &HashSet::new());
        assert_eq!(fvs.keys().collect::<Vec<_>>(), vec![&seed]);
    }

    #[test]
    fn capture_order_is_first_occurrence() {
        let mut idg = IdGen::new();
        let a = idg.fresh("a");
        let b = idg.fresh("b");
        let body = Expr::seq(
            vec![
                Expr::var(b, CoreType::Int),
                Expr::var(a, CoreType::Int),
                Expr::var(b, CoreType::Int),
            ],
            Expr::unit(),
        );
        let fvs = free_vars(&fnlit(vec![], body), &HashSet::new());
        assert_eq!(fvs.keys().copied().collect::<Vec<_>>(), vec![b, a]);
    }
}
