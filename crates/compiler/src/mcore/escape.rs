//! The escape pre-pass.
//!
//! Collects every identifier that appears as a first-class value, i.e. any
//! variable reference outside the call-target position. A function whose
//! identifier lands in this set must be lowered as a closure; everything
//! else stays well-known and keeps a bare calling convention.

use hashlink::LinkedHashSet;

use crate::{
    ident::Ident,
    mcore::term::{Expr, FnLit, Program, Term, TopItem},
};

#[derive(Debug, Default)]
pub struct EscapeSet {
    set: LinkedHashSet<Ident>,
}

impl EscapeSet {
    pub fn collect(program: &Program) -> EscapeSet {
        let mut esc = EscapeSet::default();
        for item in &program.items {
            match item {
                TopItem::Let { expr, .. } | TopItem::Expr { expr } => esc.walk(expr),
                TopItem::Fn { func, .. } => esc.walk_fn(func),
                TopItem::Stub { .. } => {}
            }
        }
        esc
    }

    pub fn contains(&self, id: &Ident) -> bool {
        self.set.contains(id)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    fn walk_fn(&mut self, f: &FnLit) {
        self.walk(&f.body);
    }

    fn walk(&mut self, e: &Expr) {
        match &e.term {
            Term::Const(_) => {}
            Term::Var(id) => {
                self.set.insert(*id);
            }

            Term::Prim { args, .. }
            | Term::Tuple(args)
            | Term::Array(args)
            | Term::Constructor { args, .. } => args.iter().for_each(|a| self.walk(a)),

            Term::And(a, b) | Term::Or(a, b) => {
                self.walk(a);
                self.walk(b);
            }

            Term::Let { value, body, .. } => {
                self.walk(value);
                self.walk(body);
            }

            Term::Letfn { func, body, .. } => {
                self.walk_fn(func);
                self.walk(body);
            }

            Term::Letrec { bindings, body } => {
                bindings.iter().for_each(|(_, f)| self.walk_fn(f));
                self.walk(body);
            }

            Term::Function { func, .. } => self.walk_fn(func),

            Term::Apply { args, .. } => {
                // The callee position is precisely what does not escape.
                args.iter().for_each(|a| self.walk(a));
            }

            Term::Record { fields, .. } => fields.iter().for_each(|x| self.walk(x)),

            Term::RecordUpdate { base, updates } => {
                self.walk(base);
                updates.iter().for_each(|(_, x)| self.walk(x));
            }

            Term::Field { obj, .. } => self.walk(obj),

            Term::Mutate { obj, value, .. } => {
                self.walk(obj);
                self.walk(value);
            }

            Term::Assign { value, .. } => self.walk(value),

            Term::Sequence { exprs, last } => {
                exprs.iter().for_each(|x| self.walk(x));
                self.walk(last);
            }

            Term::If { cond, ifso, ifnot } => {
                self.walk(cond);
                self.walk(ifso);
                if let Some(e) = ifnot {
                    self.walk(e);
                }
            }

            Term::SwitchConstr { obj, cases, default } => {
                self.walk(obj);
                cases.iter().for_each(|c| self.walk(&c.body));
                if let Some(d) = default {
                    self.walk(d);
                }
            }

            Term::SwitchConstant { obj, cases, default } => {
                self.walk(obj);
                cases.iter().for_each(|(_, x)| self.walk(x));
                self.walk(default);
            }

            Term::Loop { args, body, .. } => {
                args.iter().for_each(|a| self.walk(a));
                self.walk(body);
            }

            Term::Break { arg, .. } => {
                if let Some(a) = arg {
                    self.walk(a);
                }
            }

            Term::Continue { args, .. } => args.iter().for_each(|a| self.walk(a)),

            Term::Return { value, .. } => self.walk(value),

            Term::HandleError { obj, .. } => self.walk(obj),

            Term::MakeObject { value, .. } => self.walk(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ident::IdGen, mcore::term::Binder, types::CoreType};

    #[test]
    fn call_targets_do_not_escape_value_uses_do() {
        let mut idg = IdGen::new();
        let f = idg.fresh("f");
        let g = idg.fresh("g");
        let fn_ty = CoreType::arrow(vec![], CoreType::Int);

        // f(); let h = g
        let program = Program {
            items: vec![TopItem::Expr {
                expr: Expr::seq(
                    vec![Expr::apply(f, fn_ty.clone(), vec![], CoreType::Int)],
                    Expr::let_(
                        Binder::new(idg.fresh("h"), fn_ty.clone()),
                        Expr::var(g, fn_ty),
                        Expr::unit(),
                    ),
                ),
            }],
            object_impls: vec![],
        };

        let esc = EscapeSet::collect(&program);
        assert!(!esc.contains(&f));
        assert!(esc.contains(&g));
    }

    #[test]
    fn arguments_escape() {
        let mut idg = IdGen::new();
        let f = idg.fresh("f");
        let g = idg.fresh("g");
        let g_ty = CoreType::arrow(vec![CoreType::Int], CoreType::Int);
        let f_ty = CoreType::arrow(vec![g_ty.clone()], CoreType::Int);

        // f(g): g flows as an argument, so it escapes.
        let program = Program {
            items: vec![TopItem::Expr {
                expr: Expr::apply(f, f_ty, vec![Expr::var(g, g_ty)], CoreType::Int),
            }],
            object_impls: vec![],
        };

        let esc = EscapeSet::collect(&program);
        assert!(!esc.contains(&f));
        assert!(esc.contains(&g));
    }
}
