//! The translation context: every table and accumulator of one
//! `transl_prog` run. Created at entry, dropped at exit; nothing is
//! process-global, so runs are independent and reproducible.

use std::collections::HashMap;

use hashlink::LinkedHashMap;
use lasso::Spur;
use once_cell::unsync::OnceCell;

use crate::{
    clam::{
        ltype::{Addr, LowType, Tid},
        term::TopFuncItem,
    },
    config::Config,
    global_env::GlobalEnv,
    ident::{Ident, IdGen},
    lower::{
        addr::{AddrGen, AddrTable, WrapperInfo},
        returns::ReturnCtx,
        types::TypeLowering,
    },
    mcore::{
        escape::EscapeSet,
        term::{Binder, Constant, Expr, FnLit, Program, Term, TopItem},
    },
    source::Span,
    types::{CoreType, TypePath},
};

use crate::clam::term::Lambda;

/// A foreign-call surface.
#[derive(Debug)]
pub struct StubInfo {
    pub foreign_name: Spur,
    pub params_ty: Vec<LowType>,
    pub return_ty: Option<LowType>,
    /// Set on first value use; forces a closure wrapper around the stub.
    pub wrapper: OnceCell<WrapperInfo>,
}

/// Where the per-function translation currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    InitialTop,
    InLocalBody,
    InClosureBody,
    InMutRecBundle,
}

#[derive(Debug)]
pub struct Frame {
    pub state: FrameState,
    pub ret: Option<ReturnCtx>,
}

pub struct Ctx<'a> {
    pub env: &'a dyn GlobalEnv,
    pub config: &'a Config,
    pub types: TypeLowering,
    pub addrs: AddrTable,
    pub escape: EscapeSet,
    pub idgen: IdGen,
    pub addrgen: AddrGen,
    /// Top-level function items, in emission order.
    pub top_items: Vec<TopFuncItem>,
    /// `Llet` prefixes onto the init body, in order.
    pub binds_init: Vec<(Ident, Lambda)>,
    pub globals: Vec<(Ident, Option<Constant>)>,
    pub stubs: LinkedHashMap<Ident, StubInfo>,
    /// Wrapper addresses per (interface, self type), in slot order.
    pub object_wrappers: LinkedHashMap<(TypePath, CoreType), Vec<Addr>>,
    /// Case binders currently bound to a constructor view.
    pub constr_binders: HashMap<Ident, Tid>,
    /// Enclosing location of the item being lowered.
    pub base: Span,
    pub frames: Vec<Frame>,
}

impl<'a> Ctx<'a> {
    pub fn new(program: &Program, env: &'a dyn GlobalEnv, config: &'a Config) -> Self {
        let escape = EscapeSet::collect(program);
        let idgen = IdGen::starting_from(max_stamp(program) + 1);
        Ctx {
            env,
            config,
            types: TypeLowering::new(config.use_js_builtin_string),
            addrs: AddrTable::new(),
            escape,
            idgen,
            addrgen: AddrGen::new(),
            top_items: Vec::new(),
            binds_init: Vec::new(),
            globals: Vec::new(),
            stubs: LinkedHashMap::new(),
            object_wrappers: LinkedHashMap::new(),
            constr_binders: HashMap::new(),
            base: Span::default(),
            frames: Vec::new(),
        }
    }

    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("inside a function frame")
    }

    pub fn return_ctx(&self) -> &ReturnCtx {
        self.frame()
            .ret
            .as_ref()
            .expect("return outside a function that can return")
    }

    pub fn lower_ty(&mut self, ty: &CoreType) -> LowType {
        self.types.lower_ty(self.env, ty)
    }

    pub fn lower_binder(&mut self, b: &Binder) -> crate::clam::term::LParam {
        let ty = self.lower_ty(&b.ty);
        crate::clam::term::LParam { name: b.id, ty }
    }

    /// Wrap with the enclosing location when debug events are on.
    pub fn event(&self, body: Lambda) -> Lambda {
        if self.config.debug {
            Lambda::Event { expr: Box::new(body), loc: self.base }
        } else {
            body
        }
    }
}

/// Highest identifier/label stamp appearing in the input; fresh minting
/// starts above it.
fn max_stamp(program: &Program) -> u32 {
    fn ident(i: &Ident, max: &mut u32) {
        if let Ident::Local { stamp, .. } | Ident::Mutable { stamp, .. } = i {
            *max = (*max).max(*stamp);
        }
    }

    fn fnlit(f: &FnLit, max: &mut u32) {
        for p in &f.params {
            ident(&p.id, max);
        }
        expr(&f.body, max);
    }

    fn expr(e: &Expr, max: &mut u32) {
        match &e.term {
            Term::Const(_) => {}
            Term::Var(id) => ident(id, max),
            Term::Prim { args, .. }
            | Term::Tuple(args)
            | Term::Array(args)
            | Term::Constructor { args, .. } => args.iter().for_each(|a| expr(a, max)),
            Term::And(a, b) | Term::Or(a, b) => {
                expr(a, max);
                expr(b, max);
            }
            Term::Let { binder, value, body } => {
                ident(&binder.id, max);
                expr(value, max);
                expr(body, max);
            }
            Term::Letfn { binder, func, body, .. } => {
                ident(&binder.id, max);
                fnlit(func, max);
                expr(body, max);
            }
            Term::Letrec { bindings, body } => {
                for (b, f) in bindings {
                    ident(&b.id, max);
                    fnlit(f, max);
                }
                expr(body, max);
            }
            Term::Function { func, .. } => fnlit(func, max),
            Term::Apply { func, args, .. } => {
                ident(func, max);
                args.iter().for_each(|a| expr(a, max));
            }
            Term::Record { fields, .. } => fields.iter().for_each(|x| expr(x, max)),
            Term::RecordUpdate { base, updates } => {
                expr(base, max);
                updates.iter().for_each(|(_, x)| expr(x, max));
            }
            Term::Field { obj, .. } => expr(obj, max),
            Term::Mutate { obj, value, .. } => {
                expr(obj, max);
                expr(value, max);
            }
            Term::Assign { var, value } => {
                ident(var, max);
                expr(value, max);
            }
            Term::Sequence { exprs, last } => {
                exprs.iter().for_each(|x| expr(x, max));
                expr(last, max);
            }
            Term::If { cond, ifso, ifnot } => {
                expr(cond, max);
                expr(ifso, max);
                if let Some(e) = ifnot {
                    expr(e, max);
                }
            }
            Term::SwitchConstr { obj, cases, default } => {
                expr(obj, max);
                for c in cases {
                    if let Some(b) = &c.binder {
                        ident(&b.id, max);
                    }
                    expr(&c.body, max);
                }
                if let Some(d) = default {
                    expr(d, max);
                }
            }
            Term::SwitchConstant { obj, cases, default } => {
                expr(obj, max);
                cases.iter().for_each(|(_, x)| expr(x, max));
                expr(default, max);
            }
            Term::Loop { params, args, body, label } => {
                for p in params {
                    ident(&p.id, max);
                }
                *max = (*max).max(label.stamp);
                args.iter().for_each(|a| expr(a, max));
                expr(body, max);
            }
            Term::Break { arg, label } => {
                *max = (*max).max(label.stamp);
                if let Some(a) = arg {
                    expr(a, max);
                }
            }
            Term::Continue { args, label } => {
                *max = (*max).max(label.stamp);
                args.iter().for_each(|a| expr(a, max));
            }
            Term::Return { value, .. } => expr(value, max),
            Term::HandleError { obj, .. } => expr(obj, max),
            Term::MakeObject { value, .. } => expr(value, max),
        }
    }

    let mut max = 0;
    for item in &program.items {
        match item {
            TopItem::Let { binder, expr: e } => {
                ident(&binder.id, &mut max);
                expr(e, &mut max);
            }
            TopItem::Fn { func, .. } => fnlit(func, &mut max),
            TopItem::Expr { expr: e } => expr(e, &mut max),
            TopItem::Stub { .. } => {}
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{global_env::TableEnv, ident::IdGen};

    #[test]
    fn fresh_stamps_start_above_the_input() {
        let mut idg = IdGen::new();
        let x = Binder::new(idg.fresh("x"), CoreType::Int);
        let program = Program {
            items: vec![TopItem::Let { binder: x.clone(), expr: Expr::int(1) }],
            object_impls: vec![],
        };
        let env = TableEnv::new();
        let config = Config::default();
        let mut ctx = Ctx::new(&program, &env, &config);
        let fresh = ctx.idgen.fresh("tmp");
        let Ident::Local { stamp, .. } = fresh else { unreachable!() };
        let Ident::Local { stamp: input, .. } = x.id else { unreachable!() };
        assert!(stamp > input);
    }
}
