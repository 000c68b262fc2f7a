//! The return-continuation transformation.
//!
//! `return` can occur anywhere in a body; the backend only has local,
//! first-order control flow. Each function that needs it gets a `return`
//! join (and, for error-raising functions, a `raise` join) wrapped around
//! its lowered body; every `return` becomes a join application and the tail
//! value of a result-wrapping body is routed through the `return` join too.
//! Joins are only emitted when their need flag was actually set.

use std::cell::Cell;

use crate::{
    clam::{
        ltype::{LowType, Tid},
        term::{AllocKind, JoinKind, LParam, Lambda, PrimFn},
    },
    ident::Ident,
    mcore::term::Tag,
};

/// How the function's physical result relates to its body's value.
#[derive(Debug, Clone)]
pub enum ReturnStyle {
    /// Body value is the result.
    Direct { ret: LowType },
    /// Body is typed at the success component; the joins wrap values into
    /// the result sum.
    WrapResult {
        enum_tid: Tid,
        ok_tid: Tid,
        err_tid: Tid,
        ok_low: LowType,
        err_low: LowType,
    },
}

#[derive(Debug)]
pub struct ReturnCtx {
    pub return_join: Ident,
    pub raise_join: Ident,
    style: ReturnStyle,
    need_return: Cell<bool>,
    need_raise: Cell<bool>,
}

fn ok_tag() -> Tag {
    Tag { name: crate::intern("Ok"), index: 0 }
}

fn err_tag() -> Tag {
    Tag { name: crate::intern("Err"), index: 1 }
}

impl ReturnCtx {
    pub fn new(return_join: Ident, raise_join: Ident, style: ReturnStyle) -> Self {
        ReturnCtx {
            return_join,
            raise_join,
            style,
            need_return: Cell::new(false),
            need_raise: Cell::new(false),
        }
    }

    pub fn wraps_result(&self) -> bool {
        matches!(self.style, ReturnStyle::WrapResult { .. })
    }

    /// A rewritten `return e`.
    pub fn apply_return(&self, arg: Lambda) -> Lambda {
        self.need_return.set(true);
        Lambda::Joinapply { name: self.return_join, args: vec![arg] }
    }

    /// A rewritten error `return e` / propagated error.
    pub fn apply_raise(&self, arg: Lambda) -> Lambda {
        let ReturnStyle::WrapResult { .. } = self.style else {
            panic!("error return in a function without an error signature");
        };
        self.need_raise.set(true);
        Lambda::Joinapply { name: self.raise_join, args: vec![arg] }
    }

    /// Push the `return` join application into the tail positions of a
    /// lowered body, so the final value of a result-wrapping function flows
    /// through the join exactly once.
    pub fn route_tail(&self, body: Lambda) -> Lambda {
        match body {
            Lambda::Let { name, value, body } => Lambda::Let {
                name,
                value,
                body: Box::new(self.route_tail(*body)),
            },
            Lambda::Letrec { names, fns, body } => Lambda::Letrec {
                names,
                fns,
                body: Box::new(self.route_tail(*body)),
            },
            Lambda::Sequence { exprs, last } => Lambda::Sequence {
                exprs,
                last: Box::new(self.route_tail(*last)),
            },
            Lambda::If { pred, ifso, ifnot, ty } => Lambda::If {
                pred,
                ifso: Box::new(self.route_tail(*ifso)),
                ifnot: Box::new(self.route_tail(*ifnot)),
                ty,
            },
            Lambda::Joinlet { name, params, value, body, kind, ty } => Lambda::Joinlet {
                name,
                params,
                value,
                body: Box::new(self.route_tail(*body)),
                kind,
                ty,
            },
            Lambda::Switch { obj, cases, default, ty } => Lambda::Switch {
                obj,
                cases: cases
                    .into_iter()
                    .map(|(t, e)| (t, self.route_tail(e)))
                    .collect(),
                default: default.map(|d| Box::new(self.route_tail(*d))),
                ty,
            },
            Lambda::Switchint { obj, cases, default, ty } => Lambda::Switchint {
                obj,
                cases: cases
                    .into_iter()
                    .map(|(k, e)| (k, self.route_tail(e)))
                    .collect(),
                default: Box::new(self.route_tail(*default)),
                ty,
            },
            Lambda::Switchstring { obj, cases, default, ty } => Lambda::Switchstring {
                obj,
                cases: cases
                    .into_iter()
                    .map(|(k, e)| (k, self.route_tail(e)))
                    .collect(),
                default: Box::new(self.route_tail(*default)),
                ty,
            },
            Lambda::Event { expr, loc } => Lambda::Event {
                expr: Box::new(self.route_tail(*expr)),
                loc,
            },
            // Already a jump; nothing flows out of here.
            jump @ (Lambda::Joinapply { .. }
            | Lambda::Break { .. }
            | Lambda::Continue { .. }
            | Lambda::Return(_)) => jump,
            value => self.apply_return(value),
        }
    }

    /// Wrap the (already routed) body in the joins it needs.
    pub fn wrap_body(&self, body: Lambda) -> Lambda {
        let result_ty = self.result_low();
        let body = if self.need_raise.get() {
            let ReturnStyle::WrapResult { enum_tid, err_tid, err_low, .. } = &self.style else {
                unreachable!("raise join outside a result-wrapping function");
            };
            let e = self.fresh_param_of(self.raise_join);
            Lambda::Joinlet {
                name: self.raise_join,
                params: vec![LParam { name: e, ty: *err_low }],
                value: Box::new(Lambda::Allocate {
                    kind: AllocKind::Enum { tag: err_tag() },
                    tid: *err_tid,
                    fields: vec![Lambda::var(e)],
                }),
                body: Box::new(body),
                kind: JoinKind::TailJoin,
                ty: LowType::Ref(*enum_tid),
            }
        } else {
            body
        };

        if self.need_return.get() {
            let v = self.fresh_param_of(self.return_join);
            let (param_ty, value) = match &self.style {
                ReturnStyle::Direct { ret } => (*ret, Lambda::var(v)),
                ReturnStyle::WrapResult { ok_tid, ok_low, .. } => (
                    *ok_low,
                    Lambda::Allocate {
                        kind: AllocKind::Enum { tag: ok_tag() },
                        tid: *ok_tid,
                        fields: vec![Lambda::var(v)],
                    },
                ),
            };
            Lambda::Joinlet {
                name: self.return_join,
                params: vec![LParam { name: v, ty: param_ty }],
                value: Box::new(value),
                body: Box::new(body),
                kind: JoinKind::TailJoin,
                ty: result_ty,
            }
        } else {
            body
        }
    }

    /// The lowered result type of the whole function.
    pub fn result_low(&self) -> LowType {
        match &self.style {
            ReturnStyle::Direct { ret } => *ret,
            ReturnStyle::WrapResult { enum_tid, .. } => LowType::Ref(*enum_tid),
        }
    }

    /// The handler body for error-propagating `handle_error`.
    pub fn propagate_caught(&self) -> Lambda {
        self.apply_raise(Lambda::Prim { prim: PrimFn::CaughtError, args: vec![] })
    }

    // Join parameters only need to be unique within the joinlet; deriving
    // them from the join's own stamp keeps the whole pass free of an extra
    // generator thread.
    fn fresh_param_of(&self, join: Ident) -> Ident {
        match join {
            Ident::Local { name, stamp } | Ident::Mutable { name, stamp } => Ident::Local {
                name: crate::intern(&format!("{}.v", crate::resolve(&name))),
                stamp,
            },
            _ => unreachable!("join names are locals"),
        }
    }
}
