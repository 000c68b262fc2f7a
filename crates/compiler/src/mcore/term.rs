use lasso::Spur;

use crate::{
    clam::ltype::LowType,
    ident::{Ident, Label},
    source::Span,
    types::{CoreType, TypePath},
};

/// A literal. Shared between MCore and Clam; the lowering maps `Unit` to the
/// integer zero on the way down.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Unit,
    Bool(bool),
    Char(char),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(Spur),
    Bytes(Vec<u8>),
}

impl Constant {
    pub fn ty(&self) -> CoreType {
        match self {
            Constant::Unit => CoreType::Unit,
            Constant::Bool(_) => CoreType::Bool,
            Constant::Char(_) => CoreType::Char,
            Constant::Int(_) => CoreType::Int,
            Constant::Int64(_) => CoreType::Int64,
            Constant::Double(_) => CoreType::Double,
            Constant::String(_) => CoreType::String,
            Constant::Bytes(_) => CoreType::Bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// The machine operand class an already-specialized primitive works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandTy {
    I32,
    I64,
    F32,
    F64,
}

/// Source-level primitive applications. Arithmetic and comparisons arrive
/// already specialized here; the *polymorphic* comparison operators come in
/// as intrinsic-tagged method applies instead and are specialized by the
/// rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    Arith { op: ArithOp, ty: OperandTy },
    Compare { op: CompareOp, ty: OperandTy },
    Not,
    Panic,
    /// Null literal of a nullable reference type.
    Null,
    IsNull,
    AsNonNull,
    /// Heap cell operations; the front end boxes mutable captures through
    /// these, and the iterator rewrites count/accumulate through them.
    RefMake,
    RefGet,
    RefSet,
    FixedArrayLength,
    FixedArrayUnsafeGet,
}

/// How a function position is being applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyKind {
    Normal { func_ty: CoreType },
    Async,
    /// Application of a join point; the callee is second-class and is not a
    /// free-variable use.
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LetFnKind {
    Nonrec,
    Rec,
    TailJoin,
    NontailJoin,
}

impl LetFnKind {
    pub fn is_join(&self) -> bool {
        matches!(self, LetFnKind::TailJoin | LetFnKind::NontailJoin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnKind {
    Plain,
    /// An error-raising return; `return_ty` is the enclosing function's
    /// physical result type (the built-in result sum).
    Error { return_ty: CoreType },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandleKind {
    /// Reify success/failure of the call into a result value.
    ToResult,
    /// Jump to an enclosing join with the error value.
    JoinApply { join: Ident },
    /// Propagate the error out of the enclosing function.
    ReturnErr { return_ty: CoreType },
}

/// A constructor discriminant: surface name plus its index in the owning
/// enum's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub name: Spur,
    pub index: usize,
}

/// A binder: an identifier plus the type captured at its binding site.
#[derive(Debug, Clone, PartialEq)]
pub struct Binder {
    pub id: Ident,
    pub ty: CoreType,
}

impl Binder {
    pub fn new(id: Ident, ty: CoreType) -> Self {
        Binder { id, ty }
    }
}

/// A function literal. `ret_ty` is the physical result type; for an
/// error-raising function it is the built-in result sum while the body is
/// typed at the success component.
#[derive(Debug, Clone, PartialEq)]
pub struct FnLit {
    pub params: Vec<Binder>,
    pub ret_ty: CoreType,
    pub body: Expr,
    pub is_async: bool,
}

impl FnLit {
    pub fn new(params: Vec<Binder>, ret_ty: CoreType, body: Expr) -> Self {
        FnLit {
            params,
            ret_ty,
            body,
            is_async: false,
        }
    }

    /// The arrow type of this literal.
    pub fn ty(&self) -> CoreType {
        CoreType::Arrow {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret_ty.clone()),
            err: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstrCase {
    pub tag: Tag,
    pub binder: Option<Binder>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub term: Term,
    pub ty: CoreType,
    pub loc: Span,
}

impl Expr {
    pub fn new(term: Term, ty: CoreType) -> Self {
        Expr {
            term,
            ty,
            loc: Span::default(),
        }
    }

    pub fn with_loc(mut self, loc: Span) -> Self {
        self.loc = loc;
        self
    }

    pub fn unit() -> Self {
        Expr::new(Term::Const(Constant::Unit), CoreType::Unit)
    }

    pub fn int(i: i32) -> Self {
        Expr::new(Term::Const(Constant::Int(i)), CoreType::Int)
    }

    pub fn var(id: Ident, ty: CoreType) -> Self {
        Expr::new(Term::Var(id), ty)
    }

    pub fn var_of(binder: &Binder) -> Self {
        Expr::var(binder.id, binder.ty.clone())
    }

    pub fn let_(binder: Binder, value: Expr, body: Expr) -> Self {
        let ty = body.ty.clone();
        Expr::new(
            Term::Let {
                binder,
                value: Box::new(value),
                body: Box::new(body),
            },
            ty,
        )
    }

    pub fn seq(exprs: Vec<Expr>, last: Expr) -> Self {
        let ty = last.ty.clone();
        Expr::new(
            Term::Sequence {
                exprs,
                last: Box::new(last),
            },
            ty,
        )
    }

    pub fn apply(func: Ident, func_ty: CoreType, args: Vec<Expr>, ret: CoreType) -> Self {
        Expr::new(
            Term::Apply {
                func,
                kind: ApplyKind::Normal { func_ty },
                args,
            },
            ret,
        )
    }

    /// Whether re-evaluating this expression is observationally free; such
    /// arguments are not hoisted by `bind_impure`.
    pub fn is_trivial(&self) -> bool {
        matches!(
            self.term,
            Term::Const(_) | Term::Var(_) | Term::Function { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Const(Constant),
    Var(Ident),
    Prim {
        prim: Prim,
        args: Vec<Expr>,
    },
    /// Short-circuit conjunction/disjunction.
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Let {
        binder: Binder,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    Letfn {
        binder: Binder,
        func: Box<FnLit>,
        kind: LetFnKind,
        body: Box<Expr>,
    },
    /// A bundle of simultaneously-scoped, possibly mutually recursive local
    /// functions. The SCC grouper splits it into minimal groups.
    Letrec {
        bindings: Vec<(Binder, FnLit)>,
        body: Box<Expr>,
    },
    /// A function literal in value position. Raw literals lower to a bare
    /// code pointer with no closure wrapper.
    Function {
        func: Box<FnLit>,
        is_raw: bool,
    },
    Apply {
        func: Ident,
        kind: ApplyKind,
        args: Vec<Expr>,
    },
    Tuple(Vec<Expr>),
    Record {
        path: TypePath,
        fields: Vec<Expr>,
    },
    RecordUpdate {
        base: Box<Expr>,
        updates: Vec<(usize, Expr)>,
    },
    Field {
        obj: Box<Expr>,
        index: usize,
    },
    Mutate {
        obj: Box<Expr>,
        index: usize,
        value: Box<Expr>,
    },
    Constructor {
        tag: Tag,
        args: Vec<Expr>,
    },
    Array(Vec<Expr>),
    Assign {
        var: Ident,
        value: Box<Expr>,
    },
    Sequence {
        exprs: Vec<Expr>,
        last: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        ifso: Box<Expr>,
        ifnot: Option<Box<Expr>>,
    },
    SwitchConstr {
        obj: Box<Expr>,
        cases: Vec<ConstrCase>,
        default: Option<Box<Expr>>,
    },
    SwitchConstant {
        obj: Box<Expr>,
        cases: Vec<(Constant, Expr)>,
        default: Box<Expr>,
    },
    Loop {
        params: Vec<Binder>,
        args: Vec<Expr>,
        body: Box<Expr>,
        label: Label,
    },
    Break {
        arg: Option<Box<Expr>>,
        label: Label,
    },
    Continue {
        args: Vec<Expr>,
        label: Label,
    },
    Return {
        value: Box<Expr>,
        kind: ReturnKind,
    },
    HandleError {
        obj: Box<Expr>,
        kind: HandleKind,
    },
    /// Coercion of a concrete value into an abstract object interface.
    MakeObject {
        obj_path: TypePath,
        value: Box<Expr>,
    },
}

/// A top-level item.
#[derive(Debug, Clone, PartialEq)]
pub enum TopItem {
    Let {
        binder: Binder,
        expr: Expr,
    },
    Fn {
        binder: Ident,
        func: FnLit,
        export: Option<Spur>,
        is_main: bool,
    },
    Expr {
        expr: Expr,
    },
    /// A foreign call surface with explicit wire types.
    Stub {
        binder: Ident,
        foreign_name: Spur,
        params_ty: Vec<LowType>,
        return_ty: Option<LowType>,
    },
}

/// A concrete type implementing an abstract object interface; drives the
/// synthesis of one method-wrapper item per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectImpl {
    pub abstract_path: TypePath,
    pub self_ty: CoreType,
    /// Implementing functions in method-table order.
    pub methods: Vec<Ident>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<TopItem>,
    pub object_impls: Vec<ObjectImpl>,
}

impl FnLit {
    /// Whether the body contains a `return` or error propagation that the
    /// return transformation must rewrite. Nested functions handle their own
    /// returns and are not scanned through.
    pub fn has_return(&self) -> bool {
        fn go(e: &Expr) -> bool {
            match &e.term {
                Term::Return { .. } => true,
                Term::HandleError { kind, obj } => {
                    matches!(kind, HandleKind::ReturnErr { .. }) || go(obj)
                }
                Term::Const(_) | Term::Var(_) => false,
                Term::Function { .. } => false,
                Term::Prim { args, .. }
                | Term::Apply { args, .. }
                | Term::Tuple(args)
                | Term::Array(args)
                | Term::Constructor { args, .. } => args.iter().any(go),
                Term::And(a, b) | Term::Or(a, b) => go(a) || go(b),
                Term::Let { value, body, .. } => go(value) || go(body),
                // Join bodies belong to the enclosing function's control
                // flow; real nested functions do not.
                Term::Letfn { func, kind, body, .. } => {
                    (kind.is_join() && go(&func.body)) || go(body)
                }
                Term::Letrec { body, .. } => go(body),
                Term::Record { fields, .. } => fields.iter().any(go),
                Term::RecordUpdate { base, updates } => {
                    go(base) || updates.iter().any(|(_, e)| go(e))
                }
                Term::Field { obj, .. } => go(obj),
                Term::Mutate { obj, value, .. } => go(obj) || go(value),
                Term::Assign { value, .. } => go(value),
                Term::Sequence { exprs, last } => exprs.iter().any(go) || go(last),
                Term::If { cond, ifso, ifnot } => {
                    go(cond) || go(ifso) || ifnot.as_deref().is_some_and(go)
                }
                Term::SwitchConstr { obj, cases, default } => {
                    go(obj)
                        || cases.iter().any(|c| go(&c.body))
                        || default.as_deref().is_some_and(go)
                }
                Term::SwitchConstant { obj, cases, default } => {
                    go(obj) || cases.iter().any(|(_, e)| go(e)) || go(default)
                }
                Term::Loop { args, body, .. } => args.iter().any(go) || go(body),
                Term::Break { arg, .. } => arg.as_deref().is_some_and(go),
                Term::Continue { args, .. } => args.iter().any(go),
                Term::MakeObject { value, .. } => go(value),
            }
        }
        go(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::IdGen;

    #[test]
    fn has_return_sees_through_control_but_not_nested_fns() {
        let mut idg = IdGen::new();
        let ret = Expr::new(
            Term::Return {
                value: Box::new(Expr::int(1)),
                kind: ReturnKind::Plain,
            },
            CoreType::Int,
        );

        let direct = FnLit::new(vec![], CoreType::Int, ret.clone());
        assert!(direct.has_return());

        // The same return inside a nested literal is that function's concern.
        let inner = FnLit::new(vec![], CoreType::Int, ret);
        let outer = FnLit::new(
            vec![],
            CoreType::Int,
            Expr::let_(
                Binder::new(idg.fresh("f"), inner.ty()),
                Expr::new(
                    Term::Function {
                        func: Box::new(inner),
                        is_raw: false,
                    },
                    CoreType::arrow(vec![], CoreType::Int),
                ),
                Expr::int(0),
            ),
        );
        assert!(!outer.has_return());
    }

    #[test]
    fn trivial_expressions() {
        let mut idg = IdGen::new();
        assert!(Expr::int(3).is_trivial());
        assert!(Expr::var(idg.fresh("x"), CoreType::Int).is_trivial());
        let call = Expr::apply(
            idg.fresh("f"),
            CoreType::arrow(vec![], CoreType::Int),
            vec![],
            CoreType::Int,
        );
        assert!(!call.is_trivial());
    }
}
