use lasso::Spur;

use crate::{
    clam::ltype::{Addr, LowType, Tid, TypeDef},
    global_env::Intrinsic,
    ident::{Ident, Label},
    mcore::term::{ArithOp, CompareOp, Constant, OperandTy, Tag},
    source::Span,
};

/// Lowered primitive operations. Everything here maps onto one or a handful
/// of backend instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimFn {
    Arith { op: ArithOp, ty: OperandTy },
    Compare { op: CompareOp, ty: OperandTy },
    Not,
    Panic,
    Null,
    /// Null of the host string type; only produced under
    /// `use_js_builtin_string`.
    NullStringExtern,
    IsNull,
    /// Downcast a nullable reference that is known non-null.
    AsNonNull,
    CharToString,
    /// Raw fixed-array length.
    ArrayLen,
    /// The in-flight error value inside an `Lcatch` handler.
    CaughtError,
}

/// The callee of an `Lapply`.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A first-class closure held in a bound variable.
    Dynamic(Ident),
    /// A known code address; captured environment, if any, is the leading
    /// argument.
    StaticFn(Addr),
    /// A method slot of an abstract object.
    Object {
        obj: Ident,
        method_index: usize,
        method_ty: LowType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    TailJoin,
    NontailJoin,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocKind {
    Tuple,
    Struct,
    Enum { tag: Tag },
    /// Object allocation; carries the method table.
    Object { methods: Vec<Addr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Tuple,
    Struct,
    Enum,
    Object { number_of_methods: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetFieldKind {
    Struct,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayAccessKind {
    /// Bounds-checked by construction (the check was emitted separately).
    Safe,
    Unsafe,
    /// Unchecked access counted from the end.
    RevUnsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetItemExtra {
    NeedNonNullCast,
    NeedSignedInfo { signed: bool },
    NoExtra,
}

/// How a closure allocation names its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureAddress {
    Normal(Addr),
    /// Member of a well-known mutually recursive bundle: no code pointer is
    /// stored, the "closure" is the shared late-init capture record.
    WellKnownMutRec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureAlloc {
    /// Captured variables, bit-for-bit in capture-record field order.
    pub captures: Vec<Ident>,
    pub address: ClosureAddress,
    pub tid: Tid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LParam {
    pub name: Ident,
    pub ty: LowType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lambda {
    Const(Constant),
    Var {
        var: Ident,
    },
    Assign {
        var: Ident,
        expr: Box<Lambda>,
    },
    Let {
        name: Ident,
        value: Box<Lambda>,
        body: Box<Lambda>,
    },
    /// Simultaneous closure bindings; all closures share scope with one
    /// another through their capture records.
    Letrec {
        names: Vec<Ident>,
        fns: Vec<ClosureAlloc>,
        body: Box<Lambda>,
    },
    Sequence {
        exprs: Vec<Lambda>,
        last: Box<Lambda>,
    },
    If {
        pred: Box<Lambda>,
        ifso: Box<Lambda>,
        ifnot: Box<Lambda>,
        ty: LowType,
    },
    Loop {
        params: Vec<LParam>,
        body: Box<Lambda>,
        args: Vec<Lambda>,
        label: Label,
        ty: LowType,
    },
    Break {
        arg: Option<Box<Lambda>>,
        label: Label,
    },
    Continue {
        args: Vec<Lambda>,
        label: Label,
    },
    /// A local second-class continuation.
    Joinlet {
        name: Ident,
        params: Vec<LParam>,
        value: Box<Lambda>,
        body: Box<Lambda>,
        kind: JoinKind,
        ty: LowType,
    },
    Joinapply {
        name: Ident,
        args: Vec<Lambda>,
    },
    Switch {
        obj: Ident,
        cases: Vec<(Tag, Lambda)>,
        default: Option<Box<Lambda>>,
        ty: LowType,
    },
    Switchint {
        obj: Ident,
        cases: Vec<(i32, Lambda)>,
        default: Box<Lambda>,
        ty: LowType,
    },
    Switchstring {
        obj: Ident,
        cases: Vec<(Spur, Lambda)>,
        default: Box<Lambda>,
        ty: LowType,
    },
    Apply {
        target: Target,
        /// The intrinsic this apply came from, when the rewriter fell back
        /// to a call-through; printing and the backend both use it.
        prim: Option<Intrinsic>,
        args: Vec<Lambda>,
    },
    Prim {
        prim: PrimFn,
        args: Vec<Lambda>,
    },
    StubCall {
        foreign_name: Spur,
        args: Vec<Lambda>,
        params_ty: Vec<LowType>,
        return_ty: Option<LowType>,
    },
    Allocate {
        kind: AllocKind,
        tid: Tid,
        fields: Vec<Lambda>,
    },
    Closure(ClosureAlloc),
    /// The bare code pointer, without a closure wrapper.
    GetRawFunc(Addr),
    GetField {
        obj: Box<Lambda>,
        tid: Tid,
        index: usize,
        kind: FieldKind,
    },
    SetField {
        obj: Box<Lambda>,
        tid: Tid,
        index: usize,
        value: Box<Lambda>,
        kind: SetFieldKind,
    },
    ClosureField {
        obj: Box<Lambda>,
        tid: Tid,
        index: usize,
    },
    MakeArray {
        tid: Tid,
        elems: Vec<Lambda>,
    },
    ArrayGetItem {
        arr: Box<Lambda>,
        index: Box<Lambda>,
        tid: Tid,
        kind: ArrayAccessKind,
        extra: GetItemExtra,
    },
    ArraySetItem {
        arr: Box<Lambda>,
        index: Box<Lambda>,
        value: Box<Lambda>,
        tid: Tid,
        kind: ArrayAccessKind,
    },
    /// Change the static reference type; same reference.
    Cast {
        expr: Box<Lambda>,
        target_ty: LowType,
    },
    Catch {
        body: Box<Lambda>,
        on_exception: Box<Lambda>,
        ty: LowType,
    },
    /// Early-out; reserved for stub wrappers and error propagation.
    Return(Box<Lambda>),
    /// Debug location wrapper; elided entirely when debug is off.
    Event {
        expr: Box<Lambda>,
        loc: Span,
    },
}

impl Lambda {
    pub fn unit() -> Lambda {
        Lambda::Const(Constant::Int(0))
    }

    pub fn int(i: i32) -> Lambda {
        Lambda::Const(Constant::Int(i))
    }

    pub fn var(var: Ident) -> Lambda {
        Lambda::Var { var }
    }

    pub fn let_(name: Ident, value: Lambda, body: Lambda) -> Lambda {
        Lambda::Let {
            name,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn seq2(first: Lambda, last: Lambda) -> Lambda {
        Lambda::Sequence {
            exprs: vec![first],
            last: Box::new(last),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnItemKind {
    TopPub { export_name: Spur },
    TopPrivate,
}

/// A lowered function body with its interface.
#[derive(Debug, Clone, PartialEq)]
pub struct LFunc {
    pub params: Vec<LParam>,
    pub body: Lambda,
    pub return_ty: Option<LowType>,
}

/// One top-level function of the output program.
#[derive(Debug, Clone, PartialEq)]
pub struct TopFuncItem {
    pub binder: Addr,
    pub kind: FnItemKind,
    pub func: LFunc,
    /// For object-method wrappers, the concrete witness type.
    pub tid: Option<Tid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prog {
    pub fns: Vec<TopFuncItem>,
    pub main: Option<LFunc>,
    pub init: LFunc,
    /// Top-level value slots; constant-foldable ones carry their literal.
    pub globals: Vec<(Ident, Option<Constant>)>,
    pub type_defs: Vec<(Tid, TypeDef)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_shapes() {
        assert_eq!(Lambda::unit(), Lambda::Const(Constant::Int(0)));
        let s = Lambda::seq2(Lambda::int(1), Lambda::int(2));
        assert!(matches!(
            s,
            Lambda::Sequence { ref exprs, ref last }
                if exprs.len() == 1 && **last == Lambda::int(2)
        ));
    }
}
