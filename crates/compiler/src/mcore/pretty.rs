//! Debug S-expression printer for the input IR.

use pretty::{DocAllocator, DocBuilder};

use crate::{
    INTERNER,
    mcore::term::{ApplyKind, Constant, Expr, FnLit, HandleKind, LetFnKind, Term, TopItem},
};

impl Constant {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        match self {
            Constant::Unit => alloc.text("()"),
            Constant::Bool(b) => alloc.text(if *b { "#t" } else { "#f" }),
            Constant::Char(c) => alloc.text(format!("#\\{c}")),
            Constant::Int(i) => alloc.text(format!("{i}")),
            Constant::Int64(i) => alloc.text(format!("{i}L")),
            Constant::Double(d) => alloc.text(format!("{d:?}")),
            Constant::String(s) => alloc.text(format!("{:?}", INTERNER.resolve(s))),
            Constant::Bytes(b) => alloc.text(format!("#bytes[{}]", b.len())),
        }
    }
}

impl FnLit {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let params = alloc
            .intersperse(
                self.params.iter().map(|p| alloc.text(format!("{}", p.id))),
                alloc.space(),
            )
            .parens();
        (alloc.text(if self.is_async { "fn-async" } else { "fn" })
            + alloc.space()
            + params
            + alloc.line()
            + self.body.pretty(alloc).nest(2))
        .nest(2)
        .group()
        .parens()
    }
}

impl Expr {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let head = |s: &'static str| alloc.text(s) + alloc.space();
        match &self.term {
            Term::Const(c) => c.pretty(alloc),
            Term::Var(id) => alloc.text(format!("{id}")),
            Term::Prim { prim, args } => (alloc.text(format!("#%{prim:?}"))
                + alloc.space()
                + alloc.intersperse(args.iter().map(|a| a.pretty(alloc)), alloc.space()))
            .group()
            .parens(),
            Term::And(a, b) => (head("and") + a.pretty(alloc) + alloc.space() + b.pretty(alloc))
                .group()
                .parens(),
            Term::Or(a, b) => (head("or") + a.pretty(alloc) + alloc.space() + b.pretty(alloc))
                .group()
                .parens(),
            Term::Let { binder, value, body } => (head("let")
                + (alloc.text(format!("{}", binder.id)) + alloc.space() + value.pretty(alloc))
                    .brackets()
                + alloc.line()
                + body.pretty(alloc).nest(2))
            .group()
            .parens(),
            Term::Letfn { binder, func, kind, body } => {
                let k = match kind {
                    LetFnKind::Nonrec => "letfn",
                    LetFnKind::Rec => "letfn-rec",
                    LetFnKind::TailJoin => "letjoin",
                    LetFnKind::NontailJoin => "letjoin-nontail",
                };
                (head(k)
                    + (alloc.text(format!("{}", binder.id)) + alloc.space() + func.pretty(alloc))
                        .brackets()
                    + alloc.line()
                    + body.pretty(alloc).nest(2))
                .group()
                .parens()
            }
            Term::Letrec { bindings, body } => {
                let binds = alloc.intersperse(
                    bindings.iter().map(|(b, f)| {
                        (alloc.text(format!("{}", b.id)) + alloc.space() + f.pretty(alloc))
                            .group()
                            .brackets()
                    }),
                    alloc.line(),
                );
                (head("letrec") + binds.parens() + alloc.line() + body.pretty(alloc).nest(2))
                    .parens()
            }
            Term::Function { func, is_raw } => {
                if *is_raw {
                    (head("raw") + func.pretty(alloc)).group().parens()
                } else {
                    func.pretty(alloc)
                }
            }
            Term::Apply { func, kind, args } => {
                let k = match kind {
                    ApplyKind::Normal { .. } => alloc.nil(),
                    ApplyKind::Async => alloc.text("async "),
                    ApplyKind::Join => alloc.text("join "),
                };
                (k + alloc.text(format!("{func}"))
                    + alloc.space()
                    + alloc.intersperse(args.iter().map(|a| a.pretty(alloc)), alloc.space()))
                .group()
                .parens()
            }
            Term::Tuple(xs) => (head("tuple")
                + alloc.intersperse(xs.iter().map(|x| x.pretty(alloc)), alloc.space()))
            .group()
            .parens(),
            Term::Record { path, fields } => (alloc.text(format!("record {path}"))
                + alloc.space()
                + alloc.intersperse(fields.iter().map(|x| x.pretty(alloc)), alloc.space()))
            .group()
            .parens(),
            Term::RecordUpdate { base, updates } => (head("record-update")
                + base.pretty(alloc)
                + alloc.space()
                + alloc.intersperse(
                    updates.iter().map(|(i, x)| {
                        (alloc.text(format!("{i}")) + alloc.space() + x.pretty(alloc)).brackets()
                    }),
                    alloc.space(),
                ))
            .group()
            .parens(),
            Term::Field { obj, index } => {
                (head("field") + alloc.text(format!("{index}")) + alloc.space() + obj.pretty(alloc))
                    .group()
                    .parens()
            }
            Term::Mutate { obj, index, value } => (head("mutate")
                + alloc.text(format!("{index}"))
                + alloc.space()
                + obj.pretty(alloc)
                + alloc.space()
                + value.pretty(alloc))
            .group()
            .parens(),
            Term::Constructor { tag, args } => (alloc
                .text(format!("constr {}#{}", INTERNER.resolve(&tag.name), tag.index))
                + if args.is_empty() {
                    alloc.nil()
                } else {
                    alloc.space()
                        + alloc.intersperse(args.iter().map(|a| a.pretty(alloc)), alloc.space())
                })
            .group()
            .parens(),
            Term::Array(xs) => (head("array")
                + alloc.intersperse(xs.iter().map(|x| x.pretty(alloc)), alloc.space()))
            .group()
            .parens(),
            Term::Assign { var, value } => {
                (head("set!") + alloc.text(format!("{var}")) + alloc.space() + value.pretty(alloc))
                    .group()
                    .parens()
            }
            Term::Sequence { exprs, last } => (head("seq")
                + alloc.intersperse(
                    exprs.iter().chain(std::iter::once(&**last)).map(|x| x.pretty(alloc)),
                    alloc.line(),
                )
                .nest(2))
            .group()
            .parens(),
            Term::If { cond, ifso, ifnot } => {
                let els = match ifnot {
                    Some(e) => alloc.space() + e.pretty(alloc),
                    None => alloc.nil(),
                };
                (head("if") + cond.pretty(alloc) + alloc.space() + ifso.pretty(alloc) + els)
                    .group()
                    .parens()
            }
            Term::SwitchConstr { obj, cases, default } => {
                let cases_doc = alloc.intersperse(
                    cases.iter().map(|c| {
                        let b = match &c.binder {
                            Some(b) => alloc.text(format!(" {}", b.id)),
                            None => alloc.nil(),
                        };
                        (alloc.text(format!("{}#{}", INTERNER.resolve(&c.tag.name), c.tag.index))
                            + b
                            + alloc.space()
                            + c.body.pretty(alloc))
                        .group()
                        .brackets()
                    }),
                    alloc.line(),
                );
                let d = match default {
                    Some(d) => alloc.line() + (head("default") + d.pretty(alloc)).brackets(),
                    None => alloc.nil(),
                };
                (head("switch") + obj.pretty(alloc) + alloc.line() + cases_doc + d)
                    .nest(2)
                    .group()
                    .parens()
            }
            Term::SwitchConstant { obj, cases, default } => {
                let cases_doc = alloc.intersperse(
                    cases.iter().map(|(c, e)| {
                        (c.pretty(alloc) + alloc.space() + e.pretty(alloc)).group().brackets()
                    }),
                    alloc.line(),
                );
                (head("switch-const")
                    + obj.pretty(alloc)
                    + alloc.line()
                    + cases_doc
                    + alloc.line()
                    + (head("default") + default.pretty(alloc)).brackets())
                .nest(2)
                .group()
                .parens()
            }
            Term::Loop { params, args, body, label } => (alloc.text(format!("loop {label} "))
                + alloc
                    .intersperse(
                        params.iter().zip(args.iter()).map(|(p, a)| {
                            (alloc.text(format!("{}", p.id)) + alloc.space() + a.pretty(alloc))
                                .brackets()
                        }),
                        alloc.space(),
                    )
                    .parens()
                + alloc.line()
                + body.pretty(alloc).nest(2))
            .group()
            .parens(),
            Term::Break { arg, label } => {
                let a = match arg {
                    Some(a) => alloc.space() + a.pretty(alloc),
                    None => alloc.nil(),
                };
                (alloc.text(format!("break {label}")) + a).group().parens()
            }
            Term::Continue { args, label } => (alloc.text(format!("continue {label}"))
                + alloc.space()
                + alloc.intersperse(args.iter().map(|a| a.pretty(alloc)), alloc.space()))
            .group()
            .parens(),
            Term::Return { value, kind } => {
                let k = match kind {
                    crate::mcore::term::ReturnKind::Plain => "return",
                    crate::mcore::term::ReturnKind::Error { .. } => "return-err",
                };
                (head(k) + value.pretty(alloc)).group().parens()
            }
            Term::HandleError { obj, kind } => {
                let k = match kind {
                    HandleKind::ToResult => alloc.text("to-result"),
                    HandleKind::JoinApply { join } => alloc.text(format!("joinapply {join}")),
                    HandleKind::ReturnErr { .. } => alloc.text("return-err"),
                };
                (head("handle") + k + alloc.space() + obj.pretty(alloc)).group().parens()
            }
            Term::MakeObject { obj_path, value } => {
                (alloc.text(format!("make-object {obj_path} ")) + value.pretty(alloc))
                    .group()
                    .parens()
            }
        }
    }

    /// Render to a string at the conventional width.
    pub fn pretty_string(&self) -> String {
        let alloc = pretty::BoxAllocator;
        let mut out = Vec::new();
        self.pretty::<_, ()>(&alloc).1.render(70, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }
}

impl TopItem {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        match self {
            TopItem::Let { binder, expr } => (alloc.text(format!("top-let {} ", binder.id))
                + expr.pretty(alloc))
            .group()
            .parens(),
            TopItem::Fn { binder, func, export, is_main } => {
                let tag = if *is_main {
                    " main".to_string()
                } else {
                    match export {
                        Some(e) => format!(" export:{}", INTERNER.resolve(e)),
                        None => String::new(),
                    }
                };
                (alloc.text(format!("top-fn{tag} {binder} ")) + func.pretty(alloc))
                    .group()
                    .parens()
            }
            TopItem::Expr { expr } => {
                (alloc.text("top-expr ") + expr.pretty(alloc)).group().parens()
            }
            TopItem::Stub { binder, foreign_name, .. } => alloc
                .text(format!(
                    "(top-stub {binder} \"{}\")",
                    INTERNER.resolve(foreign_name)
                )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ident::IdGen, mcore::term::Binder, types::CoreType};

    #[test]
    fn renders_lets_and_calls() {
        let mut idg = IdGen::new();
        let x = Binder::new(idg.fresh("x"), CoreType::Int);
        let f = idg.fresh("f");
        let e = Expr::let_(
            x.clone(),
            Expr::int(3),
            Expr::apply(
                f,
                CoreType::arrow(vec![CoreType::Int], CoreType::Int),
                vec![Expr::var_of(&x)],
                CoreType::Int,
            ),
        );
        let s = e.pretty_string();
        assert!(s.contains("let [x/0 3]"));
        assert!(s.contains("(f/1 x/0)"));
    }
}
