//! S-expression rendering of the output IR.
//!
//! This form is the stable observable between components: tests assert on
//! it, and dumps of intermediate programs use it. Location wrappers are
//! elided unless `show_loc` is set; runs of `let`, `seq` and `event` nodes
//! collapse so dumps stay readable.

use pretty::{DocAllocator, DocBuilder};

use crate::{
    INTERNER,
    clam::{
        ltype::TypeDef,
        term::{
            AllocKind, ArrayAccessKind, ClosureAddress, ClosureAlloc, FieldKind, FnItemKind,
            GetItemExtra, JoinKind, LFunc, Lambda, Prog, Target, TopFuncItem,
        },
    },
    source::Span,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyOpts {
    pub show_loc: bool,
}

fn loc_doc<'a, D, A>(alloc: &'a D, loc: &Span) -> DocBuilder<'a, D, A>
where
    D: DocAllocator<'a, A>,
    D::Doc: Clone,
    A: 'a + Clone,
{
    let src = match loc.source_id {
        Some(id) => format!("{}:", id.get()),
        None => String::new(),
    };
    alloc.text(format!("@{src}{}-{}", loc.start_byte, loc.end_byte))
}

impl ClosureAlloc {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let addr = match &self.address {
            ClosureAddress::Normal(a) => alloc.text(format!("{a}")),
            ClosureAddress::WellKnownMutRec => alloc.text("well-known-mut-rec"),
        };
        (alloc.text(format!("closure {} ", self.tid))
            + addr
            + alloc.space()
            + alloc
                .intersperse(
                    self.captures.iter().map(|c| alloc.text(format!("{c}"))),
                    alloc.space(),
                )
                .parens())
        .group()
        .parens()
    }
}

impl Lambda {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D, opts: &PrettyOpts) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        match self {
            // Elide the wrapper entirely when locations are off.
            Lambda::Event { expr, .. } if !opts.show_loc => expr.pretty(alloc, opts),

            Lambda::Event { expr, loc } => {
                // Collapse a run of events, keeping the outermost location.
                let mut inner: &Lambda = expr;
                while let Lambda::Event { expr, .. } = inner {
                    inner = expr;
                }
                (alloc.text("event ")
                    + loc_doc(alloc, loc)
                    + alloc.line()
                    + inner.pretty(alloc, opts).nest(2))
                .group()
                .parens()
            }

            Lambda::Const(c) => c.pretty(alloc),
            Lambda::Var { var } => alloc.text(format!("{var}")),
            Lambda::Assign { var, expr } => {
                (alloc.text(format!("set! {var} ")) + expr.pretty(alloc, opts)).group().parens()
            }

            Lambda::Let { .. } => {
                // Collapse a chain of lets into one binding group.
                let mut binds = Vec::new();
                let mut cursor = self;
                while let Lambda::Let { name, value, body } = cursor {
                    binds.push((name, value));
                    cursor = body;
                }
                let binds_doc = alloc.intersperse(
                    binds.into_iter().map(|(name, value)| {
                        (alloc.text(format!("{name}")) + alloc.space() + value.pretty(alloc, opts))
                            .group()
                            .brackets()
                    }),
                    alloc.line(),
                );
                (alloc.text("let")
                    + alloc.space()
                    + binds_doc.parens()
                    + alloc.line()
                    + cursor.pretty(alloc, opts).nest(2))
                .group()
                .parens()
            }

            Lambda::Letrec { names, fns, body } => {
                let binds_doc = alloc.intersperse(
                    names.iter().zip(fns.iter()).map(|(n, f)| {
                        (alloc.text(format!("{n}")) + alloc.softline() + f.pretty(alloc))
                            .group()
                            .brackets()
                    }),
                    alloc.line(),
                );
                (alloc.text("letrec")
                    + alloc.space()
                    + binds_doc.parens()
                    + alloc.line()
                    + body.pretty(alloc, opts).nest(2))
                .parens()
            }

            Lambda::Sequence { .. } => {
                let mut items: Vec<&Lambda> = Vec::new();
                fn flatten<'l>(l: &'l Lambda, items: &mut Vec<&'l Lambda>) {
                    match l {
                        Lambda::Sequence { exprs, last } => {
                            for e in exprs {
                                flatten(e, items);
                            }
                            flatten(last, items);
                        }
                        other => items.push(other),
                    }
                }
                flatten(self, &mut items);
                (alloc.text("seq")
                    + alloc.line()
                    + alloc
                        .intersperse(items.iter().map(|e| e.pretty(alloc, opts)), alloc.line())
                        .nest(2))
                .group()
                .parens()
            }

            Lambda::If { pred, ifso, ifnot, ty } => (alloc.text("if ")
                + alloc.text(format!("{ty} "))
                + pred.pretty(alloc, opts)
                + alloc.space()
                + ifso.pretty(alloc, opts)
                + alloc.space()
                + ifnot.pretty(alloc, opts))
            .group()
            .parens(),

            Lambda::Loop { params, body, args, label, ty } => {
                let binds = alloc.intersperse(
                    params.iter().zip(args.iter()).map(|(p, a)| {
                        (alloc.text(format!("{} {} ", p.name, p.ty)) + a.pretty(alloc, opts))
                            .group()
                            .brackets()
                    }),
                    alloc.space(),
                );
                (alloc.text(format!("loop {label} {ty} "))
                    + binds.parens()
                    + alloc.line()
                    + body.pretty(alloc, opts).nest(2))
                .group()
                .parens()
            }

            Lambda::Break { arg, label } => {
                let a = match arg {
                    Some(a) => alloc.space() + a.pretty(alloc, opts),
                    None => alloc.nil(),
                };
                (alloc.text(format!("break {label}")) + a).group().parens()
            }

            Lambda::Continue { args, label } => (alloc.text(format!("continue {label}"))
                + alloc.space()
                + alloc.intersperse(args.iter().map(|a| a.pretty(alloc, opts)), alloc.space()))
            .group()
            .parens(),

            Lambda::Joinlet { name, params, value, body, kind, ty } => {
                let head = match kind {
                    JoinKind::TailJoin => "joinlet",
                    JoinKind::NontailJoin => "joinlet-nontail",
                };
                let params_doc = alloc
                    .intersperse(
                        params
                            .iter()
                            .map(|p| alloc.text(format!("{} {}", p.name, p.ty)).brackets()),
                        alloc.space(),
                    )
                    .parens();
                (alloc.text(format!("{head} {ty} "))
                    + (alloc.text(format!("{name} ")) + params_doc + alloc.space()
                        + value.pretty(alloc, opts))
                    .group()
                    .brackets()
                    + alloc.line()
                    + body.pretty(alloc, opts).nest(2))
                .group()
                .parens()
            }

            Lambda::Joinapply { name, args } => (alloc.text(format!("joinapply {name}"))
                + if args.is_empty() {
                    alloc.nil()
                } else {
                    alloc.space()
                        + alloc
                            .intersperse(args.iter().map(|a| a.pretty(alloc, opts)), alloc.space())
                })
            .group()
            .parens(),

            Lambda::Switch { obj, cases, default, ty } => {
                let cases_doc = alloc.intersperse(
                    cases.iter().map(|(tag, body)| {
                        (alloc.text(format!("{}#{} ", INTERNER.resolve(&tag.name), tag.index))
                            + body.pretty(alloc, opts))
                        .group()
                        .brackets()
                    }),
                    alloc.line(),
                );
                let d = match default {
                    Some(d) => {
                        alloc.line()
                            + (alloc.text("default ") + d.pretty(alloc, opts)).group().brackets()
                    }
                    None => alloc.nil(),
                };
                (alloc.text(format!("switch {ty} {obj}")) + alloc.line() + cases_doc + d)
                    .nest(2)
                    .group()
                    .parens()
            }

            Lambda::Switchint { obj, cases, default, ty } => {
                let cases_doc = alloc.intersperse(
                    cases.iter().map(|(k, body)| {
                        (alloc.text(format!("{k} ")) + body.pretty(alloc, opts)).group().brackets()
                    }),
                    alloc.line(),
                );
                (alloc.text(format!("switchint {ty} {obj}"))
                    + alloc.line()
                    + cases_doc
                    + alloc.line()
                    + (alloc.text("default ") + default.pretty(alloc, opts)).group().brackets())
                .nest(2)
                .group()
                .parens()
            }

            Lambda::Switchstring { obj, cases, default, ty } => {
                let cases_doc = alloc.intersperse(
                    cases.iter().map(|(k, body)| {
                        (alloc.text(format!("{:?} ", INTERNER.resolve(k)))
                            + body.pretty(alloc, opts))
                        .group()
                        .brackets()
                    }),
                    alloc.line(),
                );
                (alloc.text(format!("switchstring {ty} {obj}"))
                    + alloc.line()
                    + cases_doc
                    + alloc.line()
                    + (alloc.text("default ") + default.pretty(alloc, opts)).group().brackets())
                .nest(2)
                .group()
                .parens()
            }

            Lambda::Apply { target, prim, args } => {
                let target_doc = match target {
                    Target::Dynamic(v) => alloc.text(format!("dynamic {v}")),
                    Target::StaticFn(a) => alloc.text(format!("static {a}")),
                    Target::Object { obj, method_index, method_ty } => {
                        alloc.text(format!("object {obj} #{method_index} {method_ty}"))
                    }
                };
                let tag = match prim {
                    Some(p) => alloc.text(format!(" !{}", p.tag_name())),
                    None => alloc.nil(),
                };
                (alloc.text("apply ")
                    + target_doc
                    + tag
                    + if args.is_empty() {
                        alloc.nil()
                    } else {
                        alloc.space()
                            + alloc.intersperse(
                                args.iter().map(|a| a.pretty(alloc, opts)),
                                alloc.space(),
                            )
                    })
                .group()
                .parens()
            }

            Lambda::Prim { prim, args } => (alloc.text(format!("#%{prim:?}"))
                + if args.is_empty() {
                    alloc.nil()
                } else {
                    alloc.space()
                        + alloc
                            .intersperse(args.iter().map(|a| a.pretty(alloc, opts)), alloc.space())
                })
            .group()
            .parens(),

            Lambda::StubCall { foreign_name, args, .. } => {
                (alloc.text(format!("stub-call {:?}", INTERNER.resolve(foreign_name)))
                    + if args.is_empty() {
                        alloc.nil()
                    } else {
                        alloc.space()
                            + alloc.intersperse(
                                args.iter().map(|a| a.pretty(alloc, opts)),
                                alloc.space(),
                            )
                    })
                .group()
                .parens()
            }

            Lambda::Allocate { kind, tid, fields } => {
                let kind_doc = match kind {
                    AllocKind::Tuple => alloc.text("tuple".to_string()),
                    AllocKind::Struct => alloc.text("struct".to_string()),
                    AllocKind::Enum { tag } => {
                        alloc.text(format!("enum {}#{}", INTERNER.resolve(&tag.name), tag.index))
                    }
                    AllocKind::Object { methods } => {
                        alloc.text("object ")
                            + alloc
                                .intersperse(
                                    methods.iter().map(|m| alloc.text(format!("{m}"))),
                                    alloc.space(),
                                )
                                .parens()
                    }
                };
                (alloc.text("allocate ")
                    + kind_doc
                    + alloc.text(format!(" {tid}"))
                    + if fields.is_empty() {
                        alloc.nil()
                    } else {
                        alloc.space()
                            + alloc.intersperse(
                                fields.iter().map(|f| f.pretty(alloc, opts)),
                                alloc.space(),
                            )
                    })
                .group()
                .parens()
            }

            Lambda::Closure(c) => c.pretty(alloc),

            Lambda::GetRawFunc(addr) => alloc.text(format!("(get-raw-func {addr})")),

            Lambda::GetField { obj, tid, index, kind } => {
                let k = match kind {
                    FieldKind::Tuple => "tuple".to_string(),
                    FieldKind::Struct => "struct".to_string(),
                    FieldKind::Enum => "enum".to_string(),
                    FieldKind::Object { number_of_methods } => {
                        format!("object/{number_of_methods}")
                    }
                };
                (alloc.text(format!("get-field {k} {tid} {index} ")) + obj.pretty(alloc, opts))
                    .group()
                    .parens()
            }

            Lambda::SetField { obj, tid, index, value, kind } => {
                let k = match kind {
                    crate::clam::term::SetFieldKind::Struct => "struct",
                    crate::clam::term::SetFieldKind::Enum => "enum",
                };
                (alloc.text(format!("set-field {k} {tid} {index} "))
                    + obj.pretty(alloc, opts)
                    + alloc.space()
                    + value.pretty(alloc, opts))
                .group()
                .parens()
            }

            Lambda::ClosureField { obj, tid, index } => {
                (alloc.text(format!("closure-field {tid} {index} ")) + obj.pretty(alloc, opts))
                    .group()
                    .parens()
            }

            Lambda::MakeArray { tid, elems } => (alloc.text(format!("make-array {tid}"))
                + if elems.is_empty() {
                    alloc.nil()
                } else {
                    alloc.space()
                        + alloc
                            .intersperse(elems.iter().map(|e| e.pretty(alloc, opts)), alloc.space())
                })
            .group()
            .parens(),

            Lambda::ArrayGetItem { arr, index, tid, kind, extra } => {
                let k = match kind {
                    ArrayAccessKind::Safe => "safe",
                    ArrayAccessKind::Unsafe => "unsafe",
                    ArrayAccessKind::RevUnsafe => "rev-unsafe",
                };
                let x = match extra {
                    GetItemExtra::NeedNonNullCast => " non-null-cast",
                    GetItemExtra::NeedSignedInfo { signed: true } => " signed",
                    GetItemExtra::NeedSignedInfo { signed: false } => " unsigned",
                    GetItemExtra::NoExtra => "",
                };
                (alloc.text(format!("array-get {k}{x} {tid} "))
                    + arr.pretty(alloc, opts)
                    + alloc.space()
                    + index.pretty(alloc, opts))
                .group()
                .parens()
            }

            Lambda::ArraySetItem { arr, index, value, tid, kind } => {
                let k = match kind {
                    ArrayAccessKind::Safe => "safe",
                    ArrayAccessKind::Unsafe => "unsafe",
                    ArrayAccessKind::RevUnsafe => "rev-unsafe",
                };
                (alloc.text(format!("array-set {k} {tid} "))
                    + arr.pretty(alloc, opts)
                    + alloc.space()
                    + index.pretty(alloc, opts)
                    + alloc.space()
                    + value.pretty(alloc, opts))
                .group()
                .parens()
            }

            Lambda::Cast { expr, target_ty } => {
                (alloc.text(format!("cast {target_ty} ")) + expr.pretty(alloc, opts))
                    .group()
                    .parens()
            }

            Lambda::Catch { body, on_exception, ty } => (alloc.text(format!("catch {ty} "))
                + body.pretty(alloc, opts)
                + alloc.line()
                + on_exception.pretty(alloc, opts).nest(2))
            .group()
            .parens(),

            Lambda::Return(e) => (alloc.text("return ") + e.pretty(alloc, opts)).group().parens(),
        }
    }

    pub fn pretty_string(&self, opts: &PrettyOpts) -> String {
        let alloc = pretty::BoxAllocator;
        let mut out = Vec::new();
        self.pretty::<_, ()>(&alloc, opts).1.render(70, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }
}

impl LFunc {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D, opts: &PrettyOpts) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let params = alloc
            .intersperse(
                self.params
                    .iter()
                    .map(|p| alloc.text(format!("{} {}", p.name, p.ty)).brackets()),
                alloc.space(),
            )
            .parens();
        let ret = match &self.return_ty {
            Some(t) => alloc.text(format!(" -> {t}")),
            None => alloc.nil(),
        };
        (alloc.text("fn ") + params + ret + alloc.line() + self.body.pretty(alloc, opts).nest(2))
            .group()
            .parens()
    }
}

impl TopFuncItem {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D, opts: &PrettyOpts) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let vis = match &self.kind {
            FnItemKind::TopPub { export_name } => {
                format!(" export:{}", INTERNER.resolve(export_name))
            }
            FnItemKind::TopPrivate => String::new(),
        };
        let tid = match &self.tid {
            Some(t) => format!(" {t}"),
            None => String::new(),
        };
        (alloc.text(format!("top-fn{vis} {}{tid} ", self.binder)) + self.func.pretty(alloc, opts))
            .group()
            .parens()
    }
}

impl TypeDef {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let tys = |alloc: &'a D, fields: &[crate::clam::ltype::LowType]| {
            alloc
                .intersperse(
                    fields.iter().map(|t| alloc.text(format!("{t}"))).collect::<Vec<_>>(),
                    alloc.space(),
                )
                .parens()
        };
        let sig = |alloc: &'a D, sig: &crate::clam::ltype::FnSig| {
            tys(alloc, &sig.params) + alloc.text(format!(" -> {}", sig.ret))
        };
        match self {
            TypeDef::ClosureAbstract { sig: s } => {
                (alloc.text("closure-abstract ") + sig(alloc, s)).group().parens()
            }
            TypeDef::Closure { fn_sig_tid, captures } => {
                (alloc.text(format!("closure {fn_sig_tid} ")) + tys(alloc, captures))
                    .group()
                    .parens()
            }
            TypeDef::Struct { fields } => {
                (alloc.text("struct ") + tys(alloc, fields)).group().parens()
            }
            TypeDef::Tuple { fields } => {
                (alloc.text("tuple ") + tys(alloc, fields)).group().parens()
            }
            TypeDef::LateInitStruct { fields } => {
                (alloc.text("late-init-struct ") + tys(alloc, fields)).group().parens()
            }
            TypeDef::Enum { name, cases } => {
                alloc.text(format!("(enum {} {cases})", INTERNER.resolve(name)))
            }
            TypeDef::Constructor { enum_tid, tag, fields } => (alloc.text(format!(
                "constructor {enum_tid} {}#{} ",
                INTERNER.resolve(&tag.name),
                tag.index
            )) + tys(alloc, fields))
            .group()
            .parens(),
            TypeDef::Object { methods } => (alloc.text("object ")
                + alloc
                    .intersperse(methods.iter().map(|m| sig(alloc, m).parens()), alloc.space()))
            .group()
            .parens(),
            TypeDef::ConcreteObject { abstract_tid, self_ } => {
                alloc.text(format!("(concrete-object {abstract_tid} {self_})"))
            }
            TypeDef::Array { elem } => alloc.text(format!("(array {elem})")),
            TypeDef::FixedArray { elem } => alloc.text(format!("(fixedarray {elem})")),
            TypeDef::ArrayView { elem } => alloc.text(format!("(arrayview {elem})")),
            TypeDef::BytesView => alloc.text("bytesview"),
        }
    }
}

impl Prog {
    pub fn pretty<'a, D, A>(&self, alloc: &'a D, opts: &PrettyOpts) -> DocBuilder<'a, D, A>
    where
        D: DocAllocator<'a, A>,
        D::Doc: Clone,
        A: 'a + Clone,
    {
        let type_defs = alloc.intersperse(
            self.type_defs.iter().map(|(tid, def)| {
                (alloc.text(format!("{tid} ")) + def.pretty(alloc)).group().brackets()
            }),
            alloc.line(),
        );
        let globals = alloc.intersperse(
            self.globals.iter().map(|(id, c)| {
                let v = match c {
                    Some(c) => alloc.space() + c.pretty(alloc),
                    None => alloc.nil(),
                };
                (alloc.text(format!("{id}")) + v).group().brackets()
            }),
            alloc.line(),
        );
        let fns = alloc.intersperse(
            self.fns.iter().map(|f| f.pretty(alloc, opts)),
            alloc.line(),
        );
        let main = match &self.main {
            Some(m) => {
                alloc.line() + (alloc.text("main ") + m.pretty(alloc, opts)).group().parens()
            }
            None => alloc.nil(),
        };
        (alloc.text("prog")
            + alloc.line()
            + (alloc.text("type-defs") + alloc.line() + type_defs.nest(2)).group().parens()
            + alloc.line()
            + (alloc.text("globals") + alloc.line() + globals.nest(2)).group().parens()
            + alloc.line()
            + fns
            + main
            + alloc.line()
            + (alloc.text("init ") + self.init.pretty(alloc, opts)).group().parens())
        .nest(2)
        .group()
        .parens()
    }

    pub fn pretty_string(&self, opts: &PrettyOpts) -> String {
        let alloc = pretty::BoxAllocator;
        let mut out = Vec::new();
        self.pretty::<_, ()>(&alloc, opts).1.render(70, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }
}
