//! Closure conversion.
//!
//! Every local function either stays *well-known* (all uses are direct
//! calls; the environment travels as a bare leading argument) or *escapes*
//! (some use is first-class; an abstract closure object is built). The
//! escape pre-pass decided which; this pass synthesizes capture records,
//! code items and allocation sites, and installs the calling conventions in
//! the address table.

use hashlink::LinkedHashMap;
use im::HashSet;
use lasso::Spur;

use crate::{
    clam::{
        ltype::{LowType, Tid},
        term::{
            ClosureAddress, ClosureAlloc, FieldKind, FnItemKind, LFunc, LParam, Lambda,
            TopFuncItem,
        },
    },
    ident::Ident,
    intern,
    lower::{
        addr::LocalEnv,
        context::{Ctx, FrameState},
        transl::non_null_read,
    },
    mcore::{
        free_vars::{FreeVarMap, free_vars},
        scc::{Group, group_bindings},
        term::{Binder, Expr, FnLit},
    },
    types::CoreType,
};

fn assert_no_mutable_captures(fvs: &FreeVarMap) {
    for id in fvs.keys() {
        assert!(
            !id.is_mutable(),
            "mutable local {id} crosses a function boundary; it must be boxed"
        );
    }
}

/// One pending binding group, built before the scope body is lowered.
enum Wrap {
    Let(Ident, Lambda),
    Letrec(Vec<Ident>, Vec<ClosureAlloc>),
}

impl<'a> Ctx<'a> {
    /// `letfn` with a non-join kind.
    pub(crate) fn lower_letfn(
        &mut self,
        binder: &Binder,
        func: &FnLit,
        rec: bool,
        body: &Expr,
    ) -> Lambda {
        let value = self.lower_fn_binding(binder, func, rec);
        let body = self.transl(body);
        Lambda::let_(binder.id, value, body)
    }

    /// A `letrec` bundle: split into minimal groups, emit each in dependency
    /// order around the body.
    pub(crate) fn lower_letrec(&mut self, bindings: &[(Binder, FnLit)], body: &Expr) -> Lambda {
        let groups = group_bindings(bindings);
        let mut wraps = Vec::new();
        for group in &groups {
            match group {
                Group::NonRec(i) => {
                    let (b, f) = &bindings[*i];
                    let value = self.lower_fn_binding(b, f, false);
                    wraps.push(Wrap::Let(b.id, value));
                }
                Group::Rec(members) if members.len() == 1 => {
                    let (b, f) = &bindings[members[0]];
                    let value = self.lower_fn_binding(b, f, true);
                    wraps.push(Wrap::Let(b.id, value));
                }
                Group::Rec(members) => {
                    let bundle: Vec<_> =
                        members.iter().map(|i| &bindings[*i]).collect();
                    let (names, allocs) = self.lower_bundle(&bundle);
                    wraps.push(Wrap::Letrec(names, allocs));
                }
            }
        }
        let mut out = self.transl(body);
        for wrap in wraps.into_iter().rev() {
            out = match wrap {
                Wrap::Let(name, value) => Lambda::let_(name, value, out),
                Wrap::Letrec(names, fns) => {
                    Lambda::Letrec { names, fns, body: Box::new(out) }
                }
            };
        }
        out
    }

    /// An anonymous function literal in value position; escaping by
    /// construction.
    pub(crate) fn lower_anon(&mut self, func: &FnLit) -> Lambda {
        let fvs = free_vars(func, &HashSet::new());
        assert_no_mutable_captures(&fvs);
        let alloc = self.lower_escaping(intern("anon"), func, &fvs, None);
        Lambda::Closure(alloc)
    }

    /// Emit the code item and calling convention for one non-bundled local
    /// function; the returned lambda is the binder's value.
    fn lower_fn_binding(&mut self, binder: &Binder, func: &FnLit, rec: bool) -> Lambda {
        let exclude = if rec {
            HashSet::new().update(binder.id)
        } else {
            HashSet::new()
        };
        let fvs = free_vars(func, &exclude);
        assert_no_mutable_captures(&fvs);

        if self.escape.contains(&binder.id) {
            let alloc = self.lower_escaping(
                binder.id.base_name(),
                func,
                &fvs,
                rec.then_some(binder.id),
            );
            return Lambda::Closure(alloc);
        }

        // Well-known: direct calls only, no closure object.
        let addr = self.addrgen.fresh(binder.id.base_name());
        match fvs.len() {
            0 => {
                self.addrs.insert_local(binder.id, addr, LocalEnv::None);
                let lowered =
                    self.lower_fn_with(func, None, vec![], FrameState::InLocalBody);
                self.push_code_item(addr, lowered.params, lowered.body, lowered.ret);
                Lambda::unit()
            }
            1 => {
                let (fv, fv_ty) = fvs.iter().next().expect("one capture");
                let fv = *fv;
                let fv_ty = fv_ty.clone();
                let fv_low = self.lower_ty(&fv_ty);
                self.addrs
                    .insert_local(binder.id, addr, LocalEnv::Value(fv, fv_low));
                let env_param = LParam { name: fv, ty: fv_low };
                let lowered =
                    self.lower_fn_with(func, Some(env_param), vec![], FrameState::InLocalBody);
                self.push_code_item(addr, lowered.params, lowered.body, lowered.ret);
                Lambda::unit()
            }
            _ => {
                let caps: Vec<(Ident, LowType)> = {
                    let fvs = fvs.clone();
                    fvs.iter()
                        .map(|(id, ty)| (*id, self.lower_ty(ty)))
                        .collect()
                };
                let cap_lows: Vec<_> = caps.iter().map(|(_, t)| *t).collect();
                let tid = self.types.struct_tid(cap_lows.clone());
                self.addrs
                    .insert_local(binder.id, addr, LocalEnv::Struct(binder.id, tid));

                let env_id = self.idgen.fresh("env");
                let mut prologue = vec![(binder.id, Lambda::var(env_id))];
                for (i, (fv, low)) in caps.iter().enumerate() {
                    prologue.push((
                        *fv,
                        non_null_read(
                            *low,
                            Lambda::GetField {
                                obj: Box::new(Lambda::var(env_id)),
                                tid,
                                index: i,
                                kind: FieldKind::Struct,
                            },
                        ),
                    ));
                }
                let env_param = LParam { name: env_id, ty: LowType::Ref(tid) };
                let lowered = self.lower_fn_with(
                    func,
                    Some(env_param),
                    prologue,
                    FrameState::InLocalBody,
                );
                self.push_code_item(addr, lowered.params, lowered.body, lowered.ret);

                Lambda::Allocate {
                    kind: crate::clam::term::AllocKind::Struct,
                    tid,
                    fields: caps.iter().map(|(id, _)| Lambda::var(*id)).collect(),
                }
            }
        }
    }

    /// Escaping function: abstract interface, concrete capture record, code
    /// item receiving the environment abstractly.
    fn lower_escaping(
        &mut self,
        name: Spur,
        func: &FnLit,
        fvs: &FreeVarMap,
        self_name: Option<Ident>,
    ) -> ClosureAlloc {
        let param_tys: Vec<CoreType> = func.params.iter().map(|p| p.ty.clone()).collect();
        let sig = self.types.fn_sig(self.env, &param_tys, &func.ret_ty, None);
        let abs_tid = self.types.abstract_closure(sig);

        let env_id = self.idgen.fresh("env");
        let env_param = LParam { name: env_id, ty: LowType::Ref(abs_tid) };
        let addr = self.addrgen.fresh(name);

        if fvs.is_empty() {
            let tid = self.types.closure_tid(abs_tid, vec![]);
            let prologue = match self_name {
                Some(self_id) => vec![(self_id, Lambda::var(env_id))],
                None => vec![],
            };
            let lowered =
                self.lower_fn_with(func, Some(env_param), prologue, FrameState::InClosureBody);
            self.push_code_item(addr, lowered.params, lowered.body, lowered.ret);
            return ClosureAlloc {
                captures: vec![],
                address: ClosureAddress::Normal(addr),
                tid,
            };
        }

        let caps: Vec<(Ident, LowType)> = {
            let fvs = fvs.clone();
            fvs.iter()
                .map(|(id, ty)| (*id, self.lower_ty(ty)))
                .collect()
        };
        let cap_lows: Vec<_> = caps.iter().map(|(_, t)| *t).collect();
        let concrete_tid = self.types.closure_tid(abs_tid, cap_lows);

        let env_cast = self.idgen.fresh("env.c");
        let mut prologue = vec![(
            env_cast,
            Lambda::Cast {
                expr: Box::new(Lambda::var(env_id)),
                target_ty: LowType::Ref(concrete_tid),
            },
        )];
        if let Some(self_id) = self_name {
            prologue.push((self_id, Lambda::var(env_id)));
        }
        for (i, (fv, low)) in caps.iter().enumerate() {
            prologue.push((
                *fv,
                non_null_read(
                    *low,
                    Lambda::ClosureField {
                        obj: Box::new(Lambda::var(env_cast)),
                        tid: concrete_tid,
                        index: i,
                    },
                ),
            ));
        }
        let lowered =
            self.lower_fn_with(func, Some(env_param), prologue, FrameState::InClosureBody);
        self.push_code_item(addr, lowered.params, lowered.body, lowered.ret);

        ClosureAlloc {
            captures: caps.iter().map(|(id, _)| *id).collect(),
            address: ClosureAddress::Normal(addr),
            tid: concrete_tid,
        }
    }

    /// A genuinely mutually recursive bundle.
    fn lower_bundle(&mut self, members: &[&(Binder, FnLit)]) -> (Vec<Ident>, Vec<ClosureAlloc>) {
        let member_ids: Vec<Ident> = members.iter().map(|(b, _)| b.id).collect();
        let mut exclude = HashSet::new();
        for id in &member_ids {
            exclude.insert(*id);
        }

        // Union of the members' free variables, in member order.
        let mut union: LinkedHashMap<Ident, CoreType> = LinkedHashMap::new();
        for (_, f) in members {
            for (id, ty) in free_vars(f, &exclude) {
                union.entry(id).or_insert(ty);
            }
        }
        assert_no_mutable_captures(&union);
        let fv_ids: Vec<Ident> = union.keys().copied().collect();
        let fv_lows: Vec<LowType> = {
            let tys: Vec<CoreType> = union.values().cloned().collect();
            tys.iter().map(|t| self.lower_ty(t)).collect()
        };

        let escaping = member_ids.iter().any(|id| self.escape.contains(id));
        if escaping {
            self.lower_escaping_bundle(members, &member_ids, &fv_ids, &fv_lows)
        } else {
            self.lower_well_known_bundle(members, &member_ids, &fv_ids, &fv_lows)
        }
    }

    /// Every member is only ever called directly: one shared late-init
    /// record carries the union of captures, each member receives it as the
    /// bare environment argument.
    fn lower_well_known_bundle(
        &mut self,
        members: &[&(Binder, FnLit)],
        member_ids: &[Ident],
        fv_ids: &[Ident],
        fv_lows: &[LowType],
    ) -> (Vec<Ident>, Vec<ClosureAlloc>) {
        let shared_tid = self.types.late_init_struct_tid(fv_lows.to_vec());

        let addrs: Vec<_> = members
            .iter()
            .map(|(b, _)| self.addrgen.fresh(b.id.base_name()))
            .collect();
        for (i, (b, _)) in members.iter().enumerate() {
            self.addrs
                .insert_local(b.id, addrs[i], LocalEnv::Struct(b.id, shared_tid));
        }

        for (i, (_, f)) in members.iter().enumerate() {
            let env_id = self.idgen.fresh("env");
            let mut prologue: Vec<(Ident, Lambda)> = member_ids
                .iter()
                .map(|m| (*m, Lambda::var(env_id)))
                .collect();
            for (k, fv) in fv_ids.iter().enumerate() {
                prologue.push((
                    *fv,
                    non_null_read(
                        fv_lows[k],
                        Lambda::GetField {
                            obj: Box::new(Lambda::var(env_id)),
                            tid: shared_tid,
                            index: k,
                            kind: FieldKind::Struct,
                        },
                    ),
                ));
            }
            let env_param = LParam { name: env_id, ty: LowType::RefLazyInit(shared_tid) };
            let lowered =
                self.lower_fn_with(f, Some(env_param), prologue, FrameState::InMutRecBundle);
            self.push_code_item(addrs[i], lowered.params, lowered.body, lowered.ret);
        }

        let allocs = members
            .iter()
            .map(|_| ClosureAlloc {
                captures: fv_ids.to_vec(),
                address: ClosureAddress::WellKnownMutRec,
                tid: shared_tid,
            })
            .collect();
        (member_ids.to_vec(), allocs)
    }

    /// At least one member is first-class: every member becomes a closure
    /// over one shared late-init record holding the peers' closures first
    /// and the outer captures after them.
    fn lower_escaping_bundle(
        &mut self,
        members: &[&(Binder, FnLit)],
        member_ids: &[Ident],
        fv_ids: &[Ident],
        fv_lows: &[LowType],
    ) -> (Vec<Ident>, Vec<ClosureAlloc>) {
        let abs_tids: Vec<Tid> = members
            .iter()
            .map(|(_, f)| {
                let param_tys: Vec<CoreType> =
                    f.params.iter().map(|p| p.ty.clone()).collect();
                let sig = self.types.fn_sig(self.env, &param_tys, &f.ret_ty, None);
                self.types.abstract_closure(sig)
            })
            .collect();

        let mut shared_fields: Vec<LowType> =
            abs_tids.iter().map(|t| LowType::Ref(*t)).collect();
        shared_fields.extend_from_slice(fv_lows);
        let shared_tid = self.types.late_init_struct_tid(shared_fields);

        let concrete_tids: Vec<Tid> = abs_tids
            .iter()
            .map(|abs| self.types.closure_tid(*abs, vec![LowType::RefLazyInit(shared_tid)]))
            .collect();
        let addrs: Vec<_> = members
            .iter()
            .map(|(b, _)| self.addrgen.fresh(b.id.base_name()))
            .collect();

        for (i, (b, f)) in members.iter().enumerate() {
            let env_id = self.idgen.fresh("env");
            let env_cast = self.idgen.fresh("env.c");
            let shared = self.idgen.fresh("shared");

            let mut prologue = vec![
                (
                    env_cast,
                    Lambda::Cast {
                        expr: Box::new(Lambda::var(env_id)),
                        target_ty: LowType::Ref(concrete_tids[i]),
                    },
                ),
                (
                    shared,
                    Lambda::ClosureField {
                        obj: Box::new(Lambda::var(env_cast)),
                        tid: concrete_tids[i],
                        index: 0,
                    },
                ),
                (b.id, Lambda::var(env_id)),
            ];
            for (j, peer) in member_ids.iter().enumerate() {
                if j == i {
                    continue;
                }
                prologue.push((
                    *peer,
                    non_null_read(
                        LowType::Ref(abs_tids[j]),
                        Lambda::GetField {
                            obj: Box::new(Lambda::var(shared)),
                            tid: shared_tid,
                            index: j,
                            kind: FieldKind::Struct,
                        },
                    ),
                ));
            }
            for (k, fv) in fv_ids.iter().enumerate() {
                prologue.push((
                    *fv,
                    non_null_read(
                        fv_lows[k],
                        Lambda::GetField {
                            obj: Box::new(Lambda::var(shared)),
                            tid: shared_tid,
                            index: member_ids.len() + k,
                            kind: FieldKind::Struct,
                        },
                    ),
                ));
            }

            let env_param = LParam { name: env_id, ty: LowType::Ref(abs_tids[i]) };
            let lowered =
                self.lower_fn_with(f, Some(env_param), prologue, FrameState::InMutRecBundle);
            self.push_code_item(addrs[i], lowered.params, lowered.body, lowered.ret);
        }

        let allocs = (0..members.len())
            .map(|i| ClosureAlloc {
                captures: fv_ids.to_vec(),
                address: ClosureAddress::Normal(addrs[i]),
                tid: concrete_tids[i],
            })
            .collect();
        (member_ids.to_vec(), allocs)
    }

    fn push_code_item(
        &mut self,
        addr: crate::clam::ltype::Addr,
        params: Vec<LParam>,
        body: Lambda,
        ret: LowType,
    ) {
        self.top_items.push(TopFuncItem {
            binder: addr,
            kind: FnItemKind::TopPrivate,
            func: LFunc { params, body, return_ty: Some(ret) },
            tid: None,
        });
    }
}
