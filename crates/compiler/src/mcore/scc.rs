//! Recursive-binding group analysis.
//!
//! A `letrec` bundle arrives flat; most bundles are not actually mutually
//! recursive. Splitting them into minimal groups lets closure lowering use
//! the cheap non-recursive path wherever possible. Groups come out in
//! dependency order: later groups may refer to earlier ones.

use im::HashSet;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::mcore::{
    free_vars::free_vars,
    term::{Binder, FnLit},
};

/// One group of a partitioned bundle, as indices into the input slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Group {
    NonRec(usize),
    Rec(Vec<usize>),
}

/// Partition simultaneously-scoped function bindings into ordered groups.
///
/// There is an edge `src -> dst` iff `dst`'s binder is free in `src`'s body.
/// Join siblings never receive edges because join applications do not count
/// the callee as free. A singleton SCC is `NonRec` only when its function
/// does not reference itself.
pub fn group_bindings(bindings: &[(Binder, FnLit)]) -> Vec<Group> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..bindings.len()).map(|i| graph.add_node(i)).collect();

    let free: Vec<_> = bindings
        .iter()
        .map(|(_, f)| free_vars(f, &HashSet::new()))
        .collect();

    let mut self_refs = vec![false; bindings.len()];
    for (src, fvs) in free.iter().enumerate() {
        for (dst, (binder, _)) in bindings.iter().enumerate() {
            if fvs.contains_key(&binder.id) {
                if src == dst {
                    self_refs[src] = true;
                }
                graph.add_edge(nodes[src], nodes[dst], ());
            }
        }
    }

    // Tarjan emits components in reverse topological order: dependencies
    // first, which is exactly the binding order we need.
    petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .map(|scc| {
            let mut members: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
            members.sort_unstable();
            if members.len() == 1 && !self_refs[members[0]] {
                Group::NonRec(members[0])
            } else {
                Group::Rec(members)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ident::IdGen,
        mcore::term::{Expr, Term},
        types::CoreType,
    };

    fn bundle(defs: Vec<(Binder, Vec<&Binder>)>) -> Vec<(Binder, FnLit)> {
        // Each function's body references the given binders in order.
        defs.into_iter()
            .map(|(binder, refs)| {
                let body = Expr::seq(
                    refs.iter()
                        .map(|r| {
                            Expr::apply(r.id, r.ty.clone(), vec![], CoreType::Int)
                        })
                        .collect(),
                    Expr::int(0),
                );
                (binder, FnLit::new(vec![], CoreType::Int, body))
            })
            .collect()
    }

    fn binder(idg: &mut IdGen, name: &str) -> Binder {
        Binder::new(idg.fresh(name), CoreType::arrow(vec![], CoreType::Int))
    }

    #[test]
    fn independent_bindings_become_nonrec_singletons() {
        let mut idg = IdGen::new();
        let f = binder(&mut idg, "f");
        let g = binder(&mut idg, "g");
        let groups = group_bindings(&bundle(vec![(f, vec![]), (g, vec![])]));
        assert_eq!(groups, vec![Group::NonRec(0), Group::NonRec(1)]);
    }

    #[test]
    fn chain_comes_out_dependency_first() {
        let mut idg = IdGen::new();
        let f = binder(&mut idg, "f");
        let g = binder(&mut idg, "g");
        // f calls g; g is standalone.
        let g2 = g.clone();
        let groups = group_bindings(&bundle(vec![(f, vec![&g2]), (g, vec![])]));
        assert_eq!(groups, vec![Group::NonRec(1), Group::NonRec(0)]);
    }

    #[test]
    fn self_reference_makes_a_rec_singleton() {
        let mut idg = IdGen::new();
        let f = binder(&mut idg, "f");
        let f2 = f.clone();
        let groups = group_bindings(&bundle(vec![(f, vec![&f2])]));
        assert_eq!(groups, vec![Group::Rec(vec![0])]);
    }

    #[test]
    fn mutual_cycle_is_one_rec_group() {
        let mut idg = IdGen::new();
        let f = binder(&mut idg, "f");
        let g = binder(&mut idg, "g");
        let h = binder(&mut idg, "h");
        let (f2, g2, h2) = (f.clone(), g.clone(), h.clone());
        // f <-> g cycle, h depends on f.
        let groups = group_bindings(&bundle(vec![
            (f, vec![&g2]),
            (g, vec![&f2]),
            (h, vec![&f2, &h2]),
        ]));
        assert_eq!(groups, vec![Group::Rec(vec![0, 1]), Group::Rec(vec![2])]);
    }
}
