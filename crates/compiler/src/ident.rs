use std::fmt;

use lasso::Spur;

use crate::{INTERNER, intern};

/// An identifier with its provenance.
///
/// `Local` and `Mutable` are stamped: every binding site mints a fresh stamp,
/// so shadowing never aliases and lowered output is reproducible without any
/// pointer identity. `Qualified` and `Method` name globals; they are never
/// free in a function and never captured.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ident {
    Local { name: Spur, stamp: u32 },
    Mutable { name: Spur, stamp: u32 },
    Qualified { pkg: Spur, name: Spur },
    Method { type_name: Spur, name: Spur },
}

impl Ident {
    pub fn is_global(&self) -> bool {
        matches!(self, Ident::Qualified { .. } | Ident::Method { .. })
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self, Ident::Mutable { .. })
    }

    pub fn base_name(&self) -> Spur {
        match self {
            Ident::Local { name, .. }
            | Ident::Mutable { name, .. }
            | Ident::Qualified { name, .. }
            | Ident::Method { name, .. } => *name,
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ident::Local { name, stamp } => {
                write!(f, "{}/{}", INTERNER.resolve(name), stamp)
            }
            Ident::Mutable { name, stamp } => {
                write!(f, "{}!/{}", INTERNER.resolve(name), stamp)
            }
            Ident::Qualified { pkg, name } => {
                write!(f, "{}.{}", INTERNER.resolve(pkg), INTERNER.resolve(name))
            }
            Ident::Method { type_name, name } => {
                write!(
                    f,
                    "{}::{}",
                    INTERNER.resolve(type_name),
                    INTERNER.resolve(name)
                )
            }
        }
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// A loop label. Stamped like locals so nested loops with the same surface
/// name stay distinct.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub name: Spur,
    pub stamp: u32,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", INTERNER.resolve(&self.name), self.stamp)
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Deterministic mint for identifiers and labels. One generator is threaded
/// through a whole translation; equal inputs therefore produce equal stamps.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u32,
}

impl IdGen {
    pub fn new() -> Self {
        IdGen { next: 0 }
    }

    /// Start minting above the given stamp. Used when the front end already
    /// numbered the identifiers of the input program.
    pub fn starting_from(next: u32) -> Self {
        IdGen { next }
    }

    fn bump(&mut self) -> u32 {
        let stamp = self.next;
        self.next += 1;
        stamp
    }

    pub fn fresh(&mut self, name: &str) -> Ident {
        Ident::Local {
            name: intern(name),
            stamp: self.bump(),
        }
    }

    pub fn fresh_mut(&mut self, name: &str) -> Ident {
        Ident::Mutable {
            name: intern(name),
            stamp: self.bump(),
        }
    }

    /// A fresh local reusing another identifier's surface name.
    pub fn derived(&mut self, of: &Ident) -> Ident {
        Ident::Local {
            name: of.base_name(),
            stamp: self.bump(),
        }
    }

    pub fn fresh_label(&mut self, name: &str) -> Label {
        Label {
            name: intern(name),
            stamp: self.bump(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_distinct_and_deterministic() {
        let mut idg = IdGen::new();
        let a = idg.fresh("x");
        let b = idg.fresh("x");
        assert_ne!(a, b);

        let mut idg2 = IdGen::new();
        assert_eq!(a, idg2.fresh("x"));
        assert_eq!(b, idg2.fresh("x"));
    }

    #[test]
    fn globals_are_global() {
        let q = Ident::Qualified {
            pkg: intern("list"),
            name: intern("map"),
        };
        let m = Ident::Method {
            type_name: intern("Show"),
            name: intern("show"),
        };
        assert!(q.is_global());
        assert!(m.is_global());

        let mut idg = IdGen::new();
        assert!(!idg.fresh("x").is_global());
        assert!(idg.fresh_mut("x").is_mutable());
    }

    #[test]
    fn display_shows_provenance() {
        let mut idg = IdGen::new();
        let x = idg.fresh("acc");
        assert_eq!(format!("{x}"), "acc/0");
    }
}
