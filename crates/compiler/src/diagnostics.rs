//! Programmer-facing diagnostics.
//!
//! The lowering itself treats its input as checked and aborts on invariant
//! violations; the diagnostics here carry the structured source errors the
//! front-end phases feed through this crate. They are plain data until a
//! report is rendered.

use ariadne::{Label, Report, ReportKind};

use crate::source::{SourceId, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagKind {
    DuplicateTvar { name: String },
    InvalidInitOrMain { message: String },
    ReservedTypeName { name: String },
    TraitDuplicateMethod { trait_name: String, method: String },
    ConstrNoMutPositionalField,
    BadRangePatternOperand,
    UnusedVariable { name: String },
    Other { message: String },
}

impl DiagKind {
    pub fn message(&self) -> String {
        match self {
            DiagKind::DuplicateTvar { name } => {
                format!("duplicate type variable `{name}`")
            }
            DiagKind::InvalidInitOrMain { message } => message.clone(),
            DiagKind::ReservedTypeName { name } => {
                format!("`{name}` is a reserved type name")
            }
            DiagKind::TraitDuplicateMethod { trait_name, method } => {
                format!("trait `{trait_name}` declares method `{method}` twice")
            }
            DiagKind::ConstrNoMutPositionalField => {
                "constructor positional fields cannot be mutable".to_string()
            }
            DiagKind::BadRangePatternOperand => {
                "range pattern operands must be constants".to_string()
            }
            DiagKind::UnusedVariable { name } => format!("unused variable `{name}`"),
            DiagKind::Other { message } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagKind,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics { items: Vec::new() }
    }

    pub fn add_error(&mut self, kind: DiagKind, span: Span) {
        self.items.push(Diagnostic {
            severity: Severity::Error,
            kind,
            span,
        });
    }

    pub fn add_warning(&mut self, kind: DiagKind, span: Span) {
        self.items.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            span,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.items
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    /// Render every accumulated diagnostic into an ariadne report.
    pub fn build_reports(&self) -> Vec<Report<'static, Span>> {
        self.items
            .iter()
            .map(|d| {
                let kind = match d.severity {
                    Severity::Error => ReportKind::Error,
                    Severity::Warning => ReportKind::Warning,
                };
                Report::build(kind, d.span)
                    .with_message(d.kind.message())
                    .with_label(Label::new(d.span).with_message(d.kind.message()))
                    .finish()
            })
            .collect()
    }
}

/// Convenience span for diagnostics raised without a position.
pub fn no_span() -> Span {
    Span::new(None::<SourceId>, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_in_order() {
        let mut diags = Diagnostics::new();
        diags.add_warning(
            DiagKind::UnusedVariable {
                name: "x".to_string(),
            },
            Span::default(),
        );
        assert!(!diags.has_errors());

        diags.add_error(
            DiagKind::DuplicateTvar {
                name: "T".to_string(),
            },
            Span::default(),
        );
        assert!(diags.has_errors());
        assert_eq!(diags.items().len(), 2);
        assert_eq!(diags.items()[0].severity, Severity::Warning);
    }

    #[test]
    fn builds_one_report_per_diagnostic() {
        let mut diags = Diagnostics::new();
        diags.add_error(DiagKind::BadRangePatternOperand, Span::default());
        diags.add_error(DiagKind::ConstrNoMutPositionalField, Span::default());
        assert_eq!(diags.build_reports().len(), 2);
    }
}
