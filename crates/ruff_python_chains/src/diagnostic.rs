use rustpython_ast::TextRange;
use thiserror::Error;

use crate::name::Name;

/// The one condition the analyzer cannot recover from: a node handed to
/// the import parser that isn't an `Import` or `ImportFrom` statement.
/// Every other recoverable condition (unbound names, read-before-assign,
/// syntactic misuse in annotation-like scopes) is reported as a
/// [`Diagnostic`] instead of aborting analysis.
#[derive(Debug, Error)]
pub enum ChainsError {
    #[error("unexpected node kind `{kind}` passed to the import parser")]
    UnsupportedImportNode { kind: &'static str },
}

/// The kind of recoverable issue a [`Diagnostic`] reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiagnosticKind {
    /// A read with no reaching definition, and not a builtin; also raised
    /// for a `nonlocal` declaration with no enclosing binding.
    UnboundIdentifier,
    /// A name in the scope's precomputed locals is read before any
    /// definition has been installed for it along the current path.
    ReadBeforeAssign,
    /// Walrus in a comprehension iterable, walrus rebinding an iteration
    /// variable, or a disallowed construct (walrus/yield/await, or a
    /// nested scope within a class-scope annotation) inside an
    /// annotation-like body.
    SyntaxMisuse,
    /// `nonlocal` referring to a name bound in an enclosing
    /// type-parameter (`def695`) scope, which cannot be rebound that way.
    NonlocalAnnotationScope,
}

/// A recoverable finding surfaced alongside the computed chains.
///
/// Diagnostics are data, not side effects: the analyzer never writes to a
/// stream itself, it only accumulates these so the caller decides how (or
/// whether) to render them.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub range: Option<TextRange>,
}

impl Diagnostic {
    pub(crate) fn new(kind: DiagnosticKind, message: impl Into<String>, range: Option<TextRange>) -> Self {
        let diagnostic = Self {
            kind,
            message: message.into(),
            range,
        };
        tracing::debug!(kind = ?diagnostic.kind, message = %diagnostic.message, "diagnostic emitted");
        diagnostic
    }

    pub(crate) fn unbound_identifier(name: &Name, range: Option<TextRange>) -> Self {
        Self::new(
            DiagnosticKind::UnboundIdentifier,
            format!("unbound identifier '{name}'"),
            range,
        )
    }

    pub(crate) fn read_before_assign(name: &Name, range: Option<TextRange>) -> Self {
        Self::new(
            DiagnosticKind::ReadBeforeAssign,
            format!("'{name}' may be read before it is assigned"),
            range,
        )
    }

    pub(crate) fn syntax_misuse(message: impl Into<String>, range: Option<TextRange>) -> Self {
        Self::new(DiagnosticKind::SyntaxMisuse, message, range)
    }

    pub(crate) fn nonlocal_annotation_scope(range: Option<TextRange>) -> Self {
        Self::new(
            DiagnosticKind::NonlocalAnnotationScope,
            "names defined in annotation scopes cannot be rebound with nonlocal statements",
            range,
        )
    }
}
