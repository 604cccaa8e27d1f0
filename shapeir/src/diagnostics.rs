//! Diagnostics emitted by the verifier and the refinement passes.
//!
//! A [`DiagnosticHandler`] is created per top-level call and collects every
//! diagnostic reported while that call runs. Emitting returns [`Reported`],
//! a marker error that lets passes bail out with `?` once the reason has
//! been recorded. The collected diagnostics are finally drained into a
//! [`Transcript`] carried by the error returned to the caller.
use thiserror::Error;

use crate::modules::{operation::Operation, value::Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// Classification of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// The program is malformed: bad operands, attributes, types or structure.
    Structural,
    /// A shape assertion evaluated to false.
    AssertionViolated,
    /// Dynamic shapes or shape assertions survived refinement.
    ResidualState,
}

/// A located message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: Location,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Structural error at `location`.
    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Error,
            kind: DiagnosticKind::Structural,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Structural error about `op`, prefixed with `'<op name>' op`.
    pub fn op_error(op: &Operation, message: impl std::fmt::Display) -> Self {
        Self::error(op.location, format!("'{}' op {}", op.name(), message))
    }

    pub fn with_kind(mut self, kind: DiagnosticKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", self.location, severity, self.message)?;
        for note in &self.notes {
            write!(f, "\n{}: note: {}", self.location, note)?;
        }
        Ok(())
    }
}

/// Marker returned once a failure has been recorded in a [`DiagnosticHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("failure reported through diagnostics")]
pub struct Reported;

/// Collects diagnostics for the duration of one top-level call.
#[derive(Debug, Default)]
pub struct DiagnosticHandler {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    pub fn emit(&mut self, diagnostic: Diagnostic) -> Reported {
        log::debug!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
        Reported
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Drain every collected diagnostic into a transcript.
    pub fn take(&mut self) -> Transcript {
        Transcript(std::mem::take(&mut self.diagnostics))
    }
}

/// Ordered list of diagnostics, rendered one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript(pub Vec<Diagnostic>);

impl Transcript {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if any diagnostic message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|d| d.message.contains(needle))
    }
}

impl std::fmt::Display for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::operation::OpKind;

    #[test]
    fn op_error_prefixes_operation_name() {
        let op = Operation::new(OpKind::Add, vec![], vec![])
            .with_location(Location::LineCol { line: 3, column: 5 });
        let diagnostic = Diagnostic::op_error(&op, "has dynamic shapes");
        assert_eq!(
            diagnostic.to_string(),
            "loc(3:5): error: 'stablehlo.add' op has dynamic shapes"
        );
    }

    #[test]
    fn handler_drains_into_transcript() {
        let mut handler = DiagnosticHandler::new();
        handler.emit(Diagnostic::error(Location::Unknown, "first"));
        handler.emit(
            Diagnostic::error(Location::Unknown, "second").with_note("more context"),
        );
        assert!(handler.has_errors());

        let transcript = handler.take();
        assert!(handler.is_empty());
        assert_eq!(
            transcript.to_string(),
            "loc(unknown): error: first\nloc(unknown): error: second\nloc(unknown): note: more context"
        );
        assert!(transcript.mentions("second"));
    }
}
