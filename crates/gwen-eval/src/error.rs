//! Runtime error type with source-location tracking.
//!
//! [`EvalError`] pairs a closed [`ErrorKind`] with a message and an
//! optional [`SourceRef`] so the CLI and reporters can display precise
//! locations for runtime failures. Use the [`bail_eval!`] macro (or
//! [`EvalError::new`]) to construct these inside the engine; the outer
//! [`anyhow::Error`] wrapper is preserved so call-sites keep using
//! `Result<T>` without changing every signature.

use std::fmt;

use gwen_syntax::SourceRef;

/// The closed set of failure kinds recognised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    InvalidTag,
    UndefinedStep,
    RecursiveStepDef,
    Ambiguous,
    DataTable,
    UnboundAttribute,
    UnboundBinding,
    MissingJsArgument,
    JsExecution,
    SysprocExecution,
    Io,
    Interpolation,
    /// A hard assertion failure; short-circuits sibling steps.
    AssertionHard,
    /// A soft assertion failure; recorded as Sustained.
    AssertionSoft,
    Disabled,
    Interrupted,
    Internal,
}

impl ErrorKind {
    /// True for either assertion flavour.
    pub fn is_assertion(&self) -> bool {
        matches!(self, ErrorKind::AssertionHard | ErrorKind::AssertionSoft)
    }

    /// Kinds that do not skip the remaining steps of a scenario.
    pub fn is_soft(&self) -> bool {
        matches!(self, ErrorKind::AssertionSoft)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::InvalidTag => "invalid tag",
            ErrorKind::UndefinedStep => "undefined step",
            ErrorKind::RecursiveStepDef => "recursive step definition",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::DataTable => "data table error",
            ErrorKind::UnboundAttribute => "unbound attribute",
            ErrorKind::UnboundBinding => "unbound binding",
            ErrorKind::MissingJsArgument => "missing JS argument",
            ErrorKind::JsExecution => "JavaScript error",
            ErrorKind::SysprocExecution => "system process error",
            ErrorKind::Io => "I/O error",
            ErrorKind::Interpolation => "interpolation error",
            ErrorKind::AssertionHard => "assertion failed",
            ErrorKind::AssertionSoft => "assertion failed (soft)",
            ErrorKind::Disabled => "disabled",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{}", label)
    }
}

/// A runtime evaluation error carrying its kind and origin.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: ErrorKind,
    /// Human-readable error description.
    pub message: String,
    /// Source location where the error originated (if available).
    pub source_ref: Option<SourceRef>,
}

impl EvalError {
    /// Creates a new evaluation error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_ref: None,
        }
    }

    /// Creates a new evaluation error located at a node.
    pub fn at(kind: ErrorKind, message: impl Into<String>, source_ref: &SourceRef) -> Self {
        Self {
            kind,
            message: message.into(),
            source_ref: Some(source_ref.clone()),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EvalError {}

/// The kind of an error that crossed an `anyhow` boundary, defaulting
/// to [`ErrorKind::Internal`] for foreign errors.
pub fn kind_of(error: &anyhow::Error) -> ErrorKind {
    error
        .downcast_ref::<EvalError>()
        .map(|e| e.kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Bail out of a function with an [`EvalError`] of the given kind.
///
/// # Usage
/// ```ignore
/// bail_eval!(ErrorKind::UnboundBinding, "'{}' is not bound", name);
/// ```
#[macro_export]
macro_rules! bail_eval {
    ($kind:expr, $($arg:tt)*) => {
        return Err(anyhow::anyhow!($crate::error::EvalError::new(
            $kind,
            format!($($arg)*),
        )))
    };
}
