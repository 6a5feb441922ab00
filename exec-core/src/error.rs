//! Errors
//!
//! Execution distinguishes two kinds of failure:
//!
//! - **Recoverable errors** are returned as `Result<_, ExecError>` from the
//!   few fallible entry points (configuration, diagnostics output).
//! - **Coding errors** are mistakes made by the caller or by a computation
//!   author: an unknown computation, a type mismatch on a connection, a
//!   required input with nothing connected. These never abort the operation
//!   in progress. They are *reported*, and the affected output is left empty.
//!
//! # Reporting
//!
//! [`report`] logs the error through `tracing` on the `exec::coding_error`
//! target and appends it to the [`ErrorSink`] of the innermost active
//! [`DiagnosticScope`] on the current thread, if any. Worker jobs enter a
//! scope for the sink of the operation they belong to, so errors raised on
//! pool threads reach the system that owns them.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::esf::ScenePath;
use crate::value::ValueType;

/// Errors produced by execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("no computation '{computation}' is registered for provider {provider}")]
    UnknownComputation {
        provider: ScenePath,
        computation: String,
    },

    #[error("no scene object at {0}")]
    InvalidProvider(ScenePath),

    #[error("invalid scene edit: {0}")]
    InvalidSceneEdit(String),

    #[error("computation '{computation}' cannot be provided by {provider}: {reason}")]
    UnsupportedProvider {
        provider: ScenePath,
        computation: String,
        reason: String,
    },

    #[error("metadata key '{key}' is not valid on {provider}")]
    InvalidMetadataKey { provider: ScenePath, key: String },

    #[error("cannot determine the result type of '{computation}' on {provider}")]
    UnknownResultType {
        provider: ScenePath,
        computation: String,
    },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("node '{node}' is missing a value for required input '{input}'")]
    MissingRequiredInput { node: String, input: String },

    #[error("'{0}' requires a journal")]
    NullJournal(&'static str),

    #[error("'{0}' requires a program")]
    NullProgram(&'static str),

    #[error("cycle of {0} nodes has no speculation node and cannot be evaluated")]
    UnbrokenCycle(usize),

    #[error("invalid value key: {0}")]
    InvalidValueKey(String),

    #[error("computation '{name}' is already registered for schema '{schema}'")]
    DuplicateRegistration { schema: String, name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(err: serde_json::Error) -> Self {
        ExecError::InvalidConfig(err.to_string())
    }
}

/// Result type for fallible execution operations.
pub type Result<T> = std::result::Result<T, ExecError>;

/// A shared, thread-safe collection of reported errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorSink {
    errors: Arc<Mutex<Vec<ExecError>>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: ExecError) {
        self.errors.lock().push(err);
    }

    /// Remove and return every collected error.
    pub fn take(&self) -> Vec<ExecError> {
        std::mem::take(&mut *self.errors.lock())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<ErrorSink>> = const { RefCell::new(Vec::new()) };
}

/// Guard routing [`report`]ed errors on this thread to a sink.
///
/// Scopes nest; the innermost wins. The scope is exited when the guard is
/// dropped, even during unwinding.
pub struct DiagnosticScope {
    sink: ErrorSink,
}

impl DiagnosticScope {
    pub fn enter(sink: ErrorSink) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(sink.clone()));
        Self { sink }
    }

    pub fn is_active() -> bool {
        SCOPE_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The sink of the innermost scope.
    pub fn current() -> Option<ErrorSink> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for DiagnosticScope {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(sink) = popped {
                debug_assert!(
                    Arc::ptr_eq(&sink.errors, &self.sink.errors),
                    "DiagnosticScope mismatch"
                );
            }
        });
    }
}

/// Report a coding error. See the [module docs](self).
pub fn report(err: ExecError) {
    tracing::error!(target: "exec::coding_error", error = %err, "coding error");
    if let Some(sink) = DiagnosticScope::current() {
        sink.push(err);
    }
}
