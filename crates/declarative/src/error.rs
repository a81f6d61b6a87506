//! Error taxonomy for planning and executing a run.
//!
//! Graph errors are fatal before execution starts. Every other error is
//! scoped to a single task: the executor catches it at the task boundary
//! and records a `Failed` outcome.

use thiserror::Error;

/// Errors detected while building the execution plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two tasks share a name
    #[error("duplicate task name: {name}")]
    DuplicateTask { name: String },

    /// A `depends_on` entry names a task that is not in the run
    #[error("task {task} depends on unknown task {missing}")]
    UnknownDependency { task: String, missing: String },

    /// The dependency graph contains a cycle
    #[error("cyclic dependency between tasks: {}", cycle_path(.involved_tasks))]
    CyclicDependency { involved_tasks: Vec<String> },
}

fn cycle_path(tasks: &[String]) -> String {
    match tasks.first() {
        Some(first) => format!("{} -> {first}", tasks.join(" -> ")),
        None => String::new(),
    }
}

/// Errors raised by a connection transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The target host could not be reached
    #[error("target {target} unreachable: {message}")]
    Unreachable { target: String, message: String },

    /// The target refused access to a path or command
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// A transport-level command exited non-zero
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Map an IO error, surfacing permission problems as their own variant
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                message: path.to_string(),
            }
        } else {
            Self::Io(err)
        }
    }
}

/// Errors raised while reading the current state of a target
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe failed: {0}")]
    Transport(#[from] TransportError),

    /// The probe ran but its output could not be interpreted
    #[error("unexpected probe output from `{command}`: {message}")]
    Unexpected { command: String, message: String },
}

/// Errors raised while applying a mutation
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("apply failed: {0}")]
    Transport(#[from] TransportError),

    /// The mutating command exited non-zero
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The desired state cannot be reached from the probed state
    #[error("{0}")]
    Precondition(String),
}

/// Errors raised while rendering a template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template references a variable absent from the mapping
    #[error("template references undefined variable `{missing_key}`")]
    MissingKey { missing_key: String },

    /// The template does not parse
    #[error("invalid template: {message}")]
    Syntax { message: String },

    /// Rendering failed for another reason (bad filter, undefined attribute)
    #[error("template rendering failed: {message}")]
    Render { message: String },
}

/// A secret or credential reference could not be resolved.
///
/// Displays only the parameter that carried the reference: neither the
/// reference nor any secret value appears in the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not resolve secret for `{parameter}`: {reason}")]
pub struct SecretResolutionError {
    pub parameter: String,
    pub reason: SecretFailure,
}

/// Why a secret could not be resolved; carries no reference text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SecretFailure {
    #[error("unsupported reference scheme")]
    UnsupportedScheme,
    #[error("referenced value is not set")]
    NotFound,
    #[error("referenced value is empty")]
    Empty,
    #[error("referenced source is unreadable")]
    Unreadable,
}

/// Task parameters are missing or malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("missing required parameter `{key}`")]
    Missing { key: String },

    #[error("invalid parameter `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// Any error scoped to a single task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Secret(#[from] SecretResolutionError),
}

/// Errors that prevent a run from starting at all
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to create thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<TransportError> for TaskError {
    fn from(err: TransportError) -> Self {
        Self::Reconcile(ReconcileError::Transport(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_tasks() {
        let err = GraphError::CyclicDependency {
            involved_tasks: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency between tasks: a -> b -> a");
    }

    #[test]
    fn test_secret_error_message_has_no_reference() {
        let err = SecretResolutionError {
            parameter: "password_ref".into(),
            reason: SecretFailure::NotFound,
        };
        let msg = err.to_string();
        assert!(msg.contains("password_ref"));
        assert!(msg.contains("not set"));
    }

    #[test]
    fn test_permission_denied_io_is_classified() {
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            TransportError::from_io(io, "/etc/shadow"),
            TransportError::PermissionDenied { .. }
        ));
    }

    #[test]
    fn test_missing_key_message_names_variable() {
        let err = TemplateError::MissingKey {
            missing_key: "db_host".into(),
        };
        assert_eq!(err.to_string(), "template references undefined variable `db_host`");
    }
}
