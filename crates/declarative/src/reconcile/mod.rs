//! Reconcilers - compare desired against probed state and converge
//!
//! Each task kind has one reconciler. A reconciler is built from the task's
//! parameters (resolving secrets and rendering templates up front), probes
//! the target, decides on an [`Action`], and applies it when asked.
//!
//! Every reconciler is idempotent except two:
//! - a service with `state = "restarted"` always applies;
//! - a conditional command trusts its marker path; whatever else the
//!   command does is not modelled.

mod command;
mod database;
mod file;
mod line_in_file;
mod package;
mod service;

pub use command::CommandReconciler;
pub use database::{DbCreateReconciler, DbUserGrantReconciler, Grant};
pub use file::FileTemplateReconciler;
pub use line_in_file::{LineInFileReconciler, patch_lines};
pub use package::PackageReconciler;
pub use service::{ServiceReconciler, ServiceState};

use crate::context::ApplyContext;
use crate::error::{ParamError, ProbeError, ReconcileError, TaskError};
use crate::probe::ProbedState;
use crate::transport::Transport;
use crate::types::{CommandOutput, CommandSpec, ExecuteOptions, Params, Task, TaskKind};

/// What a reconciler decided to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The target already matches; `detail` says what was observed
    NoOp { detail: String },
    /// A mutation is needed; `summary` says what it is
    Apply { summary: String },
}

impl Action {
    pub fn is_apply(&self) -> bool {
        matches!(self, Self::Apply { .. })
    }
}

/// Converges one resource kind
pub trait Reconciler: Send + Sync {
    /// Short description, e.g. `package nginx`
    fn describe(&self) -> String;

    /// Read the current state; must not mutate the target
    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError>;

    /// Decide whether a mutation is needed
    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError>;

    /// Perform the mutation decided by [`plan`](Self::plan); returns a detail line
    fn apply(
        &self,
        transport: &dyn Transport,
        probed: &ProbedState,
    ) -> Result<String, ReconcileError>;

    /// Optional unified diff of the pending change
    fn preview(&self, _probed: &ProbedState) -> Option<String> {
        None
    }
}

/// Outcome of one reconcile step, before the executor stamps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub action: Action,
    pub detail: String,
}

/// Build the reconciler for a task
pub fn for_task(task: &Task, ctx: &ApplyContext) -> Result<Box<dyn Reconciler>, TaskError> {
    let p = &task.parameters;
    Ok(match task.kind {
        TaskKind::Package => Box::new(PackageReconciler::from_params(p)?),
        TaskKind::Service => Box::new(ServiceReconciler::from_params(p)?),
        TaskKind::FileFromTemplate => Box::new(FileTemplateReconciler::from_params(p, ctx)?),
        TaskKind::LineInFile => Box::new(LineInFileReconciler::from_params(p)?),
        TaskKind::DbCreate => Box::new(DbCreateReconciler::from_params(p)?),
        TaskKind::DbUserGrant => Box::new(DbUserGrantReconciler::from_params(p, ctx)?),
        TaskKind::CommandIfAbsent => Box::new(CommandReconciler::from_params(p)?),
    })
}

/// Compare desired against probed state and, unless in check mode, apply
pub fn reconcile(
    reconciler: &dyn Reconciler,
    transport: &dyn Transport,
    probed: &ProbedState,
    options: &ExecuteOptions,
) -> Result<Reconciled, ReconcileError> {
    let action = reconciler.plan(probed)?;
    let detail = match &action {
        Action::NoOp { detail } => detail.clone(),
        Action::Apply { summary } if options.check => {
            let mut detail = format!("would {summary}");
            if options.diff
                && let Some(diff) = reconciler.preview(probed)
            {
                detail.push('\n');
                detail.push_str(&diff);
            }
            detail
        }
        Action::Apply { .. } => reconciler.apply(transport, probed)?,
    };
    Ok(Reconciled { action, detail })
}

/// Probed state did not come from this reconciler's probe
fn mismatch(expected: &str, probed: &ProbedState) -> ReconcileError {
    ReconcileError::Precondition(format!(
        "expected {expected} state, probed {}",
        probed.label()
    ))
}

fn command_failed(cmd: &CommandSpec, output: &CommandOutput) -> ReconcileError {
    ReconcileError::CommandFailed {
        command: cmd.display(),
        status: output
            .status
            .map_or_else(|| "signal".to_string(), |s| s.to_string()),
        stderr: output.stderr_str().trim().to_string(),
    }
}

/// Reject values that would be parsed as an option by the tool they go to
fn plain_name(params: &Params, key: &str) -> Result<String, ParamError> {
    let value = params.str(key)?;
    if value.is_empty() || value.starts_with('-') || value.chars().any(char::is_whitespace) {
        return Err(ParamError::Invalid {
            key: key.to_string(),
            reason: format!("{value:?} is not a valid name"),
        });
    }
    Ok(value)
}

/// Parse an octal file mode such as `0644` or `640`
fn parse_mode(params: &Params, key: &str) -> Result<Option<u32>, ParamError> {
    params
        .opt_str(key)?
        .map(|m| {
            u32::from_str_radix(m.trim_start_matches("0o"), 8)
                .ok()
                .filter(|&mode| mode <= 0o7777)
                .ok_or_else(|| ParamError::Invalid {
                    key: key.to_string(),
                    reason: format!("{m:?} is not an octal file mode"),
                })
        })
        .transpose()
}

/// Unified diff between two texts, as used in check-mode previews
fn unified_diff(path: &str, old: &str, new: &str) -> String {
    similar::TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("{path} (current)"), &format!("{path} (desired)"))
        .to_string()
}

/// Short blake3 digest for details
fn digest(content: &[u8]) -> String {
    blake3::hash(content).to_hex()[..12].to_string()
}
