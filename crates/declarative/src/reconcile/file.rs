//! File rendered from a template

use std::collections::BTreeMap;

use super::{Action, Reconciler, digest, mismatch, parse_mode, unified_diff};
use crate::context::ApplyContext;
use crate::error::{ParamError, ProbeError, ReconcileError, TaskError};
use crate::probe::{self, ProbedState};
use crate::template;
use crate::transport::Transport;
use crate::types::Params;

/// Renders a template and writes it to `dest` when the bytes differ
///
/// Parameters: `dest`, one of `src` (template file on the controller,
/// relative to the task file) or `content` (inline template), optional
/// `mode` (octal) and `vars` (overrides run-level variables). Without a
/// declared mode an existing file keeps its mode and ownership.
#[derive(Debug, Clone)]
pub struct FileTemplateReconciler {
    pub dest: String,
    pub rendered: Vec<u8>,
    pub mode: Option<u32>,
}

impl FileTemplateReconciler {
    pub fn from_params(params: &Params, ctx: &ApplyContext) -> Result<Self, TaskError> {
        let dest = params.str("dest")?;

        let source = match (params.opt_str("src")?, params.opt_str("content")?) {
            (Some(src), None) => {
                let path = ctx.base_dir.join(shellexpand::tilde(&src).as_ref());
                std::fs::read_to_string(&path).map_err(|e| ParamError::Invalid {
                    key: "src".to_string(),
                    reason: format!("cannot read {}: {e}", path.display()),
                })?
            }
            (None, Some(content)) => content,
            (Some(_), Some(_)) => {
                return Err(ParamError::Invalid {
                    key: "src".to_string(),
                    reason: "`src` and `content` are mutually exclusive".to_string(),
                }
                .into());
            }
            (None, None) => {
                return Err(ParamError::Missing {
                    key: "src".to_string(),
                }
                .into());
            }
        };

        let mut vars: BTreeMap<String, String> = ctx.vars.clone();
        if let Some(task_vars) = params.opt_map("vars")? {
            vars.extend(task_vars);
        }

        Ok(Self {
            dest,
            rendered: template::render(&source, &vars)?.into_bytes(),
            mode: parse_mode(params, "mode")?,
        })
    }
}

impl Reconciler for FileTemplateReconciler {
    fn describe(&self) -> String {
        format!("template {}", self.dest)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        probe::file(transport, &self.dest)
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::File { facts } = probed else {
            return Err(mismatch("file", probed));
        };

        let Some(facts) = facts else {
            return Ok(Action::Apply {
                summary: format!("create {}", self.dest),
            });
        };

        if facts.content != self.rendered {
            return Ok(Action::Apply {
                summary: format!(
                    "update {} ({} -> {})",
                    self.dest,
                    digest(&facts.content),
                    digest(&self.rendered)
                ),
            });
        }

        if let Some(mode) = self.mode
            && facts.mode.is_some_and(|current| current != mode)
        {
            return Ok(Action::Apply {
                summary: format!("set mode {mode:o} on {}", self.dest),
            });
        }

        Ok(Action::NoOp {
            detail: format!("{} up to date ({})", self.dest, digest(&self.rendered)),
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        _probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        transport.write_file(&self.dest, &self.rendered, self.mode)?;
        Ok(format!(
            "wrote {} ({} bytes, {})",
            self.dest,
            self.rendered.len(),
            digest(&self.rendered)
        ))
    }

    fn preview(&self, probed: &ProbedState) -> Option<String> {
        let ProbedState::File { facts } = probed else {
            return None;
        };
        let old = facts
            .as_ref()
            .map(|f| String::from_utf8_lossy(&f.content).to_string())
            .unwrap_or_default();
        Some(unified_diff(
            &self.dest,
            &old,
            &String::from_utf8_lossy(&self.rendered),
        ))
    }
}
