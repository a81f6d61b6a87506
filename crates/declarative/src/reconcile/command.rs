//! Run a command unless its marker path exists
//!
//! The marker is the only state this reconciler looks at. The command
//! itself must be safe to have run: anything it does beyond creating the
//! marker (unpacking an archive, seeding data) is not tracked.

use super::{Action, Reconciler, command_failed, mismatch};
use crate::error::{ParamError, ProbeError, ReconcileError};
use crate::probe::{self, ProbedState};
use crate::transport::Transport;
use crate::types::{CommandSpec, Params};

/// Parameters: `command` (shell line), `creates` (marker path),
/// optional `chdir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReconciler {
    pub command: String,
    pub creates: String,
    pub chdir: Option<String>,
}

impl CommandReconciler {
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let command = params.str("command")?;
        if command.trim().is_empty() {
            return Err(ParamError::Invalid {
                key: "command".to_string(),
                reason: "empty command".to_string(),
            });
        }
        Ok(Self {
            command,
            creates: params.str("creates")?,
            chdir: params.opt_str("chdir")?,
        })
    }
}

impl Reconciler for CommandReconciler {
    fn describe(&self) -> String {
        format!("command (creates {})", self.creates)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        probe::marker(transport, &self.creates)
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::Marker { exists } = probed else {
            return Err(mismatch("marker", probed));
        };
        Ok(if *exists {
            Action::NoOp {
                detail: format!("{} exists, skipped", self.creates),
            }
        } else {
            Action::Apply {
                summary: format!("run `{}`", self.command),
            }
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        _probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        let mut cmd = CommandSpec::shell(&self.command);
        if let Some(dir) = &self.chdir {
            cmd = cmd.cwd(dir.clone());
        }

        let output = transport.exec(&cmd)?;
        if !output.success() {
            return Err(command_failed(&cmd, &output));
        }

        if !transport.path_exists(&self.creates)? {
            log::warn!(
                "`{}` succeeded but did not create {}",
                self.command,
                self.creates
            );
            return Ok(format!(
                "ran `{}`; {} still absent",
                self.command, self.creates
            ));
        }
        Ok(format!("ran `{}`", self.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn unpack() -> CommandReconciler {
        CommandReconciler::from_params(
            &Params::new()
                .with("command", "tar xzf /tmp/wordpress.tgz")
                .with("creates", "/var/www/wordpress/index.php")
                .with("chdir", "/var/www"),
        )
        .unwrap()
    }

    #[test]
    fn test_runs_when_marker_absent() {
        let t = MockTransport::new();
        let r = unpack();
        let probed = r.probe(&t).unwrap();
        assert!(r.plan(&probed).unwrap().is_apply());

        let detail = r.apply(&t, &probed).unwrap();
        assert!(detail.contains("still absent"));
        let cmd = t.executed().pop().unwrap();
        assert_eq!(cmd.display(), "sh -c tar xzf /tmp/wordpress.tgz");
        assert_eq!(cmd.cwd.as_deref(), Some("/var/www"));
    }

    #[test]
    fn test_skips_when_marker_present() {
        let t = MockTransport::new();
        t.put_file("/var/www/wordpress/index.php", "<?php");
        let r = unpack();
        let probed = r.probe(&t).unwrap();
        assert_eq!(
            r.plan(&probed).unwrap(),
            Action::NoOp {
                detail: "/var/www/wordpress/index.php exists, skipped".into()
            }
        );
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let t = MockTransport::new();
        t.respond_err("sh -c tar", 2, "tar: /tmp/wordpress.tgz: Cannot open");
        let r = unpack();
        let probed = r.probe(&t).unwrap();
        assert!(matches!(
            r.apply(&t, &probed),
            Err(ReconcileError::CommandFailed { .. })
        ));
    }
}
