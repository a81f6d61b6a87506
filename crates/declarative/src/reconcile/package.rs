//! Package presence

use super::{Action, Reconciler, command_failed, mismatch, plain_name};
use crate::error::{ParamError, ProbeError, ReconcileError};
use crate::probe::{PackageManager, ProbedState};
use crate::transport::Transport;
use crate::types::{CommandSpec, Params};

/// Ensures a package is installed (or removed)
///
/// Parameters: `name`, `present` (default true), `manager`
/// (`apt`, `dnf` or `auto`, default `auto`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReconciler {
    pub name: String,
    pub present: bool,
    /// `None` detects the manager on the target
    pub manager: Option<PackageManager>,
}

impl PackageReconciler {
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let manager = match params.opt_str("manager")? {
            None => None,
            Some(m) => PackageManager::parse(&m).ok_or_else(|| ParamError::Invalid {
                key: "manager".to_string(),
                reason: format!("unknown package manager {m:?}"),
            })?,
        };
        Ok(Self {
            name: plain_name(params, "name")?,
            present: params.opt_bool("present")?.unwrap_or(true),
            manager,
        })
    }

    fn command(&self, manager: PackageManager) -> CommandSpec {
        match (manager, self.present) {
            (PackageManager::Apt, true) => CommandSpec::new("apt-get")
                .args(["install", "-y", "-q", &self.name])
                .env("DEBIAN_FRONTEND", "noninteractive"),
            (PackageManager::Apt, false) => CommandSpec::new("apt-get")
                .args(["remove", "-y", "-q", &self.name])
                .env("DEBIAN_FRONTEND", "noninteractive"),
            (PackageManager::Dnf, true) => {
                CommandSpec::new("dnf").args(["install", "-y", "-q", &self.name])
            }
            (PackageManager::Dnf, false) => {
                CommandSpec::new("dnf").args(["remove", "-y", "-q", &self.name])
            }
        }
    }
}

impl Reconciler for PackageReconciler {
    fn describe(&self) -> String {
        format!("package {}", self.name)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        let manager = match self.manager {
            Some(m) => m,
            None => PackageManager::detect(transport)?,
        };
        Ok(ProbedState::Package {
            manager,
            installed_version: manager.installed_version(transport, &self.name)?,
        })
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::Package {
            installed_version, ..
        } = probed
        else {
            return Err(mismatch("package", probed));
        };

        Ok(match (self.present, installed_version) {
            (true, Some(version)) => Action::NoOp {
                detail: format!("{} {} installed", self.name, version),
            },
            (false, None) => Action::NoOp {
                detail: format!("{} not installed", self.name),
            },
            (true, None) => Action::Apply {
                summary: format!("install {}", self.name),
            },
            (false, Some(_)) => Action::Apply {
                summary: format!("remove {}", self.name),
            },
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        let ProbedState::Package { manager, .. } = probed else {
            return Err(mismatch("package", probed));
        };

        let cmd = self.command(*manager);
        let output = transport.exec(&cmd)?;
        if !output.success() {
            return Err(command_failed(&cmd, &output));
        }

        let verb = if self.present { "installed" } else { "removed" };
        Ok(format!("{verb} {} via {}", self.name, manager.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn nginx() -> PackageReconciler {
        PackageReconciler::from_params(
            &Params::new().with("name", "nginx").with("manager", "apt"),
        )
        .unwrap()
    }

    #[test]
    fn test_install_then_noop() {
        let t = MockTransport::new();
        t.respond_err("dpkg-query", 1, "no packages found");
        let r = nginx();

        let probed = r.probe(&t).unwrap();
        assert_eq!(
            r.plan(&probed).unwrap(),
            Action::Apply {
                summary: "install nginx".into()
            }
        );
        let detail = r.apply(&t, &probed).unwrap();
        assert_eq!(detail, "installed nginx via apt");
        assert!(
            t.executed_displays()
                .contains(&"apt-get install -y -q nginx".to_string())
        );

        // The package manager now reports it installed
        t.respond("dpkg-query", 0, "install ok installed\t1.18.0");
        let probed = r.probe(&t).unwrap();
        assert!(matches!(r.plan(&probed).unwrap(), Action::NoOp { .. }));
    }

    #[test]
    fn test_absent_package_wanted_absent_is_noop() {
        let t = MockTransport::new();
        t.respond_err("rpm", 1, "package nginx is not installed");
        let r = PackageReconciler::from_params(
            &Params::new()
                .with("name", "nginx")
                .with("present", false)
                .with("manager", "dnf"),
        )
        .unwrap();
        let probed = r.probe(&t).unwrap();
        assert!(matches!(r.plan(&probed).unwrap(), Action::NoOp { .. }));
    }

    #[test]
    fn test_failed_install_is_reconcile_error() {
        let t = MockTransport::new();
        t.respond_err("dpkg-query", 1, "");
        t.respond_err("apt-get", 100, "E: Unable to locate package nginx");
        let r = nginx();
        let probed = r.probe(&t).unwrap();
        let err = r.apply(&t, &probed).unwrap_err();
        assert!(err.to_string().contains("Unable to locate package"));
    }

    #[test]
    fn test_unknown_manager_rejected() {
        let err = PackageReconciler::from_params(
            &Params::new().with("name", "nginx").with("manager", "pacman"),
        )
        .unwrap_err();
        assert!(matches!(err, ParamError::Invalid { .. }));
    }
}
