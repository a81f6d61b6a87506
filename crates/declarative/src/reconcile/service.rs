//! Service run-state via systemd
//!
//! `restarted` is the one state that is never idempotent: it always
//! applies, whatever the probe says.

use std::fmt;

use super::{Action, Reconciler, command_failed, mismatch, plain_name};
use crate::error::{ParamError, ProbeError, ReconcileError};
use crate::probe::{self, ProbedState};
use crate::transport::Transport;
use crate::types::{CommandSpec, Params};

/// Desired run-state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Started,
    Stopped,
    Restarted,
}

impl ServiceState {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "started" | "running" => Some(Self::Started),
            "stopped" => Some(Self::Stopped),
            "restarted" => Some(Self::Restarted),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Restarted => "restarted",
        })
    }
}

/// Parameters: `name`, `state` (`started`/`stopped`/`restarted`),
/// `enabled` (optional boot-time enablement). At least one of `state`
/// and `enabled` is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReconciler {
    pub name: String,
    pub state: Option<ServiceState>,
    pub enabled: Option<bool>,
}

impl ServiceReconciler {
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let state = params
            .opt_str("state")?
            .map(|s| {
                ServiceState::parse(&s).ok_or_else(|| ParamError::Invalid {
                    key: "state".to_string(),
                    reason: format!("expected started, stopped or restarted, found {s:?}"),
                })
            })
            .transpose()?;
        let enabled = params.opt_bool("enabled")?;
        if state.is_none() && enabled.is_none() {
            return Err(ParamError::Missing {
                key: "state".to_string(),
            });
        }
        Ok(Self {
            name: plain_name(params, "name")?,
            state,
            enabled,
        })
    }

    /// systemctl verbs needed to go from `probed` to the desired state
    fn operations(&self, active: bool, enabled: Option<bool>) -> Vec<&'static str> {
        let mut ops = Vec::new();
        match (self.state, active) {
            (Some(ServiceState::Restarted), _) => ops.push("restart"),
            (Some(ServiceState::Started), false) => ops.push("start"),
            (Some(ServiceState::Stopped), true) => ops.push("stop"),
            _ => {}
        }
        match (self.enabled, enabled) {
            (Some(true), Some(false)) => ops.push("enable"),
            (Some(false), Some(true)) => ops.push("disable"),
            _ => {}
        }
        ops
    }
}

impl Reconciler for ServiceReconciler {
    fn describe(&self) -> String {
        format!("service {}", self.name)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        let active = probe::service_active(transport, &self.name)?;
        let enabled = match self.enabled {
            Some(_) => Some(probe::service_enabled(transport, &self.name)?),
            None => None,
        };
        Ok(ProbedState::Service { active, enabled })
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        let ProbedState::Service { active, enabled } = probed else {
            return Err(mismatch("service", probed));
        };

        let ops = self.operations(*active, *enabled);
        if ops.is_empty() {
            let run = if *active { "running" } else { "stopped" };
            return Ok(Action::NoOp {
                detail: match enabled {
                    Some(true) => format!("{} {run}, enabled", self.name),
                    Some(false) => format!("{} {run}, disabled", self.name),
                    None => format!("{} {run}", self.name),
                },
            });
        }
        Ok(Action::Apply {
            summary: format!("{} {}", ops.join(" and "), self.name),
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        let ProbedState::Service { active, enabled } = probed else {
            return Err(mismatch("service", probed));
        };

        let ops = self.operations(*active, *enabled);
        for op in &ops {
            let cmd = CommandSpec::new("systemctl").args([*op, self.name.as_str()]);
            let output = transport.exec(&cmd)?;
            if !output.success() {
                return Err(command_failed(&cmd, &output));
            }
        }

        let done: Vec<&str> = ops
            .iter()
            .map(|op| match *op {
                "start" => "started",
                "stop" => "stopped",
                "restart" => "restarted",
                "enable" => "enabled",
                _ => "disabled",
            })
            .collect();
        Ok(format!("{} {}", done.join(" and "), self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn service(state: &str) -> ServiceReconciler {
        ServiceReconciler::from_params(&Params::new().with("name", "nginx").with("state", state))
            .unwrap()
    }

    #[test]
    fn test_start_then_noop() {
        let t = MockTransport::new();
        t.respond("systemctl is-active", 3, "inactive\n");
        let r = service("started");

        let probed = r.probe(&t).unwrap();
        assert!(r.plan(&probed).unwrap().is_apply());
        assert_eq!(r.apply(&t, &probed).unwrap(), "started nginx");
        assert!(
            t.executed_displays()
                .contains(&"systemctl start nginx".to_string())
        );

        t.respond("systemctl is-active", 0, "active\n");
        let probed = r.probe(&t).unwrap();
        assert_eq!(
            r.plan(&probed).unwrap(),
            Action::NoOp {
                detail: "nginx running".into()
            }
        );
    }

    #[test]
    fn test_restarted_always_applies() {
        let t = MockTransport::new().with("systemctl is-active", 0, "active\n");
        let r = service("restarted");
        for _ in 0..2 {
            let probed = r.probe(&t).unwrap();
            assert!(r.plan(&probed).unwrap().is_apply());
            assert_eq!(r.apply(&t, &probed).unwrap(), "restarted nginx");
        }
    }

    #[test]
    fn test_stopped_when_inactive_is_noop() {
        let t = MockTransport::new().with("systemctl is-active", 3, "inactive\n");
        let probed = service("stopped").probe(&t).unwrap();
        assert!(!service("stopped").plan(&probed).unwrap().is_apply());
    }

    #[test]
    fn test_enable_only() {
        let t = MockTransport::new()
            .with("systemctl is-active", 0, "active\n")
            .with("systemctl is-enabled", 1, "disabled\n");
        let r = ServiceReconciler::from_params(
            &Params::new().with("name", "mysql").with("enabled", true),
        )
        .unwrap();
        let probed = r.probe(&t).unwrap();
        assert_eq!(
            r.plan(&probed).unwrap(),
            Action::Apply {
                summary: "enable mysql".into()
            }
        );
        assert_eq!(r.apply(&t, &probed).unwrap(), "enabled mysql");
    }

    #[test]
    fn test_requires_state_or_enabled() {
        assert!(ServiceReconciler::from_params(&Params::new().with("name", "nginx")).is_err());
        assert!(
            ServiceReconciler::from_params(
                &Params::new().with("name", "nginx").with("state", "reloaded")
            )
            .is_err()
        );
    }
}
