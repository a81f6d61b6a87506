//! Fact probes - read-only queries of a target's current state
//!
//! Probes never mutate the target. A resource that is legitimately absent
//! is a valid [`ProbedState`]; only failures to ask (unreachable host,
//! permission denied, uninterpretable output) are [`ProbeError`]s.

use crate::error::ProbeError;
use crate::transport::{FileFacts, Transport};
use crate::types::{CommandOutput, CommandSpec};

/// Current state of one task's target resource, recomputed every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbedState {
    Package {
        manager: PackageManager,
        installed_version: Option<String>,
    },
    Service {
        active: bool,
        /// Only probed when the task declares `enabled`
        enabled: Option<bool>,
    },
    File {
        facts: Option<FileFacts>,
    },
    Database {
        exists: bool,
    },
    DatabaseUser {
        exists: bool,
    },
    Marker {
        exists: bool,
    },
}

impl ProbedState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Package { .. } => "package",
            Self::Service { .. } => "service",
            Self::File { .. } => "file",
            Self::Database { .. } => "database",
            Self::DatabaseUser { .. } => "database user",
            Self::Marker { .. } => "marker",
        }
    }
}

fn unexpected(cmd: &CommandSpec, output: &CommandOutput) -> ProbeError {
    ProbeError::Unexpected {
        command: cmd.display(),
        message: format!(
            "exit {}: {}",
            output
                .status
                .map_or_else(|| "signal".to_string(), |s| s.to_string()),
            output.stderr_str().trim()
        ),
    }
}

// ============================================================================
// Packages
// ============================================================================

/// Package manager on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
}

impl PackageManager {
    pub fn parse(name: &str) -> Option<Option<Self>> {
        match name {
            "auto" => Some(None),
            "apt" => Some(Some(Self::Apt)),
            "dnf" | "yum" => Some(Some(Self::Dnf)),
            _ => None,
        }
    }

    /// Pick apt when `dpkg-query` exists, else dnf when `rpm` exists
    pub fn detect(transport: &dyn Transport) -> Result<Self, ProbeError> {
        if transport.command_exists("dpkg-query")? {
            Ok(Self::Apt)
        } else if transport.command_exists("rpm")? {
            Ok(Self::Dnf)
        } else {
            Err(ProbeError::Unexpected {
                command: "package manager detection".to_string(),
                message: "neither dpkg-query nor rpm found on target".to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
        }
    }

    /// Installed version, or `None` when the package is absent
    pub fn installed_version(
        &self,
        transport: &dyn Transport,
        name: &str,
    ) -> Result<Option<String>, ProbeError> {
        match self {
            Self::Apt => {
                let cmd = CommandSpec::new("dpkg-query").args([
                    "-W",
                    "-f=${Status}\t${Version}",
                    name,
                ]);
                let output = transport.exec(&cmd)?;
                match output.status {
                    Some(0) => {
                        let stdout = output.stdout_str();
                        let (status, version) = stdout
                            .split_once('\t')
                            .unwrap_or((stdout.as_str(), ""));
                        if status.ends_with(" installed") && !version.is_empty() {
                            Ok(Some(version.trim().to_string()))
                        } else {
                            Ok(None)
                        }
                    }
                    // dpkg-query exits 1 for unknown packages
                    Some(1) => Ok(None),
                    _ => Err(unexpected(&cmd, &output)),
                }
            }
            Self::Dnf => {
                let cmd = CommandSpec::new("rpm").args([
                    "-q",
                    "--qf",
                    "%{VERSION}-%{RELEASE}",
                    name,
                ]);
                let output = transport.exec(&cmd)?;
                match output.status {
                    Some(0) => Ok(Some(output.stdout_str().trim().to_string())),
                    Some(1) => Ok(None),
                    _ => Err(unexpected(&cmd, &output)),
                }
            }
        }
    }
}

// ============================================================================
// Services
// ============================================================================

/// `systemctl is-active`
pub fn service_active(transport: &dyn Transport, name: &str) -> Result<bool, ProbeError> {
    let cmd = CommandSpec::new("systemctl").args(["is-active", name]);
    let output = transport.exec(&cmd)?;
    if output.success() {
        return Ok(true);
    }
    // Non-zero with a state word on stdout means "not active"; an empty
    // stdout means systemctl itself failed (no bus, no permission)
    match output.stdout_str().trim() {
        "" => Err(unexpected(&cmd, &output)),
        _ => Ok(false),
    }
}

/// `systemctl is-enabled`
pub fn service_enabled(transport: &dyn Transport, name: &str) -> Result<bool, ProbeError> {
    let cmd = CommandSpec::new("systemctl").args(["is-enabled", name]);
    let output = transport.exec(&cmd)?;
    match output.stdout_str().trim() {
        "enabled" | "enabled-runtime" | "alias" | "static" | "indirect" => Ok(true),
        "" => Err(unexpected(&cmd, &output)),
        _ => Ok(false),
    }
}

// ============================================================================
// Files and markers
// ============================================================================

pub fn file(transport: &dyn Transport, path: &str) -> Result<ProbedState, ProbeError> {
    Ok(ProbedState::File {
        facts: transport.read_file(path)?,
    })
}

pub fn marker(transport: &dyn Transport, path: &str) -> Result<ProbedState, ProbeError> {
    Ok(ProbedState::Marker {
        exists: transport.path_exists(path)?,
    })
}

// ============================================================================
// MySQL
// ============================================================================

/// Invokes the `mysql` client on the target; statements go through stdin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MysqlClient {
    pub login_user: Option<String>,
}

impl MysqlClient {
    pub fn command(&self) -> CommandSpec {
        let cmd = CommandSpec::new("mysql").args(["-N", "-B"]);
        match &self.login_user {
            Some(user) => cmd.arg("-u").arg(user.clone()),
            None => cmd,
        }
    }

    /// Run a read-only query and return its tab-separated output
    pub fn query(&self, transport: &dyn Transport, sql: &str) -> Result<String, ProbeError> {
        let cmd = self.command().stdin(sql);
        let output = transport.exec(&cmd)?;
        if output.success() {
            Ok(output.stdout_str())
        } else {
            Err(unexpected(&cmd, &output))
        }
    }

    pub fn database_exists(
        &self,
        transport: &dyn Transport,
        name: &str,
    ) -> Result<bool, ProbeError> {
        let sql = format!(
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = {};",
            sql_literal(name)
        );
        Ok(!self.query(transport, &sql)?.trim().is_empty())
    }

    pub fn user_exists(
        &self,
        transport: &dyn Transport,
        user: &str,
        host: &str,
    ) -> Result<bool, ProbeError> {
        let sql = format!(
            "SELECT COUNT(*) FROM mysql.user WHERE User = {} AND Host = {};",
            sql_literal(user),
            sql_literal(host)
        );
        let out = self.query(transport, &sql)?;
        let count: u64 = out.trim().parse().map_err(|_| ProbeError::Unexpected {
            command: "mysql user lookup".to_string(),
            message: format!("expected a count, got {:?}", out.trim()),
        })?;
        Ok(count > 0)
    }
}

/// Quote a string literal for MySQL
pub fn sql_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Whether `name` is a plain MySQL identifier (safe to backtick-quote)
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
