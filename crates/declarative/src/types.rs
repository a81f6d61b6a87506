//! Core types for declarative provisioning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::process::Output;

use crate::error::ParamError;

/// Resource kind handled by a task; selects the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Package,
    Service,
    FileFromTemplate,
    LineInFile,
    DbCreate,
    DbUserGrant,
    CommandIfAbsent,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::Service => "service",
            Self::FileFromTemplate => "file-from-template",
            Self::LineInFile => "line-in-file",
            Self::DbCreate => "db-create",
            Self::DbUserGrant => "db-user-grant",
            Self::CommandIfAbsent => "command-if-absent",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dependency declaration of a task
///
/// `Implicit` chains the task after its predecessor in declaration order.
/// `Explicit` uses exactly the given set; an empty set opts the task out
/// of the implicit chain so it can run alongside its neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DependsOn {
    #[default]
    Implicit,
    Explicit(BTreeSet<String>),
}

impl DependsOn {
    pub fn explicit<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Explicit(names.into_iter().map(Into::into).collect())
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }
}

impl Serialize for DependsOn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Implicit => serializer.serialize_none(),
            Self::Explicit(set) => serializer.serialize_some(set),
        }
    }
}

impl<'de> Deserialize<'de> for DependsOn {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let set: Option<BTreeSet<String>> = Option::deserialize(deserializer)?;
        Ok(set.map_or(Self::Implicit, Self::Explicit))
    }
}

/// How a task reports change after an Apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangePolicy {
    /// Report what the reconciler did
    #[default]
    Auto,
    /// Always report `Unchanged`, even after an Apply
    Never,
}

/// A single task parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Flag(bool),
    Number(i64),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// Scalar rendering; maps have none
    pub fn as_scalar(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Flag(b) => Some(b.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::Map(_) => None,
        }
    }
}

/// Parameters of a task, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(pub BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and programmatic callers
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Required scalar parameter
    pub fn str(&self, key: &str) -> Result<String, ParamError> {
        self.opt_str(key)?.ok_or_else(|| ParamError::Missing {
            key: key.to_string(),
        })
    }

    /// Optional scalar parameter
    pub fn opt_str(&self, key: &str) -> Result<Option<String>, ParamError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_scalar()
                .map(Some)
                .ok_or_else(|| ParamError::Invalid {
                    key: key.to_string(),
                    reason: "expected a scalar, found a mapping".to_string(),
                }),
        }
    }

    /// Optional boolean parameter; accepts `true`/`false`/`yes`/`no`
    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, ParamError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Flag(b)) => Ok(Some(*b)),
            Some(ParamValue::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(ParamError::Invalid {
                    key: key.to_string(),
                    reason: format!("expected a boolean, found {s:?}"),
                }),
            },
            Some(_) => Err(ParamError::Invalid {
                key: key.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    /// Optional flat string mapping (nested maps are rejected)
    pub fn opt_map(&self, key: &str) -> Result<Option<BTreeMap<String, String>>, ParamError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(ParamValue::Map(map)) => map
                .iter()
                .map(|(k, v)| {
                    v.as_scalar()
                        .map(|s| (k.clone(), s))
                        .ok_or_else(|| ParamError::Invalid {
                            key: format!("{key}.{k}"),
                            reason: "nested mappings are not supported".to_string(),
                        })
                })
                .collect::<Result<_, _>>()
                .map(Some),
            Some(_) => Err(ParamError::Invalid {
                key: key.to_string(),
                reason: "expected a mapping".to_string(),
            }),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<BTreeMap<String, String>> for ParamValue {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, Self::Text(v))).collect())
    }
}

/// A named unit of desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default)]
    pub depends_on: DependsOn,
    #[serde(default, rename = "changed")]
    pub change_policy: ChangePolicy,
}

impl Task {
    pub fn new(name: &str, kind: TaskKind, parameters: Params) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parameters,
            depends_on: DependsOn::Implicit,
            change_policy: ChangePolicy::Auto,
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = DependsOn::explicit(names);
        self
    }

    /// Opt out of the implicit predecessor edge
    pub fn parallel(mut self) -> Self {
        self.depends_on = DependsOn::Explicit(BTreeSet::new());
        self
    }

    pub fn with_change_policy(mut self, policy: ChangePolicy) -> Self {
        self.change_policy = policy;
        self
    }
}

/// Result of executing one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Unchanged,
    Changed,
    Failed,
}

impl TaskResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed => "failed",
        })
    }
}

/// Finalized record of one task's execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_name: String,
    pub result: TaskResult,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl TaskOutcome {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Probe only; report what would change without mutating the target
    pub check: bool,
    /// Include content diffs in details (check mode only)
    pub diff: bool,
    /// Upper bound on concurrently executing tasks within a layer
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            check: false,
            diff: false,
            jobs: 4,
        }
    }
}

/// A command to run on the target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the command
    pub env: Vec<(String, String)>,
    /// Bytes written to the command's stdin; keeps secrets out of argv
    pub stdin: Option<Vec<u8>>,
    pub cwd: Option<String>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<String>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// `sh -c <script>`
    pub fn shell(script: &str) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Printable form; never includes stdin
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Output from a command run through a transport
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            status: output.status.code(),
        }
    }
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depends_on_absent_is_implicit() {
        let task: Task = serde_json::from_str(r#"{"name":"a","kind":"package"}"#).unwrap();
        assert_eq!(task.depends_on, DependsOn::Implicit);
        assert_eq!(task.change_policy, ChangePolicy::Auto);
    }

    #[test]
    fn test_depends_on_empty_list_is_explicit() {
        let task: Task =
            serde_json::from_str(r#"{"name":"a","kind":"service","depends_on":[]}"#).unwrap();
        assert_eq!(task.depends_on, DependsOn::Explicit(BTreeSet::new()));
    }

    #[test]
    fn test_kind_uses_kebab_case() {
        let task: Task =
            serde_json::from_str(r#"{"name":"a","kind":"command-if-absent"}"#).unwrap();
        assert_eq!(task.kind, TaskKind::CommandIfAbsent);
        assert_eq!(task.kind.to_string(), "command-if-absent");
    }

    #[test]
    fn test_params_accept_scalars_and_maps() {
        let params: Params = serde_json::from_str(
            r#"{"name":"nginx","present":true,"vars":{"db_name":"wp","port":3306}}"#,
        )
        .unwrap();
        assert_eq!(params.str("name").unwrap(), "nginx");
        assert_eq!(params.opt_bool("present").unwrap(), Some(true));
        let vars = params.opt_map("vars").unwrap().unwrap();
        assert_eq!(vars["port"], "3306");
        assert!(params.str("vars").is_err());
        assert!(matches!(
            params.str("missing"),
            Err(ParamError::Missing { .. })
        ));
    }

    #[test]
    fn test_text_booleans_parse() {
        let params = Params::new().with("enabled", "yes").with("bad", "maybe");
        assert_eq!(params.opt_bool("enabled").unwrap(), Some(true));
        assert!(params.opt_bool("bad").is_err());
    }

    #[test]
    fn test_command_display_omits_stdin() {
        let cmd = CommandSpec::new("mysql").arg("-N").stdin("secret");
        assert_eq!(cmd.display(), "mysql -N");
    }
}
