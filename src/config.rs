//! Task files and user settings

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use declarative::{ParamValue, TargetDescriptor, Task};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

// ============================================================================
// Task File
// ============================================================================

/// A task list plus optional connection and variables
///
/// TOML:
/// ```toml
/// [target]
/// host = "web1"
/// user = "deploy"
///
/// [vars]
/// db_name = "wordpress"
///
/// [[tasks]]
/// name = "install nginx"
/// kind = "package"
/// parameters = { name = "nginx" }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskFile {
    #[serde(default)]
    pub target: Option<TargetDescriptor>,
    #[serde(default)]
    pub vars: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Json,
}

impl FileFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl TaskFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content, FileFormat::from_path(path))
            .with_context(|| format!("Invalid task file {}", path.display()))
    }

    fn parse(content: &str, format: FileFormat) -> Result<Self> {
        Ok(match format {
            FileFormat::Toml => toml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        })
    }

    /// Flat string variables; nested tables are rejected
    pub fn string_vars(&self) -> Result<BTreeMap<String, String>> {
        self.vars
            .iter()
            .map(|(k, v)| match v.as_scalar() {
                Some(s) => Ok((k.clone(), s)),
                None => bail!("Variable `{k}` must be a string, number or boolean"),
            })
            .collect()
    }

    /// Directory that relative template sources resolve against
    pub fn base_dir(path: &Path) -> PathBuf {
        match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Output format for run reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// User settings from `config.toml` in the config directory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Concurrent tasks per layer
    pub jobs: usize,
    /// Extra `ssh -o` options, e.g. `StrictHostKeyChecking=accept-new`
    pub ssh_options: Vec<String>,
    pub report_format: ReportFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jobs: 4,
            ssh_options: Vec::new(),
            report_format: ReportFormat::Text,
        }
    }
}

impl Settings {
    /// Load settings; a missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_dir()?.join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{DependsOn, TaskKind};

    #[test]
    fn test_parse_toml_task_file() {
        let file = TaskFile::parse(
            r#"
[target]
host = "web1"
user = "deploy"
become = true

[vars]
db_name = "wordpress"
db_port = 3306

[[tasks]]
name = "install nginx"
kind = "package"
parameters = { name = "nginx" }

[[tasks]]
name = "wp-config"
kind = "file-from-template"
depends_on = []
changed = "never"

[tasks.parameters]
dest = "/var/www/wp-config.php"
src = "wp-config.php.tmpl"
"#,
            FileFormat::Toml,
        )
        .unwrap();

        let target = file.target.as_ref().unwrap();
        assert_eq!(target.host, "web1");
        assert!(target.become_root);
        assert_eq!(file.tasks.len(), 2);
        assert_eq!(file.tasks[0].kind, TaskKind::Package);
        assert_eq!(file.tasks[0].depends_on, DependsOn::Implicit);
        assert!(file.tasks[1].depends_on.is_explicit());

        let vars = file.string_vars().unwrap();
        assert_eq!(vars["db_port"], "3306");
    }

    #[test]
    fn test_parse_json_task_file() {
        let file = TaskFile::parse(
            r#"{"tasks": [{"name": "a", "kind": "service", "parameters": {"name": "nginx", "state": "started"}}]}"#,
            FileFormat::Json,
        )
        .unwrap();
        assert_eq!(file.tasks[0].kind, TaskKind::Service);
        assert!(file.target.is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = TaskFile::parse(
            r#"{"tasks": [{"name": "a", "kind": "unicorn"}]}"#,
            FileFormat::Json,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("site.json")), FileFormat::Json);
        assert_eq!(FileFormat::from_path(Path::new("site.toml")), FileFormat::Toml);
    }

    #[test]
    fn test_settings_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(settings.jobs, 4);
        assert_eq!(settings.report_format, ReportFormat::Text);
    }

    #[test]
    fn test_settings_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "jobs = 8\nssh_options = [\"StrictHostKeyChecking=accept-new\"]\n")
            .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.jobs, 8);
        assert_eq!(settings.ssh_options.len(), 1);
        assert_eq!(settings.report_format, ReportFormat::Text);
    }

    #[test]
    fn test_base_dir() {
        assert_eq!(TaskFile::base_dir(Path::new("site.toml")), PathBuf::from("."));
        assert_eq!(
            TaskFile::base_dir(Path::new("/srv/play/site.toml")),
            PathBuf::from("/srv/play")
        );
    }
}
