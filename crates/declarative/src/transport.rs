//! Connection transports - run commands and file operations on a target
//!
//! A run holds one transport per target host. Transports are shared by
//! every worker in a layer, so implementations must be safe to call
//! concurrently: [`LocalTransport`] is stateless and [`SshTransport`]
//! multiplexes all calls over one OpenSSH control connection.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{SecretFailure, SecretResolutionError, TransportError};
use crate::types::{CommandOutput, CommandSpec};

/// Mode applied to files created without a declared mode
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Contents and permissions of a file on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFacts {
    pub content: Vec<u8>,
    pub mode: Option<u32>,
}

/// Executes commands and file operations on one target host
pub trait Transport: Send + Sync {
    /// Printable target identity, e.g. `deploy@web1`
    fn target(&self) -> String;

    /// Run a command and capture its output
    fn exec(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError>;

    /// Read a file; `Ok(None)` when it does not exist
    fn read_file(&self, path: &str) -> Result<Option<FileFacts>, TransportError>;

    /// Replace a file atomically (write to a temporary sibling, then rename)
    ///
    /// With `mode: None` an existing file keeps its mode and ownership.
    fn write_file(&self, path: &str, content: &[u8], mode: Option<u32>)
    -> Result<(), TransportError>;

    /// Check whether a path exists
    fn path_exists(&self, path: &str) -> Result<bool, TransportError>;

    /// Check whether a program is on the target's PATH
    fn command_exists(&self, program: &str) -> Result<bool, TransportError> {
        let output = self.exec(&CommandSpec::new("sh").args([
            "-c",
            "command -v \"$1\" >/dev/null 2>&1",
            "sh",
            program,
        ]))?;
        Ok(output.success())
    }
}

/// Connection descriptor for a target host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Opaque credential handle: `agent` or `key:<path to identity file>`
    #[serde(default)]
    pub auth_reference: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Run commands through `sudo -n`
    #[serde(default, rename = "become")]
    pub become_root: bool,
}

impl TargetDescriptor {
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            ..Default::default()
        }
    }

    pub fn is_local(&self) -> bool {
        self.user.is_none()
            && self.port.is_none()
            && matches!(self.host.as_str(), "localhost" | "local" | "127.0.0.1" | "")
    }

    /// Open a transport for this target
    pub fn connect(&self, ssh_options: &[String]) -> Result<Box<dyn Transport>, SecretResolutionError> {
        if self.is_local() {
            return Ok(Box::new(LocalTransport {
                become_root: self.become_root,
            }));
        }

        let auth = match self.auth_reference.as_deref() {
            None | Some("agent") => SshAuth::Agent,
            Some(reference) => match reference.split_once(':') {
                Some(("key", path)) => {
                    let path = PathBuf::from(shellexpand::tilde(path).as_ref());
                    if !path.exists() {
                        return Err(SecretResolutionError {
                            parameter: "auth_reference".to_string(),
                            reason: SecretFailure::NotFound,
                        });
                    }
                    SshAuth::IdentityFile(path)
                }
                _ => {
                    return Err(SecretResolutionError {
                        parameter: "auth_reference".to_string(),
                        reason: SecretFailure::UnsupportedScheme,
                    });
                }
            },
        };

        Ok(Box::new(SshTransport {
            host: self.host.clone(),
            user: self.user.clone(),
            port: self.port,
            auth,
            become_root: self.become_root,
            options: ssh_options.to_vec(),
        }))
    }
}

/// Quote a word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Transport for the machine running the engine
#[derive(Debug, Default, Clone)]
pub struct LocalTransport {
    pub become_root: bool,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError> {
        let mut command = if self.become_root {
            let mut c = Command::new("sudo");
            c.arg("-n");
            if !cmd.env.is_empty() {
                c.arg("env");
                c.args(cmd.env.iter().map(|(k, v)| format!("{k}={v}")));
            }
            c.arg(&cmd.program);
            c
        } else {
            let mut c = Command::new(&cmd.program);
            c.envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            c
        };
        command
            .args(&cmd.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => TransportError::PermissionDenied {
                message: cmd.program.clone(),
            },
            _ => TransportError::Failed {
                operation: format!("spawn {}", cmd.program),
                message: e.to_string(),
            },
        })?;

        feed_stdin(&mut child, cmd.stdin.as_deref())?;

        Ok(child.wait_with_output()?.into())
    }
}

impl Transport for LocalTransport {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    fn exec(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError> {
        log::trace!("local exec: {}", cmd.display());
        self.spawn(cmd)
    }

    fn read_file(&self, path: &str) -> Result<Option<FileFacts>, TransportError> {
        if self.become_root {
            return read_output(self.spawn(&script(READ_SCRIPT, &[path]))?, path);
        }
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransportError::from_io(e, path)),
        };
        Ok(Some(FileFacts {
            content,
            mode: file_mode(Path::new(path)),
        }))
    }

    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        if self.become_root {
            let mode = mode.map(|m| format!("{m:o}")).unwrap_or_default();
            return write_output(
                &self.spawn(&script(WRITE_SCRIPT, &[path, &mode]).stdin(content))?,
                path,
            );
        }
        let dest = Path::new(path);
        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let existing = std::fs::metadata(dest).ok();

        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| TransportError::from_io(e, path))?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::{MetadataExt, PermissionsExt};

            let target_mode = mode
                .or_else(|| existing.as_ref().map(|m| m.mode() & 0o7777))
                .unwrap_or(DEFAULT_FILE_MODE);
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(target_mode))?;

            if let Some(meta) = &existing
                && let Err(e) =
                    std::os::unix::fs::chown(tmp.path(), Some(meta.uid()), Some(meta.gid()))
            {
                log::debug!("Could not preserve ownership of {}: {}", path, e);
            }
        }

        tmp.persist(dest)
            .map_err(|e| TransportError::from_io(e.error, path))?;
        Ok(())
    }

    fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
        if self.become_root {
            return Ok(self.spawn(&CommandSpec::new("test").args(["-e", path]))?.success());
        }
        match std::fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TransportError::from_io(e, path)),
        }
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<u32> {
    None
}

/// How the SSH transport authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    Agent,
    IdentityFile(PathBuf),
}

/// Transport over the system `ssh` client
///
/// All calls share one master connection (`ControlMaster=auto`), so
/// concurrent workers multiplex over a single session per host.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub auth: SshAuth,
    pub become_root: bool,
    /// Extra `-o` options
    pub options: Vec<String>,
}

/// Exit status used by `ssh` itself for connection failures
const SSH_CONNECT_FAILURE: i32 = 255;

/// Exit status of the read script when the file is missing
const READ_MISSING: i32 = 3;

const READ_SCRIPT: &str =
    r#"[ -e "$1" ] || exit 3; stat -c %a "$1" || exit 1; cat -- "$1""#;

const WRITE_SCRIPT: &str = r#"set -e
dest="$1"; mode="$2"
tmp=$(mktemp "$(dirname "$dest")/.converge.XXXXXX")
trap 'rm -f "$tmp"' EXIT
cat > "$tmp"
if [ -n "$mode" ]; then chmod "$mode" "$tmp"
elif [ -e "$dest" ]; then chmod --reference="$dest" "$tmp"
else chmod 644 "$tmp"; fi
if [ -e "$dest" ]; then chown --reference="$dest" "$tmp" 2>/dev/null || true; fi
mv -f "$tmp" "$dest"
trap - EXIT"#;

impl SshTransport {
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn control_path() -> String {
        std::env::temp_dir()
            .join("converge-ssh-%C")
            .to_string_lossy()
            .to_string()
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPersist=60s".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", Self::control_path()),
        ];
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let SshAuth::IdentityFile(path) = &self.auth {
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        args.push(self.destination());
        args.push("--".to_string());
        args
    }

    /// Render a command spec as one remote shell line
    fn remote_command(&self, cmd: &CommandSpec) -> String {
        let mut line = String::new();
        if let Some(dir) = &cmd.cwd {
            line.push_str(&format!("cd {} && ", shell_quote(dir)));
        }
        if self.become_root {
            line.push_str("sudo -n ");
        }
        if !cmd.env.is_empty() {
            line.push_str("env ");
            for (k, v) in &cmd.env {
                line.push_str(&shell_quote(&format!("{k}={v}")));
                line.push(' ');
            }
        }
        line.push_str(&shell_quote(&cmd.program));
        for arg in &cmd.args {
            line.push(' ');
            line.push_str(&shell_quote(arg));
        }
        line
    }

    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError> {
        let remote = self.remote_command(cmd);
        log::trace!("ssh {}: {}", self.destination(), cmd.display());

        let mut child = Command::new("ssh")
            .args(self.ssh_args())
            .arg(&remote)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Unreachable {
                target: self.target(),
                message: format!("failed to start ssh: {e}"),
            })?;

        feed_stdin(&mut child, cmd.stdin.as_deref())?;

        let output: CommandOutput = child.wait_with_output()?.into();
        if output.status == Some(SSH_CONNECT_FAILURE) {
            return Err(TransportError::Unreachable {
                target: self.target(),
                message: output.stderr_str().trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Write `input` to the child's stdin and close it
///
/// A child that exits before reading everything (EPIPE) is not an error
/// here; its exit status and stderr tell what went wrong.
fn feed_stdin(child: &mut Child, input: Option<&[u8]>) -> Result<(), TransportError> {
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        match stdin.write_all(input) {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}

fn script(script: &str, args: &[&str]) -> CommandSpec {
    CommandSpec::new("sh")
        .args(["-c", script, "sh"])
        .args(args.iter().copied())
}

/// Interpret the output of [`READ_SCRIPT`]: the octal mode on the first
/// line, then the raw content
fn read_output(output: CommandOutput, path: &str) -> Result<Option<FileFacts>, TransportError> {
    match output.status {
        Some(0) => {}
        Some(READ_MISSING) => return Ok(None),
        _ => {
            let stderr = output.stderr_str();
            return Err(if stderr.contains("Permission denied") {
                TransportError::PermissionDenied {
                    message: path.to_string(),
                }
            } else {
                TransportError::Failed {
                    operation: format!("read {path}"),
                    message: stderr.trim().to_string(),
                }
            });
        }
    }

    let newline = output
        .stdout
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| TransportError::Failed {
            operation: format!("read {path}"),
            message: "missing mode header".to_string(),
        })?;
    let mode = std::str::from_utf8(&output.stdout[..newline])
        .ok()
        .and_then(|m| u32::from_str_radix(m.trim(), 8).ok());

    Ok(Some(FileFacts {
        content: output.stdout[newline + 1..].to_vec(),
        mode,
    }))
}

fn write_output(output: &CommandOutput, path: &str) -> Result<(), TransportError> {
    if output.success() {
        Ok(())
    } else if output.stderr_str().contains("Permission denied") {
        Err(TransportError::PermissionDenied {
            message: path.to_string(),
        })
    } else {
        Err(TransportError::Failed {
            operation: format!("write {path}"),
            message: output.stderr_str().trim().to_string(),
        })
    }
}

impl Transport for SshTransport {
    fn target(&self) -> String {
        self.destination()
    }

    fn exec(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError> {
        self.run(cmd)
    }

    fn read_file(&self, path: &str) -> Result<Option<FileFacts>, TransportError> {
        read_output(self.run(&script(READ_SCRIPT, &[path]))?, path)
    }

    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        mode: Option<u32>,
    ) -> Result<(), TransportError> {
        let mode = mode.map(|m| format!("{m:o}")).unwrap_or_default();
        write_output(
            &self.run(&script(WRITE_SCRIPT, &[path, &mode]).stdin(content))?,
            path,
        )
    }

    fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
        let output = self.run(&CommandSpec::new("test").args(["-e", path]))?;
        match output.status {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(TransportError::Failed {
                operation: format!("test -e {path}"),
                message: output.stderr_str().trim().to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted transport for reconciler and executor tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockTransport {
        /// (command prefix, output); the latest matching entry wins
        responses: Mutex<Vec<(String, CommandOutput)>>,
        executed: Mutex<Vec<CommandSpec>>,
        files: Mutex<HashMap<String, FileFacts>>,
        unreachable: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        /// Respond to commands whose display starts with `prefix`
        pub fn respond(&self, prefix: &str, status: i32, stdout: &str) {
            self.responses.lock().unwrap().push((
                prefix.to_string(),
                CommandOutput {
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                    status: Some(status),
                },
            ));
        }

        pub fn respond_err(&self, prefix: &str, status: i32, stderr: &str) {
            self.responses.lock().unwrap().push((
                prefix.to_string(),
                CommandOutput {
                    stdout: Vec::new(),
                    stderr: stderr.as_bytes().to_vec(),
                    status: Some(status),
                },
            ));
        }

        pub fn with(self, prefix: &str, status: i32, stdout: &str) -> Self {
            self.respond(prefix, status, stdout);
            self
        }

        pub fn put_file(&self, path: &str, content: &str) {
            self.files.lock().unwrap().insert(
                path.to_string(),
                FileFacts {
                    content: content.as_bytes().to_vec(),
                    mode: Some(0o644),
                },
            );
        }

        pub fn file(&self, path: &str) -> Option<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|f| String::from_utf8_lossy(&f.content).to_string())
        }

        pub fn executed(&self) -> Vec<CommandSpec> {
            self.executed.lock().unwrap().clone()
        }

        pub fn executed_displays(&self) -> Vec<String> {
            self.executed().iter().map(CommandSpec::display).collect()
        }

        fn check_reachable(&self) -> Result<(), TransportError> {
            if self.unreachable {
                Err(TransportError::Unreachable {
                    target: "mock".into(),
                    message: "connection refused".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl Transport for MockTransport {
        fn target(&self) -> String {
            "mock".to_string()
        }

        fn exec(&self, cmd: &CommandSpec) -> Result<CommandOutput, TransportError> {
            self.check_reachable()?;
            self.executed.lock().unwrap().push(cmd.clone());
            let display = cmd.display();
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .rev()
                .find(|(prefix, _)| display.starts_with(prefix.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or(CommandOutput {
                    status: Some(0),
                    ..Default::default()
                }))
        }

        fn read_file(&self, path: &str) -> Result<Option<FileFacts>, TransportError> {
            self.check_reachable()?;
            Ok(self.files.lock().unwrap().get(path).cloned())
        }

        fn write_file(
            &self,
            path: &str,
            content: &[u8],
            mode: Option<u32>,
        ) -> Result<(), TransportError> {
            self.check_reachable()?;
            let mut files = self.files.lock().unwrap();
            let mode = mode.or_else(|| files.get(path).and_then(|f| f.mode));
            files.insert(
                path.to_string(),
                FileFacts {
                    content: content.to_vec(),
                    mode,
                },
            );
            Ok(())
        }

        fn path_exists(&self, path: &str) -> Result<bool, TransportError> {
            self.check_reachable()?;
            Ok(self.files.lock().unwrap().contains_key(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("nginx"), "nginx");
        assert_eq!(shell_quote("/etc/app.conf"), "/etc/app.conf");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_local_descriptor_detection() {
        assert!(TargetDescriptor::local().is_local());
        let remote = TargetDescriptor {
            host: "web1".into(),
            user: Some("deploy".into()),
            ..Default::default()
        };
        assert!(!remote.is_local());
    }

    #[test]
    fn test_unsupported_auth_reference() {
        let target = TargetDescriptor {
            host: "web1".into(),
            auth_reference: Some("password:hunter2".into()),
            ..Default::default()
        };
        let err = target.connect(&[]).err().unwrap();
        assert_eq!(err.reason, SecretFailure::UnsupportedScheme);
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_ssh_remote_command_quoting() {
        let ssh = SshTransport {
            host: "web1".into(),
            user: Some("deploy".into()),
            port: Some(2222),
            auth: SshAuth::Agent,
            become_root: true,
            options: vec!["StrictHostKeyChecking=accept-new".into()],
        };
        let cmd = CommandSpec::new("apt-get")
            .args(["install", "-y", "nginx"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .cwd("/var/www html");
        assert_eq!(
            ssh.remote_command(&cmd),
            "cd '/var/www html' && sudo -n env DEBIAN_FRONTEND=noninteractive apt-get install -y nginx"
        );

        let args = ssh.ssh_args();
        assert!(args.contains(&"StrictHostKeyChecking=accept-new".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@web1");
        assert_eq!(ssh.target(), "deploy@web1");
    }

    #[test]
    fn test_local_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let facts = LocalTransport::new()
            .read_file(path.to_str().unwrap())
            .unwrap();
        assert!(facts.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_local_write_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        std::fs::write(&path, "old\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let transport = LocalTransport::new();
        let p = path.to_str().unwrap();
        transport.write_file(p, b"new\n", None).unwrap();

        let facts = transport.read_file(p).unwrap().unwrap();
        assert_eq!(facts.content, b"new\n");
        assert_eq!(facts.mode, Some(0o600));
    }

    #[cfg(unix)]
    #[test]
    fn test_local_write_new_file_default_and_declared_mode() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();

        let plain = dir.path().join("plain");
        transport
            .write_file(plain.to_str().unwrap(), b"x", None)
            .unwrap();
        let facts = transport.read_file(plain.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(facts.mode, Some(DEFAULT_FILE_MODE));

        let declared = dir.path().join("declared");
        transport
            .write_file(declared.to_str().unwrap(), b"x", Some(0o640))
            .unwrap();
        let facts = transport
            .read_file(declared.to_str().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(facts.mode, Some(0o640));
    }

    #[test]
    fn test_local_exec_with_stdin() {
        let out = LocalTransport::new()
            .exec(&CommandSpec::new("cat").stdin("piped"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_str(), "piped");
    }

    #[test]
    fn test_early_exit_reports_child_stderr() {
        let t = LocalTransport::new();
        let cmd = CommandSpec::new("sh")
            .args(["-c", "echo 'Access denied' >&2; exit 3"])
            .stdin(vec![b'x'; 1 << 20]);
        let output = t.exec(&cmd).unwrap();
        assert_eq!(output.status, Some(3));
        assert!(output.stderr_str().contains("Access denied"));
    }

    #[test]
    fn test_local_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new();
        assert!(transport.path_exists(dir.path().to_str().unwrap()).unwrap());
        assert!(!transport
            .path_exists(dir.path().join("nope").to_str().unwrap())
            .unwrap());
    }

    fn output(status: i32, stdout: &[u8], stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            status: Some(status),
        }
    }

    #[test]
    fn test_read_script_output() {
        let facts = read_output(output(0, b"640\nkey=value\n", ""), "/etc/app.conf")
            .unwrap()
            .unwrap();
        assert_eq!(facts.mode, Some(0o640));
        assert_eq!(facts.content, b"key=value\n");

        assert!(read_output(output(READ_MISSING, b"", ""), "/x").unwrap().is_none());
        assert!(matches!(
            read_output(output(1, b"", "cat: /x: Permission denied"), "/x"),
            Err(TransportError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_write_script_failure() {
        assert!(write_output(&output(0, b"", ""), "/x").is_ok());
        assert!(matches!(
            write_output(&output(1, b"", "mktemp: No space left on device"), "/x"),
            Err(TransportError::Failed { .. })
        ));
    }
}
