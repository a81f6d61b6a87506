//! Single-line configuration patching
//!
//! At most one line per pattern is canonical. When several lines match,
//! only the first is replaced and the rest are left alone. When none
//! match, the replacement is appended, unless the exact line is already
//! present elsewhere in the file.

use regex::Regex;

use super::{Action, Reconciler, mismatch, unified_diff};
use crate::error::{ParamError, ProbeError, ReconcileError};
use crate::probe::{self, ProbedState};
use crate::transport::Transport;
use crate::types::Params;

/// Parameters: `path`, `match_pattern` (regex), `replacement_line`,
/// `create` (default false: an absent file fails the task).
#[derive(Debug, Clone)]
pub struct LineInFileReconciler {
    pub path: String,
    pub pattern: Regex,
    pub line: String,
    pub create: bool,
}

impl LineInFileReconciler {
    pub fn from_params(params: &Params) -> Result<Self, ParamError> {
        let raw = params.str("match_pattern")?;
        let pattern = Regex::new(&raw).map_err(|e| ParamError::Invalid {
            key: "match_pattern".to_string(),
            reason: e.to_string(),
        })?;
        let line = params.str("replacement_line")?;
        if line.contains('\n') {
            return Err(ParamError::Invalid {
                key: "replacement_line".to_string(),
                reason: "must be a single line".to_string(),
            });
        }
        Ok(Self {
            path: params.str("path")?,
            pattern,
            line,
            create: params.opt_bool("create")?.unwrap_or(false),
        })
    }

    /// New file content, or `None` if nothing needs to change
    fn desired(&self, probed: &ProbedState) -> Result<Option<String>, ReconcileError> {
        let ProbedState::File { facts } = probed else {
            return Err(mismatch("file", probed));
        };
        match facts {
            None if self.create => Ok(Some(format!("{}\n", self.line))),
            None => Err(ReconcileError::Precondition(format!(
                "{} does not exist",
                self.path
            ))),
            Some(facts) => {
                let content = std::str::from_utf8(&facts.content).map_err(|_| {
                    ReconcileError::Precondition(format!("{} is not valid UTF-8", self.path))
                })?;
                Ok(patch_lines(content, &self.pattern, &self.line))
            }
        }
    }
}

/// Line body without its `\n` or `\r\n` terminator
fn body(chunk: &str) -> &str {
    chunk
        .strip_suffix('\n')
        .map_or(chunk, |c| c.strip_suffix('\r').unwrap_or(c))
}

/// Apply the first-match policy to `content`; `None` when already converged
///
/// Only the matched line is rewritten and it keeps its own terminator.
/// Appended lines use the terminator of the file's first line.
pub fn patch_lines(content: &str, pattern: &Regex, line: &str) -> Option<String> {
    let chunks: Vec<&str> = content.split_inclusive('\n').collect();

    match chunks.iter().position(|c| pattern.is_match(body(c))) {
        Some(i) if body(chunks[i]) == line => None,
        Some(i) => {
            let ending = &chunks[i][body(chunks[i]).len()..];
            let mut out = chunks[..i].concat();
            out.push_str(line);
            out.push_str(ending);
            out.push_str(&chunks[i + 1..].concat());
            Some(out)
        }
        None if chunks.iter().any(|c| body(c) == line) => None,
        None => {
            let eol = match chunks.first() {
                Some(first) if first.ends_with("\r\n") => "\r\n",
                _ => "\n",
            };
            let mut out = content.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push_str(eol);
            }
            out.push_str(line);
            out.push_str(eol);
            Some(out)
        }
    }
}

impl Reconciler for LineInFileReconciler {
    fn describe(&self) -> String {
        format!("line in {}", self.path)
    }

    fn probe(&self, transport: &dyn Transport) -> Result<ProbedState, ProbeError> {
        probe::file(transport, &self.path)
    }

    fn plan(&self, probed: &ProbedState) -> Result<Action, ReconcileError> {
        Ok(match self.desired(probed)? {
            None => Action::NoOp {
                detail: format!("{} already has the line", self.path),
            },
            Some(_) => Action::Apply {
                summary: format!("set line in {}", self.path),
            },
        })
    }

    fn apply(
        &self,
        transport: &dyn Transport,
        probed: &ProbedState,
    ) -> Result<String, ReconcileError> {
        let Some(content) = self.desired(probed)? else {
            return Ok(format!("{} already has the line", self.path));
        };
        transport.write_file(&self.path, content.as_bytes(), None)?;
        Ok(format!("updated {}", self.path))
    }

    fn preview(&self, probed: &ProbedState) -> Option<String> {
        let new = self.desired(probed).ok()??;
        let old = match probed {
            ProbedState::File { facts: Some(f) } => String::from_utf8_lossy(&f.content).to_string(),
            _ => String::new(),
        };
        Some(unified_diff(&self.path, &old, &new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn reconciler(pattern: &str, line: &str) -> LineInFileReconciler {
        LineInFileReconciler::from_params(
            &Params::new()
                .with("path", "/etc/app.env")
                .with("match_pattern", pattern)
                .with("replacement_line", line),
        )
        .unwrap()
    }

    #[test]
    fn test_first_match_only() {
        let re = Regex::new("DB_NAME").unwrap();
        let content = "DB_NAME=a\nOTHER=1\nDB_NAME=b\n";
        let out = patch_lines(content, &re, "X").unwrap();
        assert_eq!(out, "X\nOTHER=1\nDB_NAME=b\n");
        assert_eq!(out.lines().count(), content.lines().count());
    }

    #[test]
    fn test_appends_when_no_match() {
        let re = Regex::new("^PORT=").unwrap();
        assert_eq!(
            patch_lines("HOST=x", &re, "PORT=80").unwrap(),
            "HOST=x\nPORT=80\n"
        );
    }

    #[test]
    fn test_crlf_endings_survive_patch() {
        let re = Regex::new("^A=").unwrap();
        assert_eq!(
            patch_lines("A=1\r\nB=2\r\n", &re, "A=9").unwrap(),
            "A=9\r\nB=2\r\n"
        );

        let re = Regex::new("^C=").unwrap();
        assert_eq!(
            patch_lines("A=1\r\nB=2\r\n", &re, "C=3").unwrap(),
            "A=1\r\nB=2\r\nC=3\r\n"
        );
        assert_eq!(patch_lines("A=1\r\nC=3\r\n", &re, "C=3"), None);
    }

    #[test]
    fn test_missing_final_newline_is_kept() {
        let re = Regex::new("^B=").unwrap();
        assert_eq!(patch_lines("A=1\nB=2", &re, "B=9").unwrap(), "A=1\nB=9");
        assert_eq!(patch_lines("A=1\nB=9", &re, "B=9"), None);
    }

    #[test]
    fn test_empty_file_gets_line() {
        let re = Regex::new("^A=").unwrap();
        assert_eq!(patch_lines("", &re, "A=1").unwrap(), "A=1\n");
    }

    #[test]
    fn test_existing_line_elsewhere_is_noop() {
        let re = Regex::new("^#?Port ").unwrap();
        assert_eq!(patch_lines("Listen 1\nPort=22\n", &re, "Port=22"), None);
    }

    #[test]
    fn test_idempotent_through_transport() {
        let t = MockTransport::new();
        t.put_file("/etc/app.env", "DB_NAME=old\nDEBUG=1\n");
        let r = reconciler("^DB_NAME=", "DB_NAME=wordpress");

        let probed = r.probe(&t).unwrap();
        assert!(r.plan(&probed).unwrap().is_apply());
        r.apply(&t, &probed).unwrap();
        assert_eq!(
            t.file("/etc/app.env").unwrap(),
            "DB_NAME=wordpress\nDEBUG=1\n"
        );

        let probed = r.probe(&t).unwrap();
        assert!(!r.plan(&probed).unwrap().is_apply());
    }

    #[test]
    fn test_absent_file_without_create_fails() {
        let t = MockTransport::new();
        let r = reconciler("^A=", "A=1");
        let probed = r.probe(&t).unwrap();
        assert!(matches!(
            r.plan(&probed),
            Err(ReconcileError::Precondition(_))
        ));
    }

    #[test]
    fn test_absent_file_with_create() {
        let t = MockTransport::new();
        let r = LineInFileReconciler::from_params(
            &Params::new()
                .with("path", "/etc/new.conf")
                .with("match_pattern", "^A=")
                .with("replacement_line", "A=1")
                .with("create", true),
        )
        .unwrap();
        let probed = r.probe(&t).unwrap();
        r.apply(&t, &probed).unwrap();
        assert_eq!(t.file("/etc/new.conf").unwrap(), "A=1\n");
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = LineInFileReconciler::from_params(
            &Params::new()
                .with("path", "/x")
                .with("match_pattern", "(")
                .with("replacement_line", "y"),
        )
        .unwrap_err();
        assert!(matches!(err, ParamError::Invalid { .. }));
    }
}
