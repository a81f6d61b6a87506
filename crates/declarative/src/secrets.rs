//! Secret references and redaction
//!
//! Task parameters never carry secrets inline. They carry a reference
//! (`env:NAME` or `file:/path`) that is resolved at execution time. Every
//! resolved value, and the reference itself, is registered with the run's
//! [`Redactor`] so that nothing derived from it reaches a report or a log.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::error::{SecretFailure, SecretResolutionError};

/// Replacement text for redacted values
pub const REDACTED: &str = "********";

/// Opaque reference to a secret
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Split into `(scheme, rest)`
    fn parts(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }

    fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretRef(..)")
    }
}

/// A resolved secret; never printed
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Resolves secret references at execution time
pub trait SecretResolver: Send + Sync {
    /// Resolve `reference`; `parameter` names the task parameter that
    /// carried it and is the only context allowed in errors
    fn resolve(
        &self,
        parameter: &str,
        reference: &SecretRef,
    ) -> Result<Secret, SecretResolutionError>;
}

/// Resolver for `env:NAME` and `file:/path` references
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardResolver;

impl SecretResolver for StandardResolver {
    fn resolve(
        &self,
        parameter: &str,
        reference: &SecretRef,
    ) -> Result<Secret, SecretResolutionError> {
        let fail = |reason| SecretResolutionError {
            parameter: parameter.to_string(),
            reason,
        };

        let value = match reference.parts() {
            Some(("env", name)) => std::env::var(name).map_err(|_| fail(SecretFailure::NotFound))?,
            Some(("file", path)) => {
                let path = shellexpand::tilde(path);
                let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        fail(SecretFailure::NotFound)
                    } else {
                        fail(SecretFailure::Unreadable)
                    }
                })?;
                content.trim_end_matches(['\r', '\n']).to_string()
            }
            _ => return Err(fail(SecretFailure::UnsupportedScheme)),
        };

        if value.is_empty() {
            return Err(fail(SecretFailure::Empty));
        }
        Ok(Secret(value))
    }
}

/// In-memory resolver keyed by the full reference string
#[derive(Default)]
pub struct MapResolver {
    values: HashMap<String, String>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, value: &str) -> Self {
        self.values.insert(reference.to_string(), value.to_string());
        self
    }
}

impl SecretResolver for MapResolver {
    fn resolve(
        &self,
        parameter: &str,
        reference: &SecretRef,
    ) -> Result<Secret, SecretResolutionError> {
        self.values
            .get(reference.as_str())
            .map(|v| Secret(v.clone()))
            .ok_or_else(|| SecretResolutionError {
                parameter: parameter.to_string(),
                reason: SecretFailure::NotFound,
            })
    }
}

/// Collects sensitive strings for the duration of a run and scrubs them
/// from any text bound for a report or log
#[derive(Debug, Default)]
pub struct Redactor {
    sensitive: Mutex<Vec<String>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_secret(&self, secret: &Secret) {
        self.register(secret.expose());
    }

    pub fn register_reference(&self, reference: &SecretRef) {
        self.register(reference.as_str());
    }

    fn register(&self, value: &str) {
        if value.is_empty() {
            return;
        }
        let mut sensitive = match self.sensitive.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !sensitive.iter().any(|s| s == value) {
            sensitive.push(value.to_string());
            // Longest first so a secret containing another is masked whole
            sensitive.sort_by_key(|s| std::cmp::Reverse(s.len()));
        }
    }

    /// Replace every registered value in `text`
    pub fn redact(&self, text: &str) -> String {
        let sensitive = match self.sensitive.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out = text.to_string();
        for value in sensitive.iter() {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), REDACTED);
            }
        }
        out
    }
}
