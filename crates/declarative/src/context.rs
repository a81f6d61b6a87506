//! Run context and caller-provided callbacks
//!
//! The engine never talks to a terminal. Progress and confirmation are
//! delegated to the caller through [`ProgressCallback`] and
//! [`ConfirmCallback`]; secrets come in through a [`SecretResolver`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SecretResolutionError;
use crate::secrets::{Redactor, Secret, SecretRef, SecretResolver};
use crate::transport::Transport;
use crate::types::{ExecuteOptions, Task, TaskOutcome};

/// Progress callback for a run
///
/// Task callbacks are invoked from worker threads, so implementations
/// take `&self` and must be `Sync`.
pub trait ProgressCallback: Sync {
    /// Called before a layer is dispatched
    fn on_layer_start(&self, index: usize, count: usize);

    /// Called when a worker picks up a task
    fn on_task_start(&self, task: &Task);

    /// Called with the finalized outcome of a task
    fn on_task_complete(&self, outcome: &TaskOutcome);

    /// Called once every task of a layer is terminal
    fn on_layer_complete(&self, index: usize);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action; `false` cancels the run
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_layer_start(&self, _index: usize, _count: usize) {}
    fn on_task_start(&self, _task: &Task) {}
    fn on_task_complete(&self, _outcome: &TaskOutcome) {}
    fn on_layer_complete(&self, _index: usize) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> bool {
        false
    }
}

/// External cancellation signal
///
/// Once cancelled, no new task is dispatched; in-flight tasks finish.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run needs besides the plan
pub struct ApplyContext<'a> {
    /// Connection to the target host, shared by all workers
    pub transport: &'a dyn Transport,
    pub resolver: &'a dyn SecretResolver,
    /// Scrubs secrets from every outcome detail and log line
    pub redactor: Redactor,
    /// Run-level template variables
    pub vars: BTreeMap<String, String>,
    /// Directory that relative template sources resolve against
    pub base_dir: PathBuf,
    pub options: ExecuteOptions,
    pub cancel: CancelToken,
}

impl<'a> ApplyContext<'a> {
    pub fn new(transport: &'a dyn Transport, resolver: &'a dyn SecretResolver) -> Self {
        Self {
            transport,
            resolver,
            redactor: Redactor::new(),
            vars: BTreeMap::new(),
            base_dir: PathBuf::from("."),
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a secret reference and register both the reference and the
    /// value for redaction
    pub fn resolve_secret(
        &self,
        parameter: &str,
        reference: &str,
    ) -> Result<Secret, SecretResolutionError> {
        let reference = SecretRef::new(reference);
        self.redactor.register_reference(&reference);
        let secret = self.resolver.resolve(parameter, &reference)?;
        self.redactor.register_secret(&secret);
        Ok(secret)
    }
}
