//! # Declarative
//!
//! An idempotent provisioning engine: declare the state a host should be
//! in, probe what it is, and apply only the difference.
//!
//! ## Core Concepts
//!
//! - **Task**: a named unit of desired state (package, service, file,
//!   config line, database, database user, one-shot command)
//! - **ExecutionPlan**: tasks grouped into dependency layers; tasks without
//!   explicit `depends_on` follow their predecessor
//! - **Reconciler**: probes one resource kind and computes the minimal
//!   mutation, or none
//! - **RunReport**: one outcome per executed task, in declared order
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ApplyContext, AutoConfirm, LocalTransport, NoProgress, Params,
//!     StandardResolver, Task, TaskKind, execute, planner,
//! };
//!
//! let plan = planner::build(vec![
//!     Task::new("nginx", TaskKind::Package, Params::new().with("name", "nginx")),
//!     Task::new(
//!         "nginx running",
//!         TaskKind::Service,
//!         Params::new().with("name", "nginx").with("state", "started"),
//!     ),
//! ])?;
//!
//! let transport = LocalTransport::new();
//! let ctx = ApplyContext::new(&transport, &StandardResolver);
//! let report = execute(&plan, &ctx, &NoProgress, &mut AutoConfirm)?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Transport`]: runs commands and file operations on the target
//! - [`SecretResolver`]: turns `password_ref`-style references into secrets
//! - [`ProgressCallback`]: receives progress updates from worker threads
//! - [`ConfirmCallback`]: handles user confirmation before mutating

pub mod context;
pub mod error;
pub mod executor;
pub mod planner;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod secrets;
pub mod template;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress,
    ProgressCallback,
};
pub use error::{
    ExecuteError, GraphError, ParamError, ProbeError, ReconcileError, SecretResolutionError,
    TaskError, TemplateError, TransportError,
};
pub use executor::execute;
pub use planner::ExecutionPlan;
pub use probe::ProbedState;
pub use reconcile::{Action, Reconciler};
pub use report::{RunReport, RunStatus, RunSummary};
pub use secrets::{MapResolver, Redactor, Secret, SecretRef, SecretResolver, StandardResolver};
pub use transport::{LocalTransport, SshTransport, TargetDescriptor, Transport};
pub use types::{
    ChangePolicy, CommandOutput, CommandSpec, DependsOn, ExecuteOptions, ParamValue, Params, Task,
    TaskKind, TaskOutcome, TaskResult,
};
