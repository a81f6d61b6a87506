//! Execution engine - walks plan layers and converges each task
//!
//! Layers run strictly one after another. Tasks within a layer run on a
//! bounded rayon pool. After a layer in which any task failed, no further
//! layer is started (fail-fast), but the failing layer is allowed to
//! drain. Outcomes are slotted by declaration index, so the report keeps
//! declared order whatever the completion order.

use chrono::Utc;
use rayon::prelude::*;

use crate::context::{ApplyContext, ConfirmCallback, ProgressCallback};
use crate::error::{ExecuteError, TaskError};
use crate::planner::ExecutionPlan;
use crate::reconcile::{self, Action, Reconciled};
use crate::report::{RunReport, RunStatus};
use crate::types::{ChangePolicy, Task, TaskOutcome, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Queued,
    Probing,
    Reconciling,
    Done,
    Errored,
}

fn transition(state: &mut RunState, next: RunState) {
    log::debug!("Run {:?} -> {:?}", state, next);
    *state = next;
}

fn phase(task: &Task, phase: TaskPhase) {
    log::debug!("{} [{}]: {:?}", task.name, task.kind, phase);
}

/// Execute a plan against the context's target
///
/// Unless in check mode, `confirm` is asked once before the first layer;
/// declining produces a cancelled report. The report is always returned,
/// even when tasks fail.
pub fn execute<P, C>(
    plan: &ExecutionPlan,
    ctx: &ApplyContext,
    progress: &P,
    confirm: &mut C,
) -> Result<RunReport, ExecuteError>
where
    P: ProgressCallback + ?Sized,
    C: ConfirmCallback + ?Sized,
{
    let started_at = Utc::now();
    let mut state = RunState::Pending;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.options.jobs.max(1))
        .build()?;

    let declined = !ctx.options.check
        && !plan.is_empty()
        && !confirm.confirm(&format!(
            "Apply {} task(s) to {}?",
            plan.len(),
            ctx.transport.target()
        ));
    let halted = move || declined || ctx.cancel.is_cancelled();

    transition(&mut state, RunState::Running);

    let mut slots: Vec<Option<TaskOutcome>> = vec![None; plan.len()];
    let mut failed_task: Option<String> = None;
    let layer_count = plan.layers().len();

    for (index, layer) in plan.layers().iter().enumerate() {
        if halted() {
            log::warn!("Run cancelled before layer {}/{}", index + 1, layer_count);
            break;
        }

        log::info!(
            "Layer {}/{}: {} task(s)",
            index + 1,
            layer_count,
            layer.len()
        );
        progress.on_layer_start(index, layer.len());

        let outcomes: Vec<Option<TaskOutcome>> = pool.install(|| {
            layer
                .par_iter()
                .map(|&i| {
                    // Cancellation stops dispatch; running tasks finish
                    if halted() {
                        None
                    } else {
                        Some(run_task(&plan.tasks()[i], ctx, progress))
                    }
                })
                .collect()
        });

        for (&i, outcome) in layer.iter().zip(outcomes) {
            let Some(outcome) = outcome else { continue };
            if outcome.result.is_failure() && failed_task.is_none() {
                failed_task = Some(outcome.task_name.clone());
            }
            slots[i] = Some(outcome);
        }

        progress.on_layer_complete(index);

        if let Some(name) = &failed_task {
            log::warn!(
                "Task {} failed; skipping {} remaining layer(s)",
                name,
                layer_count - index - 1
            );
            break;
        }
    }

    let mut outcomes = Vec::with_capacity(plan.len());
    let mut not_run = Vec::new();
    for (task, slot) in plan.tasks().iter().zip(slots) {
        match slot {
            Some(outcome) => outcomes.push(outcome),
            None => not_run.push(task.name.clone()),
        }
    }

    let cancelled = halted() && !not_run.is_empty();
    let status = if failed_task.is_some() || cancelled {
        transition(&mut state, RunState::Failed);
        RunStatus::Failed {
            failed_task,
            cancelled,
        }
    } else {
        transition(&mut state, RunState::Succeeded);
        RunStatus::Succeeded
    };

    Ok(RunReport {
        outcomes,
        not_run,
        status,
        started_at,
        ended_at: Utc::now(),
    })
}

/// Run one task to a terminal outcome; errors never escape
fn run_task<P: ProgressCallback + ?Sized>(
    task: &Task,
    ctx: &ApplyContext,
    progress: &P,
) -> TaskOutcome {
    progress.on_task_start(task);
    let started_at = Utc::now();

    let (result, detail) = match converge(task, ctx) {
        Ok(done) => done,
        Err(e) => {
            phase(task, TaskPhase::Errored);
            (TaskResult::Failed, e.to_string())
        }
    };

    let detail = ctx.redactor.redact(&detail);
    if result.is_failure() {
        log::warn!("{}: {}", task.name, detail);
    }

    let outcome = TaskOutcome {
        task_name: task.name.clone(),
        result,
        detail,
        started_at,
        ended_at: Utc::now(),
    };
    progress.on_task_complete(&outcome);
    outcome
}

fn converge(task: &Task, ctx: &ApplyContext) -> Result<(TaskResult, String), TaskError> {
    phase(task, TaskPhase::Queued);
    let reconciler = reconcile::for_task(task, ctx)?;

    phase(task, TaskPhase::Probing);
    let probed = reconciler.probe(ctx.transport)?;

    phase(task, TaskPhase::Reconciling);
    let Reconciled { action, detail } =
        reconcile::reconcile(reconciler.as_ref(), ctx.transport, &probed, &ctx.options)?;
    phase(task, TaskPhase::Done);

    let result = match (action, task.change_policy) {
        (Action::Apply { .. }, ChangePolicy::Auto) => TaskResult::Changed,
        _ => TaskResult::Unchanged,
    };
    Ok((result, detail))
}
