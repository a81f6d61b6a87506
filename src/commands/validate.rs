//! `converge validate` - check a task file without touching a host

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use declarative::{
    ApplyContext, ExecutionPlan, LocalTransport, SecretResolver, StandardResolver, TaskError,
    planner, reconcile,
};
use std::collections::BTreeMap;
use std::path::Path;

use crate::Context;
use crate::config::TaskFile;
use crate::ui;

pub fn run(ctx: &Context, file: &Path, extra_vars: Vec<(String, String)>) -> Result<()> {
    let task_file = TaskFile::load(file)?;
    let mut vars = task_file.string_vars()?;
    vars.extend(extra_vars);

    let plan = planner::build(task_file.tasks)
        .with_context(|| format!("Invalid task graph in {}", file.display()))?;

    let results = check_tasks(&plan, &StandardResolver, vars, &TaskFile::base_dir(file));

    let mut errors = 0;
    let mut unresolved = 0;
    for (name, result) in &results {
        match result {
            Ok(description) => {
                if !ctx.quiet {
                    println!("  {} {} {}", "✓".green(), name, description.dimmed());
                }
            }
            // Secrets may only be available where the run happens
            Err(TaskError::Secret(e)) => {
                unresolved += 1;
                println!("  {} {} {}", "⚠".yellow(), name, e.to_string().dimmed());
            }
            Err(e) => {
                errors += 1;
                println!("  {} {} {}", "✗".red(), name.bold(), e);
            }
        }
    }

    if unresolved > 0 {
        ui::warn(&format!(
            "{unresolved} secret(s) could not be resolved here"
        ));
    }
    if errors > 0 {
        bail!("{errors} of {} task(s) are invalid", results.len());
    }
    ui::success(&format!(
        "{} task(s) in {} layer(s) are valid",
        plan.len(),
        plan.layers().len()
    ));
    Ok(())
}

/// Build a reconciler for every task, in declared order
///
/// Parameters, templates and secret references are checked; nothing is
/// probed, so the transport is never used.
fn check_tasks(
    plan: &ExecutionPlan,
    resolver: &dyn SecretResolver,
    vars: BTreeMap<String, String>,
    base_dir: &Path,
) -> Vec<(String, Result<String, TaskError>)> {
    let transport = LocalTransport::new();
    let apply_ctx = ApplyContext::new(&transport, resolver)
        .with_vars(vars)
        .with_base_dir(base_dir);

    plan.tasks()
        .iter()
        .map(|task| {
            let result = reconcile::for_task(task, &apply_ctx).map(|r| r.describe());
            (task.name.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{MapResolver, Params, Task, TaskKind};
    use std::fs;

    fn plan(tasks: Vec<Task>) -> ExecutionPlan {
        planner::build(tasks).unwrap()
    }

    #[test]
    fn test_valid_tasks_describe_themselves() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("motd.tmpl"), "Welcome to {{ host }}\n").unwrap();

        let plan = plan(vec![
            Task::new("nginx", TaskKind::Package, Params::new().with("name", "nginx")),
            Task::new(
                "motd",
                TaskKind::FileFromTemplate,
                Params::new().with("dest", "/etc/motd").with("src", "motd.tmpl"),
            ),
        ]);
        let vars = BTreeMap::from([("host".to_string(), "web1".to_string())]);

        let results = check_tasks(&plan, &MapResolver::new(), vars, dir.path());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(results[0].0, "nginx");
    }

    #[test]
    fn test_missing_template_variable_is_reported() {
        let plan = plan(vec![Task::new(
            "motd",
            TaskKind::FileFromTemplate,
            Params::new()
                .with("dest", "/etc/motd")
                .with("content", "Welcome to {{ host }}"),
        )]);

        let results = check_tasks(&plan, &MapResolver::new(), BTreeMap::new(), Path::new("."));
        assert!(matches!(results[0].1, Err(TaskError::Template(_))));
    }

    #[test]
    fn test_missing_parameter_is_reported() {
        let plan = plan(vec![Task::new("pkg", TaskKind::Package, Params::new())]);
        let results = check_tasks(&plan, &MapResolver::new(), BTreeMap::new(), Path::new("."));
        assert!(matches!(results[0].1, Err(TaskError::Param(_))));
    }

    #[test]
    fn test_unresolved_secret_is_distinguished() {
        let plan = plan(vec![Task::new(
            "wp user",
            TaskKind::DbUserGrant,
            Params::new()
                .with("user", "wp")
                .with("password_ref", "env:CONVERGE_TEST_UNSET_PASSWORD")
                .with("privileges", "wordpress.*:ALL"),
        )]);
        let results = check_tasks(&plan, &MapResolver::new(), BTreeMap::new(), Path::new("."));
        assert!(matches!(results[0].1, Err(TaskError::Secret(_))));
    }
}
