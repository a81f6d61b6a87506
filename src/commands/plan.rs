//! `converge plan` - show execution layers

use anyhow::{Context as _, Result};
use colored::Colorize;
use declarative::{DependsOn, planner};
use std::path::Path;

use crate::Context;
use crate::config::TaskFile;
use crate::ui;

pub fn run(ctx: &Context, file: &Path) -> Result<()> {
    let task_file = TaskFile::load(file)?;
    let plan = planner::build(task_file.tasks)
        .with_context(|| format!("Invalid task graph in {}", file.display()))?;

    ui::header(&format!("Plan for {}", file.display()));
    if let Some(target) = &task_file.target {
        ui::kv("target", &target.host);
    }
    ui::kv("tasks", &plan.len().to_string());

    if plan.is_empty() {
        ui::info("No tasks");
        return Ok(());
    }

    for (index, layer) in plan.layers().iter().enumerate() {
        ui::section(&format!("Layer {}", index + 1));
        for &i in layer {
            let task = &plan.tasks()[i];
            println!("  {} {} {}", "→".cyan(), task.name, format!("[{}]", task.kind).dimmed());
            if ctx.verbose > 0
                && let DependsOn::Explicit(deps) = &task.depends_on
            {
                let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                ui::dim(&format!("depends on: {}", deps.join(", ")));
            }
        }
    }

    for (first, second, resource) in plan.shared_resource_conflicts() {
        ui::warn(&format!(
            "'{first}' and '{second}' both manage {resource} in the same layer"
        ));
    }
    Ok(())
}
