//! `converge apply` - converge a host to a task file

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use declarative::{
    ApplyContext, AutoConfirm, CancelToken, ConfirmCallback, ExecuteOptions, RunReport,
    StandardResolver, TargetDescriptor, TaskResult, execute, planner,
};
use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::{ReportFormat, Settings, TaskFile};
use crate::progress::TaskProgress;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let settings = Settings::load()?;
    let (report, declined) = converge(ctx, &args, &settings, &mut io::stdout())?;
    check_outcome(&report, declined)
}

/// Non-zero exit exactly when the run did not succeed
fn check_outcome(report: &RunReport, declined: bool) -> Result<()> {
    if declined {
        bail!("Aborted; {} task(s) not run", report.not_run.len());
    }
    if report.is_cancelled() {
        bail!("Run cancelled; {} task(s) not run", report.not_run.len());
    }
    if let Some(name) = report.failed_task() {
        bail!("Task '{name}' failed");
    }
    Ok(())
}

/// Run a task file and write its report to `out`
///
/// Returns the report and whether the confirmation prompt was declined.
/// In JSON mode `out` receives nothing but the report; warnings go to stderr.
fn converge(
    ctx: &Context,
    args: &ApplyArgs,
    settings: &Settings,
    out: &mut dyn Write,
) -> Result<(RunReport, bool)> {
    let file = TaskFile::load(&args.file)?;

    let mut vars = file.string_vars()?;
    vars.extend(args.vars.iter().cloned());

    let target = resolve_target(file.target.clone(), args);
    let plan = planner::build(file.tasks)
        .with_context(|| format!("Invalid task graph in {}", args.file.display()))?;

    let format = args.format.unwrap_or(settings.report_format);
    let text = format == ReportFormat::Text;

    for (first, second, resource) in plan.shared_resource_conflicts() {
        let msg =
            format!("'{first}' and '{second}' both manage {resource} in the same layer; add a depends_on");
        if text {
            ui::warn(&msg);
        } else {
            log::warn!("{msg}");
        }
    }

    let transport = target
        .connect(&settings.ssh_options)
        .context("Could not set up connection")?;

    let options = ExecuteOptions {
        check: args.check,
        diff: args.diff,
        jobs: args.jobs.unwrap_or(settings.jobs),
    };

    let cancel = CancelToken::new();
    if let Some(secs) = args.timeout {
        let token = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            log::warn!("Timeout of {secs}s reached, cancelling");
            token.cancel();
        });
    }

    let apply_ctx = ApplyContext::new(transport.as_ref(), &StandardResolver)
        .with_options(options.clone())
        .with_vars(vars)
        .with_base_dir(TaskFile::base_dir(&args.file))
        .with_cancel(cancel);

    if text && !ctx.quiet {
        ui::header(&format!("converge {}", args.file.display()));
        ui::kv("target", &transport.target());
        ui::kv("tasks", &plan.len().to_string());
        ui::kv("layers", &plan.layers().len().to_string());
        ui::kv("jobs", &options.jobs.to_string());
        if options.check {
            ui::kv("mode", "check (no changes)");
        }
        println!();
    }

    let progress = TaskProgress::new(plan.len(), text && !ctx.quiet);
    let (report, declined) = if args.yes || options.check {
        (execute(&plan, &apply_ctx, &progress, &mut AutoConfirm)?, false)
    } else {
        let mut confirm = PromptConfirm::default();
        let report = execute(&plan, &apply_ctx, &progress, &mut confirm)?;
        (report, confirm.declined)
    };
    progress.finish();

    match format {
        ReportFormat::Json => writeln!(out, "{}", report.to_json()?)?,
        ReportFormat::Text => print_report(ctx, &report, options.check),
    }

    Ok((report, declined))
}

/// Task-file target with command-line overrides applied
///
/// `--host` replaces the whole connection; the remaining flags override
/// individual fields.
fn resolve_target(file_target: Option<TargetDescriptor>, args: &ApplyArgs) -> TargetDescriptor {
    let mut target = match &args.host {
        Some(host) => TargetDescriptor {
            host: host.clone(),
            ..Default::default()
        },
        None => file_target.unwrap_or_else(TargetDescriptor::local),
    };
    if let Some(user) = &args.user {
        target.user = Some(user.clone());
    }
    if let Some(auth) = &args.auth_ref {
        target.auth_reference = Some(auth.clone());
    }
    if let Some(port) = args.port {
        target.port = Some(port);
    }
    target.become_root |= args.become_root;
    target
}

/// Interactive confirmation; a non-interactive terminal counts as "no"
#[derive(Default)]
struct PromptConfirm {
    declined: bool,
}

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or_else(|e| {
                log::warn!("Could not prompt for confirmation: {e}");
                false
            });
        self.declined = !confirmed;
        confirmed
    }
}

fn print_report(ctx: &Context, report: &RunReport, check: bool) {
    for outcome in &report.outcomes {
        let glyph = match outcome.result {
            TaskResult::Changed if check => "~".yellow(),
            TaskResult::Changed => "✓".yellow(),
            TaskResult::Unchanged => "✓".green(),
            TaskResult::Failed => "✗".red(),
        };
        let name = match outcome.result {
            TaskResult::Failed => outcome.task_name.red().bold(),
            _ => outcome.task_name.normal(),
        };

        if ctx.quiet && outcome.result == TaskResult::Unchanged {
            continue;
        }
        println!(
            "  {} {} {}",
            glyph,
            name,
            ui::format_duration(outcome.duration_ms()).dimmed()
        );

        let show_detail = outcome.result != TaskResult::Unchanged || ctx.verbose > 0;
        if show_detail && !outcome.detail.is_empty() {
            for line in outcome.detail.lines() {
                if line.starts_with('+') && !line.starts_with("+++") {
                    println!("      {}", line.green());
                } else if line.starts_with('-') && !line.starts_with("---") {
                    println!("      {}", line.red());
                } else {
                    println!("      {}", line.dimmed());
                }
            }
        }
    }

    for name in &report.not_run {
        println!("  {} {}", "○".dimmed(), name.dimmed());
    }

    let summary = report.summary();
    let changed_label = if check { "would change" } else { "changed" };
    println!();
    println!(
        "  {} {}, {} unchanged, {} failed, {} not run ({})",
        summary.changed.to_string().yellow(),
        changed_label,
        summary.unchanged.to_string().green(),
        summary.failed.to_string().red(),
        summary.not_run,
        ui::format_duration(report.duration_ms())
    );

    if report.is_success() {
        if check {
            ui::info("Check mode - no changes made");
        } else if summary.changed == 0 {
            ui::success("Already converged");
        } else {
            ui::success("Converged");
        }
    } else if report.is_cancelled() {
        ui::error("Run cancelled");
    } else if let Some(name) = report.failed_task() {
        ui::error(&format!("Failed at '{name}'"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use declarative::{AutoDecline, LocalTransport, NoProgress, Params, Task, TaskKind};
    use std::fs;

    fn apply_args(extra: &[&str]) -> ApplyArgs {
        let mut argv = vec!["converge", "apply", "site.toml"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Apply(args) => args,
            _ => panic!("expected apply"),
        }
    }

    fn file_target() -> TargetDescriptor {
        TargetDescriptor {
            host: "web1".to_string(),
            user: Some("deploy".to_string()),
            auth_reference: Some("agent".to_string()),
            port: Some(2222),
            become_root: false,
        }
    }

    #[test]
    fn test_no_target_is_local() {
        let target = resolve_target(None, &apply_args(&[]));
        assert!(target.is_local());
    }

    #[test]
    fn test_file_target_with_field_overrides() {
        let args = apply_args(&["--user", "root", "--become"]);
        let target = resolve_target(Some(file_target()), &args);
        assert_eq!(target.host, "web1");
        assert_eq!(target.user.as_deref(), Some("root"));
        assert_eq!(target.port, Some(2222));
        assert!(target.become_root);
    }

    #[test]
    fn test_host_flag_replaces_connection() {
        let args = apply_args(&["--host", "db1"]);
        let target = resolve_target(Some(file_target()), &args);
        assert_eq!(target.host, "db1");
        assert_eq!(target.user, None);
        assert_eq!(target.port, None);
    }

    #[test]
    fn test_json_output_is_only_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("app.env");
        fs::write(&env_file, "PORT=80\n").unwrap();
        let task_file = dir.path().join("site.toml");
        let path = env_file.display();
        fs::write(
            &task_file,
            format!(
                r#"
[target]
host = "localhost"

[[tasks]]
name = "port"
kind = "line-in-file"
depends_on = []
parameters = {{ path = "{path}", match_pattern = "^PORT=", replacement_line = "PORT=8080" }}

[[tasks]]
name = "debug"
kind = "line-in-file"
depends_on = []
parameters = {{ path = "{path}", match_pattern = "^DEBUG=", replacement_line = "DEBUG=0" }}
"#
            ),
        )
        .unwrap();

        let mut args = apply_args(&["--check", "--format", "json"]);
        args.file = task_file;
        let ctx = Context {
            verbose: 0,
            quiet: false,
        };

        let mut out = Vec::new();
        let (report, declined) = converge(&ctx, &args, &Settings::default(), &mut out).unwrap();
        assert!(!declined);
        assert!(report.is_success());

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(fs::read_to_string(&env_file).unwrap(), "PORT=80\n");
    }

    #[test]
    fn test_declined_run_reports_and_fails() {
        let transport = LocalTransport::new();
        let ctx = ApplyContext::new(&transport, &StandardResolver);
        let plan = planner::build(vec![Task::new(
            "marker",
            TaskKind::CommandIfAbsent,
            Params::new()
                .with("command", "touch /nonexistent/marker")
                .with("creates", "/nonexistent/marker"),
        )])
        .unwrap();

        let report = execute(&plan, &ctx, &NoProgress, &mut AutoDecline).unwrap();
        assert!(report.is_cancelled());
        assert_eq!(report.not_run, vec!["marker".to_string()]);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "failed");

        let err = check_outcome(&report, true).unwrap_err();
        assert!(err.to_string().starts_with("Aborted"));
    }

    #[test]
    fn test_successful_run_exits_zero() {
        let transport = LocalTransport::new();
        let ctx = ApplyContext::new(&transport, &StandardResolver);
        let plan = planner::build(Vec::new()).unwrap();
        let report = execute(&plan, &ctx, &NoProgress, &mut AutoConfirm).unwrap();
        assert!(check_outcome(&report, false).is_ok());
    }
}
