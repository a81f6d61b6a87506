//! Progress bar for converge runs

use declarative::{ProgressCallback, Task, TaskOutcome, TaskResult};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Progress bar over all tasks of a plan
///
/// Called from rayon workers; `ProgressBar` is internally synchronized.
pub struct TaskProgress {
    pb: ProgressBar,
}

impl TaskProgress {
    pub fn new(total: usize, visible: bool) -> Self {
        let pb = if visible {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Self { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressCallback for TaskProgress {
    fn on_layer_start(&self, index: usize, count: usize) {
        log::debug!("Layer {} of {}", index + 1, count);
    }

    fn on_task_start(&self, task: &Task) {
        self.pb.set_message(ui::truncate(&task.name, 40));
    }

    fn on_task_complete(&self, outcome: &TaskOutcome) {
        if let TaskResult::Failed = outcome.result {
            let name = outcome.task_name.clone();
            self.pb.suspend(|| ui::error(&format!("{name} failed")));
        }
        self.pb.inc(1);
    }

    fn on_layer_complete(&self, _index: usize) {}
}
