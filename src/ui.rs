//! Terminal output: a spinner while a task runs, colored final status.
//!
//! Uses `indicatif` for the spinner and `console` for styling.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use mlpipe::queue::TaskId;
use mlpipe::status::{StatusResponse, TaskStatus};

/// Spinner that follows one task from submission to a terminal status.
pub struct TaskProgress {
    /// Spinner showing the latest polled status.
    pb: ProgressBar,
    /// Success marker.
    green: Style,
    /// Failure marker.
    red: Style,
    /// Informational lines printed above the spinner.
    yellow: Style,
}

impl TaskProgress {
    pub fn start(workflow: &str, task_id: &TaskId) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{workflow} {task_id}: PENDING"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Note a submitted task before polling begins.
    pub fn submitted(&self, task_id: &TaskId) {
        self.pb
            .println(format!("  {} submitted {task_id}", self.yellow.apply_to("→")));
    }

    /// Reflect the latest polled status in the spinner.
    pub fn update(&self, status: &TaskStatus) {
        let message = match status {
            TaskStatus::Started(Some(progress)) => match &progress.detail {
                Some(detail) => format!("STARTED: {} ({detail})", progress.stage),
                None => format!("STARTED: {}", progress.stage),
            },
            other => other.label().to_string(),
        };
        self.pb.set_message(message);
    }

    /// Stop the spinner and print the terminal status line.
    pub fn finish(&self, response: &StatusResponse) {
        self.pb.finish_and_clear();
        match response.status {
            "SUCCESS" => println!("  {} Task {} succeeded", self.green.apply_to("✓"), response.task_id),
            _ => println!(
                "  {} Task {} failed: {}",
                self.red.apply_to("✗"),
                response.task_id,
                response.error.as_deref().unwrap_or("Unknown error")
            ),
        }
    }
}

/// Print `value` as pretty JSON under a colored heading.
pub fn print_json<T: serde::Serialize>(heading: &str, value: &T, ok: bool) {
    let style = if ok {
        Style::new().green().bold()
    } else {
        Style::new().red().bold()
    };
    println!();
    println!("{}", style.apply_to(format!("─── {heading} ───")));
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Print a synchronous rejection.
pub fn print_rejection(message: &str) {
    eprintln!("  {} {message}", Style::new().red().bold().apply_to("✗"));
}
