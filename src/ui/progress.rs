use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::orchestrator::{RunObserver, RunStatus};
use crate::stage::Stage;
use crate::ui::icons::{CHECK, CROSS, CYCLE, FLAG, IDLE, PAUSE, WARN};
use crate::workers::Outcome;

/// Terminal rendering of a run: one spinner for the stage in flight and a
/// printed line per finished stage.
pub struct RunProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl RunProgress {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
                .expect("progress bar template is a valid static string"),
        );
        bar.set_prefix("Stage");
        Self { bar, verbose }
    }

    /// Print above the spinner, falling back to stderr when it cannot draw.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.bar.is_hidden() {
            eprintln!("{}", msg.as_ref());
        } else {
            self.bar.println(msg.as_ref());
        }
    }

    fn outcome_line(step: u32, stage: Stage, outcome: &Outcome) -> String {
        let head = format!("{:>3}. {}", step, stage.title());
        match outcome {
            Outcome::Success => format!("{}{}", CHECK, head),
            Outcome::Idle => format!("{}{} {}", IDLE, head, style("(nothing to do)").dim()),
            Outcome::Degraded { reason } => {
                format!("{}{} {}", WARN, head, style(format!("(degraded: {})", reason)).yellow())
            }
            Outcome::TaskError { task_id, reason } => format!(
                "{}{} {}",
                CROSS,
                head,
                style(format!("(task {} failed: {})", task_id, reason)).red()
            ),
        }
    }
}

impl RunObserver for RunProgress {
    fn stage_started(&self, _run_id: &str, step: u32, stage: Stage) {
        self.bar
            .set_message(format!("{} {}", style(step).cyan(), stage.title()));
        self.bar.enable_steady_tick(Duration::from_millis(100));
    }

    fn stage_finished(&self, _run_id: &str, step: u32, stage: Stage, outcome: &Outcome, entry: &str) {
        self.print_line(Self::outcome_line(step, stage, outcome));
        if self.verbose {
            self.print_line(format!("       {}", style(crate::util::truncate(entry, 200)).dim()));
        }
        if stage == Stage::Reengage {
            self.print_line(format!("{}Starting a new project cycle", CYCLE));
        }
    }

    fn run_finished(&self, run_id: &str, status: RunStatus, steps: u32) {
        self.bar.finish_and_clear();
        let line = match status {
            RunStatus::Completed => format!(
                "{}Run {} completed after {} step(s)",
                FLAG,
                style(run_id).bold(),
                steps
            ),
            _ => format!(
                "{}Run {} paused ({}) after {} step(s). Continue with `conductor resume {}`",
                PAUSE,
                style(run_id).bold(),
                status,
                steps,
                run_id
            ),
        };
        println!("{}", line);
    }
}
