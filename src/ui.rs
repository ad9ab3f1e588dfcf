use crate::models::AcquisitionSummary;
use crate::orchestrator::UiEvent;
use crate::task::{TaskRecord, TaskStatus};
use console::{style, Term};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub struct AcquisitionConsole {
    term: Term,
    multi_progress: MultiProgress,
    main_progress: ProgressBar,
    task_progress: ProgressBar,
    start_time: Instant,
}

impl AcquisitionConsole {
    pub fn new(quiet: bool) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let term = Term::stdout();
        let multi_progress = MultiProgress::new();

        let main_style = ProgressStyle::with_template(
            "{prefix} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% {msg}",
        )?
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["▰▱▱▱▱▱▱", "▰▰▱▱▱▱▱", "▰▰▰▱▱▱▱", "▰▰▰▰▱▱▱", "▰▰▰▰▰▱▱", "▰▰▰▰▰▰▱", "▰▰▰▰▰▰▰", "▱▰▰▰▰▰▰"]);

        let main_progress = if quiet {
            ProgressBar::hidden()
        } else {
            multi_progress.add(ProgressBar::new(100))
        };
        main_progress.set_style(main_style);
        main_progress.set_prefix(style("❄ FREEZE").cyan().bold().to_string());
        main_progress.enable_steady_tick(Duration::from_millis(120));

        let task_progress = if quiet {
            ProgressBar::hidden()
        } else {
            multi_progress.add(ProgressBar::new_spinner())
        };
        task_progress.set_style(ProgressStyle::with_template("{prefix} {msg}")?);
        task_progress.set_prefix(style("⚙ TASK").cyan().bold().to_string());

        Ok(Self {
            term,
            multi_progress,
            main_progress,
            task_progress,
            start_time: Instant::now(),
        })
    }

    /// Render events until the acquisition completes or the sender is dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<UiEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                UiEvent::Progress(percent) => self.main_progress.set_position(u64::from(percent)),
                UiEvent::TaskAdded(record) => {
                    log::debug!("UI: task added - {}", record.id);
                    self.task_progress
                        .set_message(format!("{} {}", style("Queued:").dim(), style(record.id).white()));
                }
                UiEvent::TaskUpdated(record) => self.task_updated(&record),
                UiEvent::Message(message) => self.main_progress.set_message(message),
                UiEvent::Completed(directory) => {
                    self.main_progress.finish_with_message(
                        style(format!("✅ Acquisition saved in {}", directory.display()))
                            .green()
                            .bold()
                            .to_string(),
                    );
                    self.task_progress.finish_and_clear();
                    break;
                }
            }
        }
        let _ = self.term.show_cursor();
    }

    fn task_updated(&self, record: &TaskRecord) {
        match record.status {
            TaskStatus::Running => self.task_progress.set_message(format!(
                "{} {}",
                style("Running:").dim(),
                style(record.id).white().bold()
            )),
            TaskStatus::Completed => {
                let _ = self.multi_progress.println(format!(
                    "   {} {} {}",
                    style("✓").green(),
                    style(record.id).white(),
                    style(&record.detail).dim()
                ));
            }
            TaskStatus::Failed => {
                let _ = self.multi_progress.println(format!(
                    "   {} {} {}",
                    style("✗").red().bold(),
                    style(record.id).white(),
                    style(&record.detail).red()
                ));
            }
            TaskStatus::Pending => {}
        }
    }

    pub fn print_summary(&self, summary: &AcquisitionSummary) {
        if self.main_progress.is_hidden() {
            return;
        }
        let failed = summary.failed_tasks().count();

        println!();
        println!("{}", style("╔══════════════════════════════════════════════════════════════╗").cyan());
        println!("{}", style("║                     ACQUISITION SUMMARY                      ║").cyan().bold());
        println!("{}", style("╚══════════════════════════════════════════════════════════════╝").cyan());
        println!();
        println!("   {} Case: {}", style("📁").blue(), style(&summary.case_info.name).white().bold());
        println!("   {} Target: {}", style("🌐").blue(), style(&summary.url).white().bold());
        println!(
            "   {} Tasks: {} completed, {}",
            style("⚙").blue(),
            style(summary.tasks.len() - failed).green().bold(),
            if failed > 0 {
                style(format!("{} failed", failed)).red().bold()
            } else {
                style("0 failed".to_string()).white()
            }
        );
        if let Some(time) = &summary.trusted_time {
            println!(
                "   {} Trusted time: {} ({})",
                style("⏱").blue(),
                style(time.time.to_rfc3339()).white().bold(),
                time.source
            );
        }
        match &summary.report {
            Some(report) => println!("   {} Report: {}", style("📄").blue(), style(report.display()).white().bold()),
            None => println!("   {} Report: {}", style("📄").blue(), style("not generated").red()),
        }
        for error in &summary.post_errors {
            println!("   {} {}", style("⚠").yellow(), style(error).yellow());
        }
        println!(
            "   {} Total Duration: {:.2}s",
            style("⏱").blue(),
            style(self.start_time.elapsed().as_secs_f64()).white().bold()
        );
        println!();
    }
}

impl Drop for AcquisitionConsole {
    fn drop(&mut self) {
        let _ = self.term.show_cursor();
    }
}
