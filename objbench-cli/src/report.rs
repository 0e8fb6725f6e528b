//! Console output of a benchmark run.

use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use objbench_engine::{
    DeleteStats, LoopSummary, Pause, Phase, PhaseStats, RunConfig, RunObserver, RunSummary,
};
use yansi::Paint;

use crate::config::Config;

/// Prints the settings of the run before it starts.
pub fn print_parameters(config: &Config, run: &RunConfig) {
    let storage = &config.storage;

    println!("{}", "Benchmark parameters:".bold());
    print_parameter("Endpoint URL", storage.endpoint().unwrap_or("-"));
    print_parameter("Protocol", storage.protocol());
    print_parameter("Bucket", storage.container());
    if let Some(region) = storage.region() {
        print_parameter("Region", region);
    }
    print_parameter("Test time", format!("{:?}", run.duration()));
    print_parameter("Threads", run.threads());
    print_parameter("Size", ByteSize::b(run.object_size()));
    print_parameter("Loops", run.loops());

    match run.multipart() {
        Some(multipart) => print_parameter(
            "Multipart",
            format!(
                "true, {} per part, {} parallel uploads",
                ByteSize::b(multipart.part_size),
                multipart.concurrency
            ),
        ),
        None => print_parameter("Multipart", false),
    }
    print_parameter("Max retries", config.max_retries);
    print_parameter("Payload", format!("{:?}", run.payload_mode()).to_lowercase());
}

fn print_parameter(name: &str, value: impl std::fmt::Display) {
    println!("{name:<15}{}", value.bold());
}

/// Formats the header of the phase table.
pub fn table_header() -> String {
    format!(
        "{:<9}{:<11}{:<11}{:<9}{:<12}{:<8}{:<8}",
        "Threads", "Size", "Operation", "Time", "Successful", "Failed", "MBps"
    )
}

/// Formats one row of the phase table.
pub fn table_row(stats: &PhaseStats) -> String {
    format!(
        "{:<9}{:<11}{:<11}{:<9.2}{:<12}{:<8}{:<8.2}",
        stats.threads,
        ByteSize::b(stats.object_size).to_string(),
        stats.phase.operation(),
        stats.elapsed.as_secs_f64(),
        stats.successful,
        stats.failed,
        stats.throughput_mbps(),
    )
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg} {elapsed}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}\n{wide_bar} {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Renders progress of a run on the terminal.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    spinner: Option<ProgressBar>,
    delete_bar: Option<ProgressBar>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RunObserver for ConsoleReporter {
    fn loop_started(&mut self, loop_index: u32) {
        println!();
        println!("{} {}", "## Loop".bold(), loop_index.bold().blue());
    }

    fn phase_started(&mut self, _loop_index: u32, phase: Phase) {
        if phase == Phase::Upload {
            println!("{}", table_header().bold());
        }

        let spinner = ProgressBar::new_spinner()
            .with_style(spinner_style())
            .with_message(format!("Running {phase} phase:"));
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn phase_finished(&mut self, _loop_index: u32, stats: &PhaseStats) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }

        let row = table_row(stats);
        if stats.successful == 0 {
            println!("{}", row.red());
        } else {
            println!("{row}");
        }
    }

    fn delete_started(&mut self, _loop_index: u32, objects: usize) {
        let bar = ProgressBar::new(objects as u64)
            .with_style(bar_style())
            .with_message("Deleting test objects...");
        bar.enable_steady_tick(Duration::from_millis(100));
        self.delete_bar = Some(bar);
    }

    fn delete_progress(&mut self, completed: usize, _total: usize) {
        if let Some(bar) = &self.delete_bar {
            bar.set_position(completed as u64);
        }
    }

    fn delete_finished(&mut self, _loop_index: u32, stats: &DeleteStats) {
        if let Some(bar) = self.delete_bar.take() {
            bar.finish_and_clear();
        }

        print!(
            "{} {} objects in {:.2?}",
            "Deleted".bold(),
            stats.deleted().bold(),
            stats.elapsed
        );
        if stats.failed > 0 {
            print!(", {}", format!("{} FAILURES", stats.failed).bold().red());
        }
        println!();
    }

    fn loop_finished(&mut self, _summary: &LoopSummary) {}

    async fn pause(&mut self, pause: Pause) {
        let message = match pause {
            Pause::BeforeDownload => "Uploads finished.".to_owned(),
            Pause::BeforeDelete => "Downloads finished.".to_owned(),
            Pause::BetweenLoops { completed } => format!("Loop {completed} done."),
        };
        println!("{message} Press 'Enter' to continue...");

        let read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(drop)
        })
        .await;

        match read {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(%error, "failed to read confirmation"),
            Err(error) => tracing::warn!(%error, "failed to wait for confirmation"),
        }
    }
}

/// Selects the timed statistics of a phase. Deletes are untimed and only report counts.
fn phase_stats(summary: &LoopSummary, phase: Phase) -> Option<&PhaseStats> {
    match phase {
        Phase::Upload => Some(&summary.upload),
        Phase::Download => Some(&summary.download),
        Phase::Delete => None,
    }
}

/// Prints totals after all loops completed.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "{} ({} loops, {} transferred)",
        "## TOTALS".bold(),
        summary.loops.len().bold(),
        ByteSize::b(summary.total_bytes()).bold()
    );

    for phase in [Phase::Upload, Phase::Download] {
        let stats: Vec<_> = summary
            .loops
            .iter()
            .filter_map(|summary| phase_stats(summary, phase))
            .collect();

        let successful: usize = stats.iter().map(|stats| stats.successful).sum();
        let failed: usize = stats.iter().map(|stats| stats.failed).sum();
        let p50 = stats.iter().filter_map(|stats| stats.percentile(0.5)).max();

        print!(
            "{} {} ops",
            format!("{}:", phase.operation()).bold().green(),
            successful.bold()
        );
        if failed > 0 {
            print!(", {}", format!("{failed} FAILURES").bold().red());
        }
        match p50 {
            Some(p50) => println!(" (slowest loop p50: {p50:.2?})"),
            None => println!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use objbench_engine::{TransferResult, WorkItem};

    use super::*;

    #[test]
    fn formats_table_rows() {
        let results: Vec<_> = (0..4)
            .map(|id| TransferResult {
                id: WorkItem::new(id),
                duration: Duration::from_millis(250),
                error: None,
            })
            .collect();
        let stats = PhaseStats::from_results(
            Phase::Download,
            &results,
            1_000_000,
            4,
            Duration::from_secs(2),
        );

        let header = table_header();
        let row = table_row(&stats);

        assert!(header.starts_with("Threads  Size"));
        assert_eq!(
            row.split_whitespace().collect::<Vec<_>>(),
            ["4", "976.6", "KiB", "GET", "2.00", "4", "0", "2.00"]
        );
        assert_eq!(row.find("GET"), header.find("Operation"));
    }

    #[test]
    fn totals_select_timed_phases_only() {
        let stats = |phase| PhaseStats::from_results(phase, &[], 1024, 2, Duration::from_secs(1));
        let summary = LoopSummary {
            loop_index: 1,
            upload: stats(Phase::Upload),
            download: stats(Phase::Download),
            delete: DeleteStats {
                attempted: 3,
                failed: 0,
                elapsed: Duration::from_millis(20),
            },
        };

        let selected = |phase| phase_stats(&summary, phase).map(|stats| stats.phase);
        assert_eq!(selected(Phase::Upload), Some(Phase::Upload));
        assert_eq!(selected(Phase::Download), Some(Phase::Download));
        assert_eq!(selected(Phase::Delete), None);
    }
}
