//! Terminal rendering of progress events.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use mangaport_core::progress::ProgressSink;
use mangaport_core::{EnrichStats, LogKind, ProgressEvent};
use owo_colors::OwoColorize;

/// Where progress events go.
#[derive(Clone)]
pub enum Output {
    /// One JSON object per line on stdout, for a driving process.
    JsonLines,
    /// A percent bar with colored log lines printed above it.
    Terminal { bar: ProgressBar, color: bool },
}

impl Output {
    pub fn json_lines() -> Self {
        Output::JsonLines
    }

    pub fn terminal(color: bool) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Output::Terminal { bar, color }
    }

    pub fn emit(&self, event: &ProgressEvent) {
        match self {
            Output::JsonLines => match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("failed to encode progress event: {e}"),
            },
            Output::Terminal { bar, color } => {
                bar.set_position(event.percent as u64);
                bar.set_message(step_name(event.step));
                bar.println(format_line(event, *color));
            }
        }
    }

    /// Sink handed to the enrichment engine.
    pub fn sink(&self) -> ProgressSink {
        let output = self.clone();
        Arc::new(move |event| output.emit(&event))
    }

    pub fn finish(&self) {
        if let Output::Terminal { bar, .. } = self {
            bar.finish_and_clear();
        }
    }

    /// Print the end-of-run summary; JSON mode emits it as a final object.
    pub fn summary(&self, stats: &EnrichStats) {
        match self {
            Output::JsonLines => match serde_json::to_string(&serde_json::json!({ "summary": stats })) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("failed to encode summary: {e}"),
            },
            Output::Terminal { color, .. } => {
                let lines = [
                    format!("  Titles:          {}", stats.total),
                    format!("  Matched:         {}", stats.matched),
                    format!("  Low confidence:  {}", stats.low_confidence),
                    format!("  Unmatched:       {}", stats.unmatched),
                    format!("  Lookup failures: {}", stats.failed),
                    format!("  Skipped labels:  {}", stats.skipped),
                ];
                println!();
                if *color {
                    println!("{}", "Summary".bold());
                } else {
                    println!("Summary");
                }
                for line in lines {
                    println!("{line}");
                }
                if stats.cancelled > 0 {
                    let line = format!("  Not processed:   {}", stats.cancelled);
                    if *color {
                        println!("{}", line.yellow());
                    } else {
                        println!("{line}");
                    }
                }
            }
        }
    }
}

fn step_name(step: u32) -> &'static str {
    match step {
        0 => "scraping",
        1 => "matching",
        2 => "generating",
        _ => "saving",
    }
}

/// `[ 42%] message`, colored by kind.
pub fn format_line(event: &ProgressEvent, color: bool) -> String {
    let prefix = format!("[{:>3}%]", event.percent);
    if !color {
        return format!("{prefix} {}", event.message);
    }
    let message = match event.kind {
        LogKind::Info => event.message.clone(),
        LogKind::Success => event.message.green().to_string(),
        LogKind::Warning => event.message.yellow().to_string(),
        LogKind::Error => event.message.red().bold().to_string(),
    };
    format!("{} {message}", prefix.dimmed())
}
