//! Terminal progress for transfers

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::Formatter;

const BYTES_TEMPLATE: &str =
    "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {msg}";
const STREAM_TEMPLATE: &str = "{spinner:.green} {bytes} {bytes_per_sec} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} ({elapsed})";

/// Progress bar that is drawn only on an attended terminal
#[derive(Debug, Clone)]
pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    /// Byte progress; a bar when the total is known, a spinner otherwise
    pub fn bytes(formatter: &Formatter, total: Option<u64>, message: &str) -> Self {
        if !formatter.show_progress() {
            return Self { bar: None };
        }
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(style(BYTES_TEMPLATE).progress_chars("#>-"));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(style(STREAM_TEMPLATE));
                bar
            }
        };
        bar.set_message(message.to_string());
        Self { bar: Some(bar) }
    }

    /// Activity indicator for work that reports no byte counts
    pub fn spinner(formatter: &Formatter, message: &str) -> Self {
        if !formatter.show_progress() {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(style(SPINNER_TEMPLATE));
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar: Some(bar) }
    }

    pub fn inc(&self, n: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(n);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
