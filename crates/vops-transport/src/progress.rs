//! Terminal spinner and the elapsed-time reporter shown while waiting on hosts.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Progress indicator for one operation. Cheap to clone.
#[derive(Clone)]
pub struct Spinner {
    bar: ProgressBar,
    description: String,
}

impl Spinner {
    pub fn new(description: &str) -> Self {
        let style = ProgressStyle::with_template("{spinner:.green} {prefix}: {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_prefix(description.to_string());
        bar.set_message("in progress");
        Self {
            bar,
            description: description.to_string(),
        }
    }

    /// Hidden spinner, for non-terminal output.
    pub fn hidden(description: &str) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            description: description.to_string(),
        }
    }

    pub fn start(&self) {
        self.bar.enable_steady_tick(SPINNER_TICK);
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.bar.set_message(msg.into());
    }

    pub fn finish(&self, msg: impl Into<String>) {
        if !self.bar.is_finished() {
            self.bar.finish_with_message(format!("✔ {}", msg.into()));
        }
    }

    pub fn fail(&self, msg: impl Into<String>) {
        if !self.bar.is_finished() {
            self.bar.abandon_with_message(format!("✘ {}", msg.into()));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Spinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spinner")
            .field("description", &self.description)
            .finish()
    }
}

/// Background task that reports elapsed time on a fixed cadence. The task
/// is aborted when the reporter is dropped.
pub struct ElapsedReporter {
    handle: JoinHandle<()>,
}

impl ElapsedReporter {
    pub fn spawn(name: String, host_count: usize, every: Duration, spinner: Option<Spinner>) -> Self {
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed().as_secs();
                match &spinner {
                    Some(s) => s.set_message(format!("in progress, {elapsed}s elapsed")),
                    None => tracing::info!(
                        "[{name}] waiting on {host_count} host(s), {elapsed}s elapsed"
                    ),
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ElapsedReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
