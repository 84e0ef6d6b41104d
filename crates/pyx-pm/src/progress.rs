//! Progress reporting for executed operations.
//!
//! Workers never touch the terminal. They send [`ProgressEvent`]s over a
//! channel and a single [`ProgressReporter`] renders them.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

/// Where an operation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    Pending,
    Preparing,
    Downloading,
    Building,
    Cloning,
    Installing,
    Done,
    Failed,
    Skipped,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Done | OperationState::Failed | OperationState::Skipped | OperationState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "Pending",
            OperationState::Preparing => "Preparing",
            OperationState::Downloading => "Downloading",
            OperationState::Building => "Building",
            OperationState::Cloning => "Cloning",
            OperationState::Installing => "Installing",
            OperationState::Done => "Done",
            OperationState::Failed => "Failed",
            OperationState::Skipped => "Skipped",
            OperationState::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One state change of one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Index of the operation in the executed plan
    pub id: usize,
    pub state: OperationState,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(id: usize, state: OperationState, message: impl Into<String>) -> Self {
        Self {
            id,
            state,
            message: message.into(),
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Renders progress events as one line per operation
pub struct ProgressReporter {
    multi: MultiProgress,
    enabled: bool,
    bars: HashMap<usize, ProgressBar>,
}

impl ProgressReporter {
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            enabled,
            bars: HashMap::new(),
        }
    }

    /// Channel whose receiving end is consumed by [`ProgressReporter::run`]
    pub fn channel() -> (ProgressSender, mpsc::UnboundedReceiver<ProgressEvent>) {
        mpsc::unbounded_channel()
    }

    /// Consume events until every sender is dropped.
    ///
    /// Returns the final state of each operation.
    pub async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<ProgressEvent>) -> HashMap<usize, OperationState> {
        let mut states = HashMap::new();
        while let Some(event) = receiver.recv().await {
            states.insert(event.id, event.state);
            self.handle(&event);
        }
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        states
    }

    pub fn handle(&mut self, event: &ProgressEvent) {
        if !self.enabled {
            return;
        }

        let line = format_line(event);
        if event.state.is_terminal() {
            match self.bars.remove(&event.id) {
                Some(bar) => bar.finish_with_message(line),
                None => {
                    let _ = self.multi.println(format!("  {}", line));
                }
            }
            return;
        }

        let multi = &self.multi;
        let bar = self.bars.entry(event.id).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        bar.set_message(line);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true)
    }
}

fn format_line(event: &ProgressEvent) -> String {
    let state = match event.state {
        OperationState::Done => style(event.state.as_str()).green().to_string(),
        OperationState::Failed => style(event.state.as_str()).red().bold().to_string(),
        OperationState::Skipped | OperationState::Cancelled => style(event.state.as_str()).yellow().to_string(),
        _ => style(event.state.as_str()).cyan().to_string(),
    };
    format!("{} {}: {}", style("-").dim(), event.message, state)
}
