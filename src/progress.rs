// src/progress.rs

//! Progress reporting for catalog updates
//!
//! An update attempt moves through four stages and reports a
//! `(current, total)` pair for each, where the total may be unknown. The
//! [`UpdateProgress`] trait is the reporting surface; implementations
//! include:
//! - `SilentProgress`: No-op for scripted/quiet modes
//! - `LogProgress`: Logs progress to tracing
//! - `CallbackProgress`: Forwards events to a closure
//! - `CliProgress`: Visual progress bars using indicatif

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::fmt;
use tracing::info;

/// Stage of an update attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateStage {
    /// Fetching the index archive (bytes)
    Download,
    /// Parsing the catalog entry (bytes)
    Process,
    /// Replaying merged records into the staging area (records)
    Merge,
    /// Finalizing the staged catalog
    Commit,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStage::Download => write!(f, "download"),
            UpdateStage::Process => write!(f, "process"),
            UpdateStage::Merge => write!(f, "merge"),
            UpdateStage::Commit => write!(f, "commit"),
        }
    }
}

/// Receiver of update progress
///
/// Implementations must be thread-safe (Send + Sync); updates may run on a
/// background worker.
pub trait UpdateProgress: Send + Sync {
    fn report(&self, stage: UpdateStage, current: u64, total: Option<u64>);
}

/// Silent progress tracker (no-op)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl UpdateProgress for SilentProgress {
    fn report(&self, _stage: UpdateStage, _current: u64, _total: Option<u64>) {}
}

/// Logging progress tracker
///
/// Logs at info level on every stage change and roughly every 10% within a
/// stage with a known total.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    /// Last stage seen and the last logged decile within it
    last: Mutex<Option<(UpdateStage, u64)>>,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last: Mutex::new(None),
        }
    }
}

impl UpdateProgress for LogProgress {
    fn report(&self, stage: UpdateStage, current: u64, total: Option<u64>) {
        let decile = match total {
            Some(total) if total > 0 => (current.min(total) * 10) / total,
            _ => 0,
        };

        let mut last = self.last.lock();
        match *last {
            Some((seen, logged)) if seen == stage && logged >= decile => return,
            _ => {}
        }
        *last = Some((stage, decile));
        drop(last);

        match total {
            Some(total) if total > 0 => info!(
                "{}: {} {}% ({}/{})",
                self.name,
                stage,
                decile * 10,
                current,
                total
            ),
            _ => info!("{}: {} ({})", self.name, stage, current),
        }
    }
}

/// Event emitted by [`CallbackProgress`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: UpdateStage,
    pub current: u64,
    pub total: Option<u64>,
}

/// Callback-based progress tracker
///
/// Calls a user-provided function on every report. Useful for custom
/// progress handling or notification layers.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> UpdateProgress for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, stage: UpdateStage, current: u64, total: Option<u64>) {
        (self.callback)(ProgressEvent {
            stage,
            current,
            total,
        });
    }
}

/// Terminal progress bars, one per stage
pub struct CliProgress {
    name: String,
    bar: Mutex<Option<(UpdateStage, ProgressBar)>>,
}

impl CliProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bar: Mutex::new(None),
        }
    }

    fn create_bar(&self, stage: UpdateStage, total: Option<u64>) -> ProgressBar {
        let (bar, template) = match (stage, total) {
            (UpdateStage::Download | UpdateStage::Process, Some(total)) => (
                ProgressBar::new(total),
                "{msg} [{bar:30}] {bytes}/{total_bytes}",
            ),
            (_, Some(total)) => (ProgressBar::new(total), "{msg} [{bar:30}] {pos}/{len}"),
            (_, None) => (ProgressBar::new_spinner(), "{spinner} {msg}"),
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style);
        }
        bar.set_message(format!("{} ({stage})", self.name));
        bar
    }

    /// Finish the bar of the current stage, if any
    pub fn finish(&self) {
        if let Some((_, bar)) = self.bar.lock().take() {
            bar.finish_and_clear();
        }
    }
}

impl UpdateProgress for CliProgress {
    fn report(&self, stage: UpdateStage, current: u64, total: Option<u64>) {
        let mut slot = self.bar.lock();
        let same_stage = matches!(&*slot, Some((seen, _)) if *seen == stage);
        if !same_stage {
            if let Some((_, old)) = slot.take() {
                old.finish_and_clear();
            }
            *slot = Some((stage, self.create_bar(stage, total)));
        }
        if let Some((_, bar)) = slot.as_ref() {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(current);
        }
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.finish();
    }
}
