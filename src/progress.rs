//! Progress reporting and transient notifications
//!
//! Sync operations never print by themselves; they talk to a
//! [`ProgressReporter`] so the CLI can choose between plain stderr lines and
//! interactive progress bars.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{cache::EntityKind, model::UploadStatus};

/// Phase of the current session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    LoadingConfig,
    /// Fetching and merging one entity collection
    Fetching(EntityKind),
    Uploading,
    Generating,
    Saving,
    Completed,
    Failed(String),
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoadingConfig => f.write_str("📋 Loading configuration..."),
            Self::Fetching(kind) => write!(f, "🔄 Loading {kind}..."),
            Self::Uploading => f.write_str("☁️  Uploading images..."),
            Self::Generating => f.write_str("✨ Generating content..."),
            Self::Saving => f.write_str("💾 Saving content..."),
            Self::Completed => f.write_str("✅ Completed!"),
            Self::Failed(reason) => write!(f, "❌ Failed: {reason}"),
        }
    }
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn icon(self) -> &'static str {
        match self {
            Self::Info => "ℹ️ ",
            Self::Warning => "⚠️ ",
            Self::Error => "❌",
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn set_phase(&self, phase: SyncPhase);

    /// Images queued for upload, by display name. Called before the first
    /// batch starts.
    fn track_images(&self, names: Vec<String>);

    fn image_status(&self, name: &str, status: UploadStatus);

    /// Successful uploads so far out of `total`.
    fn batch_settled(&self, succeeded: usize, total: usize);

    /// Transient notification shown to the surveyor.
    fn notify(&self, level: Level, message: &str);

    fn finish(&self);
}

pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: SyncPhase) {}
    fn track_images(&self, _names: Vec<String>) {}
    fn image_status(&self, _name: &str, _status: UploadStatus) {}
    fn batch_settled(&self, _succeeded: usize, _total: usize) {}
    fn notify(&self, _level: Level, _message: &str) {}
    fn finish(&self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upload and notification counts of one run.
#[derive(Debug, Default)]
struct Tally {
    images: usize,
    uploaded: usize,
    failed: usize,
    errors: usize,
    started: Option<Instant>,
}

impl Tally {
    fn started() -> Mutex<Self> {
        Mutex::new(Self {
            started: Some(Instant::now()),
            ..Default::default()
        })
    }

    fn settle(&mut self, status: UploadStatus) {
        match status {
            UploadStatus::Success => self.uploaded += 1,
            UploadStatus::Failed => self.failed += 1,
            UploadStatus::Pending | UploadStatus::Uploading => {}
        }
    }

    fn summary(&self) -> Vec<String> {
        if self.images == 0 && self.errors == 0 {
            return Vec::new();
        }
        let mut lines = Vec::new();
        if self.images > 0 {
            lines.push(format!(
                "🖼️  {} of {} images uploaded",
                self.uploaded, self.images
            ));
        }
        if self.failed > 0 {
            lines.push(format!("❌ {} uploads failed", self.failed));
        }
        if self.errors > 0 {
            lines.push(format!("⚠️  {} errors reported", self.errors));
        }
        let elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
        lines.push(format!("⏱️  {:.2}s", elapsed.as_secs_f64()));
        lines
    }

    fn print(&self) {
        let lines = self.summary();
        if lines.is_empty() {
            return;
        }
        eprintln!();
        for line in lines {
            eprintln!("   {line}");
        }
    }
}

/// One stderr line per event, for pipes and CI logs.
pub struct LineReporter {
    tally: Mutex<Tally>,
}

impl Default for LineReporter {
    fn default() -> Self {
        Self {
            tally: Tally::started(),
        }
    }
}

impl ProgressReporter for LineReporter {
    fn set_phase(&self, phase: SyncPhase) {
        eprintln!("{phase}");
    }

    fn track_images(&self, names: Vec<String>) {
        lock(&self.tally).images += names.len();
        eprintln!("   {} pending images", names.len());
    }

    fn image_status(&self, name: &str, status: UploadStatus) {
        lock(&self.tally).settle(status);
        match status {
            UploadStatus::Success => eprintln!("   ✓ {name}"),
            UploadStatus::Failed => eprintln!("   ✗ {name}"),
            UploadStatus::Pending | UploadStatus::Uploading => {}
        }
    }

    fn batch_settled(&self, succeeded: usize, total: usize) {
        eprintln!("   {succeeded}/{total} uploaded");
    }

    fn notify(&self, level: Level, message: &str) {
        if level == Level::Error {
            lock(&self.tally).errors += 1;
        }
        eprintln!("{} {message}", level.icon());
    }

    fn finish(&self) {
        lock(&self.tally).print();
    }
}

/// Spinner for the current phase plus one bar per upload run.
pub struct BarReporter {
    multi: indicatif::MultiProgress,
    phase: indicatif::ProgressBar,
    uploads: Mutex<Option<indicatif::ProgressBar>>,
    /// Spinner of each image while it is uploading.
    in_flight: Mutex<HashMap<String, indicatif::ProgressBar>>,
    tally: Mutex<Tally>,
}

fn style(template: &str) -> indicatif::ProgressStyle {
    indicatif::ProgressStyle::with_template(template)
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner())
}

impl Default for BarReporter {
    fn default() -> Self {
        let multi = indicatif::MultiProgress::new();
        let phase = multi.add(indicatif::ProgressBar::new_spinner());
        phase.set_style(style("{spinner:.cyan} {msg}"));
        phase.enable_steady_tick(Duration::from_millis(100));
        Self {
            multi,
            phase,
            uploads: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
            tally: Tally::started(),
        }
    }
}

impl ProgressReporter for BarReporter {
    fn set_phase(&self, phase: SyncPhase) {
        let done = matches!(phase, SyncPhase::Completed | SyncPhase::Failed(_));
        if done {
            self.phase.finish_with_message(phase.to_string());
        } else {
            self.phase.set_message(phase.to_string());
        }
    }

    fn track_images(&self, names: Vec<String>) {
        lock(&self.tally).images += names.len();
        let bar = self
            .multi
            .add(indicatif::ProgressBar::new(names.len() as u64));
        bar.set_style(
            style("   {bar:40.cyan/blue} {pos}/{len} images").progress_chars("█▓▒░  "),
        );
        if let Some(previous) = lock(&self.uploads).replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn image_status(&self, name: &str, status: UploadStatus) {
        let mut in_flight = lock(&self.in_flight);
        match status {
            UploadStatus::Uploading => {
                let spinner = in_flight.entry(name.to_owned()).or_insert_with(|| {
                    let spinner = self.multi.add(indicatif::ProgressBar::new_spinner());
                    spinner.set_style(style("   {spinner} {msg}"));
                    spinner.enable_steady_tick(Duration::from_millis(100));
                    spinner
                });
                spinner.set_message(format!("{name}: {status}"));
            }
            UploadStatus::Success | UploadStatus::Failed => {
                if let Some(spinner) = in_flight.remove(name) {
                    spinner.finish_and_clear();
                }
                lock(&self.tally).settle(status);
                if status == UploadStatus::Failed {
                    self.multi.println(format!("❌ {name}")).ok();
                }
            }
            UploadStatus::Pending => {}
        }
    }

    fn batch_settled(&self, succeeded: usize, total: usize) {
        if let Some(bar) = lock(&self.uploads).as_ref() {
            bar.set_position(succeeded as u64);
        }
        self.phase
            .set_message(format!("☁️  {succeeded}/{total} uploaded"));
    }

    fn notify(&self, level: Level, message: &str) {
        if level == Level::Error {
            lock(&self.tally).errors += 1;
        }
        self.multi
            .println(format!("{} {message}", level.icon()))
            .ok();
    }

    fn finish(&self) {
        for (_, spinner) in lock(&self.in_flight).drain() {
            spinner.finish_and_clear();
        }
        if let Some(bar) = lock(&self.uploads).take() {
            bar.finish_and_clear();
        }
        self.phase.finish_and_clear();
        lock(&self.tally).print();
    }
}

/// Bars on a terminal, plain lines otherwise.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    if console::Term::stderr().is_term() {
        Arc::new(BarReporter::default())
    } else {
        Arc::new(LineReporter::default())
    }
}
