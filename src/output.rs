//! Terminal output: stderr lines, the log subscriber, and download progress.

use std::io::Write;
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::filter::LevelFilter;
use weightsync_fetcher::progress::{Progress, ProgressObserver};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg} {bytes} ({bytes_per_sec})";
const BAR_CHARS: &str = "=> ";

/// Write `message` and a newline, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; nothing sensible to do on failure.
    }
}

/// Write `message` and a newline to standard output, ignoring failures.
pub fn write_stdout_line(stdout: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stdout, "{message}").is_err() {
        // A closed pipe is not an error worth reporting.
    }
}

/// Map `-q` and `-v` counts onto a log level.
#[must_use]
pub const fn level_filter(quiet: bool, verbosity: u8) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install a stderr subscriber that also receives `log` records from the
/// library crates.
pub fn install_logging(filter: LevelFilter) {
    let installed = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
    if installed.is_err() {
        // A subscriber is already in place; keep it.
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .map_or_else(|_| ProgressStyle::default_bar(), |style| style.progress_chars(BAR_CHARS))
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Draws one `indicatif` bar per download on stderr.
///
/// Downloads with an unknown length show a spinner; the bar switches to a
/// bounded style as soon as a total is reported.
pub struct TerminalProgress {
    current: Mutex<Option<ProgressBar>>,
    target: fn() -> ProgressDrawTarget,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            target: ProgressDrawTarget::stderr,
        }
    }
}

impl TerminalProgress {
    fn bar(&self) -> Option<ProgressBar> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }

    fn replace(&self, next: Option<ProgressBar>) -> Option<ProgressBar> {
        match self.current.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, next),
            Err(_) => None,
        }
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_start(&self, url: &str, destination: &str) {
        let bar = ProgressBar::with_draw_target(None, (self.target)())
            .with_style(spinner_style())
            .with_message(destination.to_owned());
        bar.println(format!("Downloading {url}"));
        if let Some(previous) = self.replace(Some(bar)) {
            previous.finish_and_clear();
        }
    }

    fn on_progress(&self, _url: &str, progress: Progress) {
        let Some(bar) = self.bar() else {
            return;
        };
        if let Some(total) = progress.total.filter(|total| bar.length() != Some(*total)) {
            bar.set_length(total);
            bar.set_style(bar_style());
        }
        bar.set_position(progress.transferred);
    }

    fn on_finish(&self, _url: &str) {
        if let Some(bar) = self.replace(None) {
            bar.finish_and_clear();
        }
    }
}
