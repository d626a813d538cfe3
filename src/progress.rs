//! Progress reporting for long-running sync phases.
//!
//! Interactive runs get indicatif bars. With `--log-only` the bars are hidden
//! and a tagged line goes to the log every `interval` items instead, which
//! reads better in `tail -f` or a CI log.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// e.g. "4.2s", "3.5m"
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (ETA: {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

/// A counted phase such as "Searching" or "Adding tracks".
pub struct PhaseProgress {
    phase: String,
    total: u64,
    interval: u64,
    bar: ProgressBar,
}

impl PhaseProgress {
    pub fn new(phase: &str, total: usize) -> Self {
        let total = total as u64;
        let bar = ProgressBar::new(total);
        if is_log_only() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            bar.set_style(bar_style());
        }
        bar.set_message(phase.to_string());
        Self {
            phase: phase.to_string(),
            total,
            interval: (total / 10).max(1),
            bar,
        }
    }

    pub fn inc(&self, delta: usize) {
        let before = self.bar.position();
        self.bar.inc(delta as u64);
        let now = self.bar.position();
        if is_log_only() && (now / self.interval > before / self.interval || now == self.total) {
            let pct = 100.0 * now as f64 / self.total.max(1) as f64;
            log::info!("[{}] {}/{} ({:.1}%)", self.phase, now, self.total, pct);
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Spinner for phases of unknown length, e.g. paginated listing.
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        log::info!("[{}]", msg);
    } else {
        if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
    }
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(210)), "3.5m");
    }

    #[test]
    fn test_phase_progress_counts() {
        let progress = PhaseProgress::new("Searching", 5);
        progress.inc(2);
        progress.inc(3);
        assert_eq!(progress.bar.position(), 5);
        progress.finish();
    }
}
