use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::sync::Mutex;

/// Progress display for the package download phase.
///
/// Hidden bars are handed out when drawing is disabled, so callers never branch on it.
pub struct ProgressTracker {
    multi: Arc<MultiProgress>,
    bars: Arc<Mutex<Vec<ProgressBar>>>,
}

impl ProgressTracker {
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: Arc::new(MultiProgress::with_draw_target(target)),
            bars: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// A counter whose length grows as work is queued.
    pub fn add_counter(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░"),
        );
        pb.set_message(msg.to_string());
        self.track(&pb);
        pb
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        self.track(&pb);
        pb
    }

    fn track(&self, pb: &ProgressBar) {
        if let Ok(mut bars) = self.bars.lock() {
            bars.push(pb.clone());
        }
    }

    pub fn finish_all(&self) {
        if let Ok(bars) = self.bars.lock() {
            for bar in bars.iter() {
                bar.finish_and_clear();
            }
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::hidden()
    }
}
