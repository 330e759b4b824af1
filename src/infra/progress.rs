use crate::app::ports::ProgressReporter;
use tracing::info;

/// Prints "Downloaded data : n/total" lines to stdout
pub struct ConsoleProgressReporter {
    quiet: bool,
}

impl ConsoleProgressReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn on_progress(&self, completed: usize, total: usize) {
        info!(completed, total, "Downloaded data");
        if !self.quiet {
            let percent = if total == 0 { 100 } else { completed * 100 / total };
            println!("   Downloaded data : {}/{} ({}%)", completed, total, percent);
        }
    }

    fn on_finished(&self) {
        info!("Enrichment batch finished");
        if !self.quiet {
            println!("✅ Download finished");
        }
    }
}
