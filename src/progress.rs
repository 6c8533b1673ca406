//! Progress bars for discovery and processing runs.
//!
//! Both bars degrade to [`ProgressBar::hidden`] when progress output is off,
//! so callers update them unconditionally.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner counting locators found during discovery.
#[must_use]
pub fn discovery_spinner(enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} Searching for articles: {pos} PDF links ({msg})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Bar advancing once per processed candidate.
#[must_use]
pub fn processing_bar(enabled: bool, total: usize) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
