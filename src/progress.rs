//! Progress indicators for plan execution

use indicatif::{ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "  {prefix:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}";

/// Bar over `len` plan entries
pub fn bar(len: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

/// Hidden bar, for quiet mode
pub fn hidden() -> ProgressBar {
    ProgressBar::hidden()
}
