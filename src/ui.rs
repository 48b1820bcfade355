use colored::{ColoredString, Colorize};
use reconcile::{ApplyResult, PlanAction};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol: `+` create, `-` drop, `~` update
pub fn action_symbol(action: &PlanAction) -> ColoredString {
    match action {
        PlanAction::Create => "+".green(),
        PlanAction::Drop => "-".red(),
        PlanAction::Update(_) => "~".yellow(),
        PlanAction::NoOp => "=".dimmed(),
    }
}

/// Progress symbol for an applied entry
pub fn result_symbol(result: &ApplyResult) -> &'static str {
    match result {
        ApplyResult::NoChange => "○",
        ApplyResult::Created | ApplyResult::Modified | ApplyResult::Removed => "✓",
        ApplyResult::Failed { .. } => "✗",
        ApplyResult::Skipped { .. } => "⊘",
    }
}
