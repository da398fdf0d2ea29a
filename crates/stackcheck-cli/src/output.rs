//! Output formatting helpers.

use colored::Colorize;

/// Print a passed check.
pub fn passed(name: &str) {
    println!("{} {}", "✓".green(), name);
}

/// Print a failed check with its reason, indented below it.
pub fn failed(name: &str, reason: &str) {
    println!("{} {}", "✗".red(), name);
    for line in reason.lines() {
        println!("    {}", line);
    }
}

/// Print a skipped check.
pub fn skipped(name: &str, reason: &str) {
    println!("{} {} {}", "-".yellow(), name, format!("({})", reason).dimmed());
}

/// Print the final tally.
pub fn summary(passed: usize, failed: usize, skipped: usize) {
    let failed_text = format!("{} failed", failed);
    let failed_text = if failed > 0 {
        failed_text.red().bold()
    } else {
        failed_text.normal()
    };
    println!();
    println!(
        "{}, {}, {}",
        format!("{} passed", passed).green(),
        failed_text,
        format!("{} skipped", skipped).dimmed()
    );
}
