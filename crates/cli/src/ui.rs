//! Console output helpers.

use colored::Colorize;
use deploy::{DeploymentReport, StageResult};

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print an informational message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print the per-stage, per-cluster outcome table.
pub fn print_report(report: &DeploymentReport) {
    print_section("Deployment results");
    for record in report.records() {
        let line = format!("{:<32} {:<12}", record.stage.to_string(), record.cluster_name);
        match &record.result {
            StageResult::Success => print_success(&line),
            StageResult::Skipped(reason) => print_warning(&format!("{line} skipped: {reason}")),
            StageResult::Failed(error) => print_error(&format!("{line} failed: {error}")),
        }
    }
    println!();
    if report.any_failed() {
        print_error("Deployment finished with failures");
    } else {
        print_success("Deployment finished successfully");
    }
}
