//! Coloured progress lines for interactive runs.
//!
//! These go to stdout for the operator; the same events are also emitted through `tracing`
//! by the callers so that `--log-json` runs keep a machine-readable trail.

use crate::domain::model::Outcome;
use colored::*;

const RULE_WIDTH: usize = 60;

pub fn header(text: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    println!();
    println!("{}", rule.magenta().bold());
    println!("{}", format!("{:^width$}", text, width = RULE_WIDTH).magenta().bold());
    println!("{}", rule.magenta().bold());
    println!();
}

pub fn success(text: &str) {
    println!("{}", format!("✓ {}", text).green());
}

pub fn error(text: &str) {
    println!("{}", format!("✗ {}", text).red());
}

pub fn info(text: &str) {
    println!("{}", format!("→ {}", text).cyan());
}

pub fn warning(text: &str) {
    println!("{}", format!("⚠ {}", text).yellow());
}

pub fn rule() {
    println!("{}", "=".repeat(RULE_WIDTH));
}

/// `[OK]` / `[SKIP]` / `[ERR]` line for one task.
pub fn outcome(outcome: Outcome, text: &str) {
    let line = format!("[{}] {}", outcome.label(), text);
    match outcome {
        Outcome::Success => println!("{}", line.green()),
        Outcome::AlreadyDone => println!("{}", line.yellow()),
        Outcome::Rejected | Outcome::Error => println!("{}", line.red()),
    }
}
