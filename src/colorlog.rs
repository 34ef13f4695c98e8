//! Levelled console output with a global color and quiet toggle.
//!
//! All user-facing output goes through these helpers so that `--quiet` and
//! the color setting apply uniformly. Errors are considered critical and are
//! printed even in quiet mode.

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};

static COLOR_ENABLED: AtomicBool = AtomicBool::new(false);
static QUIET: AtomicBool = AtomicBool::new(false);

/// Enables or disables colored output for the rest of the process.
pub fn set_color_enabled(enabled: bool) {
    COLOR_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Enables or disables quiet mode (critical output only).
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

fn color_enabled() -> bool {
    COLOR_ENABLED.load(Ordering::Relaxed)
}

pub fn print_info(msg: impl AsRef<str>) {
    if is_quiet() {
        return;
    }
    let msg = msg.as_ref();
    if color_enabled() {
        println!("{}", msg.cyan());
    } else {
        println!("{msg}");
    }
}

pub fn print_subtle_info(msg: impl AsRef<str>) {
    if is_quiet() {
        return;
    }
    let msg = msg.as_ref();
    if color_enabled() {
        println!("{}", msg.dimmed());
    } else {
        println!("{msg}");
    }
}

pub fn print_success(msg: impl AsRef<str>) {
    if is_quiet() {
        return;
    }
    let msg = msg.as_ref();
    if color_enabled() {
        println!("{}", msg.green());
    } else {
        println!("{msg}");
    }
}

pub fn print_error(msg: impl AsRef<str>) {
    let msg = msg.as_ref();
    if color_enabled() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_toggle_round_trips() {
        set_quiet(true);
        assert!(is_quiet());
        set_quiet(false);
        assert!(!is_quiet());
    }
}
