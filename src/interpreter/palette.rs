use colored::{ColoredString, Colorize};

/// Found hosts, open ports, completed scans
pub fn found(text: &str) -> ColoredString {
    text.green()
}

/// Risky exposure and errors
pub fn critical(text: &str) -> ColoredString {
    text.red().bold()
}

pub fn warning(text: &str) -> ColoredString {
    text.yellow()
}

/// Phase headers
pub fn phase(text: &str) -> ColoredString {
    text.blue().bold()
}

pub fn emphasis(text: &str) -> ColoredString {
    text.bold()
}

/// Lines the interpreter could not read
pub fn muted(text: &str) -> ColoredString {
    text.bright_black()
}

pub fn rule(width: usize) -> String {
    "─".repeat(width)
}

/// Colours follow terminal detection unless switched off.
pub fn configure(enabled: bool) {
    if !enabled {
        colored::control::set_override(false);
    }
}
