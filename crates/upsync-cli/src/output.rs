//! Terminal output for upsync commands
//!
//! Human output goes to stdout, except warnings and errors which go to
//! stderr. In JSON mode stdout carries exactly one document per command
//! (the run report, the config) so it can be piped into other tools;
//! progress chatter is dropped and problems are written to stderr as
//! one-line JSON objects.

use serde_json::{json, Value};

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Info,
    Warning,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Success => "success",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

/// Where a rendered line is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Formats status lines and result documents
pub trait OutputFormatter {
    /// Rendered line for `level`, or `None` when this format drops it
    fn render(&self, level: Level, text: &str) -> Option<(Stream, String)>;

    /// Write the command's result document
    fn document(&self, value: &Value);

    fn message(&self, level: Level, text: &str) {
        match self.render(level, text) {
            Some((Stream::Stdout, line)) => println!("{line}"),
            Some((Stream::Stderr, line)) => eprintln!("{line}"),
            None => {}
        }
    }

    fn success(&self, text: &str) {
        self.message(Level::Success, text);
    }

    fn info(&self, text: &str) {
        self.message(Level::Info, text);
    }

    fn warn(&self, text: &str) {
        self.message(Level::Warning, text);
    }

    fn error(&self, text: &str) {
        self.message(Level::Error, text);
    }
}

/// Check marks and indentation; `quiet` keeps only warnings and errors
pub struct HumanFormatter {
    quiet: bool,
}

impl OutputFormatter for HumanFormatter {
    fn render(&self, level: Level, text: &str) -> Option<(Stream, String)> {
        match level {
            Level::Success | Level::Info if self.quiet => None,
            Level::Success => Some((Stream::Stdout, format!("\u{2713} {text}"))),
            Level::Info => Some((Stream::Stdout, format!("  {text}"))),
            Level::Warning => Some((Stream::Stderr, format!("\u{26a0} Warning: {text}"))),
            Level::Error => Some((Stream::Stderr, format!("\u{2717} Error: {text}"))),
        }
    }

    fn document(&self, value: &Value) {
        if let Ok(text) = serde_json::to_string_pretty(value) {
            println!("{text}");
        }
    }
}

/// One JSON document on stdout, problems as JSON lines on stderr
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn render(&self, level: Level, text: &str) -> Option<(Stream, String)> {
        match level {
            Level::Success | Level::Info => None,
            Level::Warning | Level::Error => Some((
                Stream::Stderr,
                json!({ "level": level.as_str(), "message": text }).to_string(),
            )),
        }
    }

    fn document(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => self.error(&format!("Failed to render output: {e}")),
        }
    }
}

pub fn get_formatter(format: OutputFormat, quiet: bool) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Human => Box::new(HumanFormatter { quiet }),
    }
}

/// `1 file`, `3 files`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// `850ms`, `2.4s`
pub fn duration_display(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}
