//! Output formatting: human-readable text or JSON.
//!
//! One-shot commands render a single item; `watch` renders one line per
//! event. Logs go to stderr, so stdout stays machine-consumable.

use std::io::{self, IsTerminal, Write};

use crate::cli::{ColorMode, OutputFormat};

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Render a single serializable item in the chosen format.
///
/// Text rendering uses `text_fn` to produce a pre-formatted line; JSON
/// serializes the original data via serde.
pub fn render_single<T>(format: &OutputFormat, data: &T, text_fn: impl Fn(&T) -> String) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Text => text_fn(data),
        OutputFormat::Json => render_json_pretty(data),
    }
}

/// Print rendered output to stdout.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Pretty-printed JSON.
pub(crate) fn render_json_pretty<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).expect("serialization should not fail")
}

/// Compact single-line JSON (one event per line in watch mode).
pub(crate) fn render_json_compact<T: serde::Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string(data).expect("serialization should not fail")
}
