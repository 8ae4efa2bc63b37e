//! Rendering of light, group, scene and status views for the terminal.
//!
//! Lists become a rounded table of rows, while a single resource becomes a
//! key/value block. `json`, `json-compact` and `yaml` serialize the
//! underlying model unchanged. `plain` prints only resource ids, one per
//! line, for piping into another `huectl` call.
//!
//! Results go to stdout; notices and guidance go to stderr.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color ────────────────────────────────────────────────────────────

/// Color is decided for stderr, where guidance and notices appear.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    }
}

pub fn heading(text: &str, color: bool) -> String {
    if color {
        text.bold().to_string()
    } else {
        text.to_owned()
    }
}

/// Power state of a light or group: lit in green, dark dimmed.
pub fn on_off(on: bool, color: bool) -> String {
    let label = if on { "on" } else { "off" };
    match (color, on) {
        (false, _) => label.to_owned(),
        (true, true) => label.green().to_string(),
        (true, false) => label.dimmed().to_string(),
    }
}

// ── Views ────────────────────────────────────────────────────────────

/// Render a collection of resources. `row` builds the table line for one
/// resource and `id` its identifier for `plain`.
pub fn render_list<T, R>(
    format: OutputFormat,
    items: &[T],
    row: impl Fn(&T) -> R,
    id: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    if let Some(rendered) = serialized(format, items) {
        return rendered;
    }
    Ok(match format {
        OutputFormat::Plain => items.iter().map(id).collect::<Vec<_>>().join("\n"),
        _ => {
            let rows: Vec<R> = items.iter().map(row).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
    })
}

/// Render one resource or report. `detail` writes the key/value block
/// shown for `table`.
pub fn render_single<T: Serialize>(
    format: OutputFormat,
    item: &T,
    detail: impl Fn(&T) -> String,
    id: impl Fn(&T) -> String,
) -> Result<String, CliError> {
    if let Some(rendered) = serialized(format, item) {
        return rendered;
    }
    Ok(match format {
        OutputFormat::Plain => id(item),
        _ => detail(item),
    })
}

/// `None` for the human-oriented formats.
fn serialized<T: Serialize + ?Sized>(
    format: OutputFormat,
    data: &T,
) -> Option<Result<String, CliError>> {
    match format {
        OutputFormat::Json => Some(render_json(data, false)),
        OutputFormat::JsonCompact => Some(render_json(data, true)),
        OutputFormat::Yaml => {
            Some(serde_yaml::to_string(data).map_err(|e| CliError::Render(e.to_string())))
        }
        OutputFormat::Table | OutputFormat::Plain => None,
    }
}

/// Also used by `watch`, which prints each event as it arrives.
pub(crate) fn render_json<T: Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    }
    .map_err(|e| CliError::Render(e.to_string()))
}

// ── Printing ─────────────────────────────────────────────────────────

/// Write a rendered view to stdout. Nothing is printed under `--quiet`.
pub fn print_output(rendered: &str, quiet: bool) {
    if quiet || rendered.is_empty() {
        return;
    }
    let _ = writeln!(io::stdout().lock(), "{rendered}");
}

/// Progress and confirmation messages, kept off stdout so piped output
/// stays parseable.
pub fn notice(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{message}");
    }
}
