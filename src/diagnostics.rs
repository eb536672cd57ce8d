//! Human-readable diagnostics for compiler, style, and bundler failures.
//!
//! A diagnostic is derived from whatever the failing stage reported. When the
//! compiler gives a position but no code frame, one is synthesized from the
//! source lines around the error so the message stays actionable for whoever
//! reads it (a person or an agent fixing its own output).

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::plugin::style_cache::StyleError;
use crate::BuildError;

/// Lines of context shown above and below the offending line.
const FRAME_CONTEXT: usize = 2;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s)'"<>`]+"#).unwrap());

/// A structured diagnostic. `line` is 1-based, `column` is a 0-based
/// character offset within that line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub name: String,
    pub message: String,
    pub filename: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub frame: Option<String>,
    pub links: BTreeSet<String>,
}

impl Diagnostic {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let links = extract_links(&message);
        Self {
            name: name.into(),
            message,
            filename: None,
            line: None,
            column: None,
            frame: None,
            links,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_position(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        let frame = frame.into();
        if !frame.trim().is_empty() {
            self.frame = Some(frame);
        }
        self
    }

    /// Synthesize a code frame from `source` unless one is already present.
    pub fn ensure_frame(&mut self, source: &str) {
        if self.frame.is_some() {
            return;
        }
        if let Some(line) = self.line {
            self.frame = code_frame(source, line, self.column.unwrap_or(0));
        }
    }

    /// Render as displayed to the user: headline, location, frame.
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.name, self.message);

        match (&self.filename, self.line, self.column) {
            (Some(file), Some(line), Some(column)) => {
                let _ = write!(out, " ({}:{}:{})", file, line, column);
            }
            (Some(file), Some(line), None) => {
                let _ = write!(out, " ({}:{})", file, line);
            }
            (Some(file), None, _) => {
                let _ = write!(out, " ({})", file);
            }
            (None, Some(line), Some(column)) => {
                let _ = write!(out, " ({}:{})", line, column);
            }
            _ => {}
        }

        if let Some(frame) = &self.frame {
            out.push('\n');
            out.push_str(frame.trim_end_matches('\n'));
        }
        out
    }
}

/// Build a frame around `line` (1-based) with a `^` under `column` (0-based).
///
/// Returns `None` when the line does not exist in `source`.
pub fn code_frame(source: &str, line: usize, column: usize) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return None;
    }

    let first = line.saturating_sub(FRAME_CONTEXT).max(1);
    let last = (line + FRAME_CONTEXT).min(lines.len());
    let gutter = last.to_string().len();

    let mut frame = String::new();
    for number in first..=last {
        let text = lines[number - 1].trim_end();
        let _ = writeln!(frame, "{:>width$} | {}", number, text, width = gutter);

        if number == line {
            // Keep tabs so the caret lines up with the rendered source.
            let pad: String = text
                .chars()
                .take(column)
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            let _ = writeln!(frame, "{:>width$} | {}^", "", pad, width = gutter);
        }
    }

    Some(frame.trim_end_matches('\n').to_string())
}

/// Collect documentation links mentioned in a message.
pub fn extract_links(message: &str) -> BTreeSet<String> {
    LINK_RE
        .find_iter(message)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
        .collect()
}

pub fn format_style_error(err: &StyleError) -> String {
    match (err.line, err.column) {
        (Some(line), Some(column)) => format!("StyleError: {} ({}:{})", err.reason, line, column),
        (Some(line), None) => format!("StyleError: {} (line {})", err.reason, line),
        _ => format!("StyleError: {}", err.reason),
    }
}

/// The string placed in `BuildResult::error`.
pub fn format_error(err: &BuildError) -> String {
    match err {
        BuildError::Compile(diagnostic) => diagnostic.render(),
        BuildError::Style(style) => format_style_error(style),
        other => {
            let name = match other {
                BuildError::Fetch { .. } => "FetchError",
                BuildError::ModuleNotFound(_) => "ResolveError",
                BuildError::InvalidRequest(_) => "RequestError",
                _ => "BundleError",
            };
            format!("{}: {}", name, other)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
