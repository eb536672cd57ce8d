//! Memoized nested-CSS flattening.
//!
//! Section styles are written with nesting (`.card { & .title { … } }`); the
//! processor lowers them to flat CSS with lightningcss. Results are cached by
//! the exact input text for the lifetime of the cache. Concurrent callers
//! asking for the same not-yet-cached input wait on the in-flight compile
//! instead of starting their own; failures are never cached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// Malformed input or an internal printer failure. `line` and `column` are
/// 1-based when present.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct StyleError {
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub reason: String,
}

impl StyleError {
    fn from_css<T: std::fmt::Display>(err: lightningcss::error::Error<T>) -> Self {
        Self {
            line: err.loc.as_ref().map(|loc| loc.line + 1),
            column: err.loc.as_ref().map(|loc| loc.column),
            reason: err.kind.to_string(),
        }
    }
}

/// Browsers without native nesting support, so nested rules are always lowered.
fn flattening_browsers() -> Browsers {
    Browsers {
        chrome: Some(100 << 16),
        firefox: Some(100 << 16),
        safari: Some(15 << 16),
        edge: Some(100 << 16),
        ..Default::default()
    }
}

/// Thread-safe style cache keyed by raw CSS text.
#[derive(Debug)]
pub struct StyleCache {
    entries: DashMap<String, Arc<OnceCell<String>>>,
    browsers: Browsers,
    compiles: AtomicUsize,
}

impl StyleCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            browsers: flattening_browsers(),
            compiles: AtomicUsize::new(0),
        }
    }

    /// Flatten `raw`, compiling at most once per distinct input.
    pub async fn process(&self, raw: &str) -> Result<String, StyleError> {
        let cell = Arc::clone(self.entries.entry(raw.to_string()).or_default().value());

        if let Some(css) = cell.get() {
            debug!(bytes = raw.len(), "style cache hit");
            return Ok(css.clone());
        }

        let result = cell
            .get_or_try_init(|| async {
                self.compiles.fetch_add(1, Ordering::SeqCst);
                let input = raw.to_string();
                let browsers = self.browsers;
                tokio::task::spawn_blocking(move || flatten_nested(&input, browsers))
                    .await
                    .map_err(|e| StyleError {
                        line: None,
                        column: None,
                        reason: format!("style compile task failed: {}", e),
                    })?
            })
            .await;

        match result {
            Ok(css) => Ok(css.clone()),
            Err(err) => {
                // Drop the empty cell unless a concurrent caller filled it.
                self.entries.remove_if(raw, |_, cell| !cell.initialized());
                debug!(reason = %err.reason, "style compile failed");
                Err(err)
            }
        }
    }

    /// Get the cached output for an input, if it compiled successfully.
    pub fn get(&self, raw: &str) -> Option<String> {
        self.entries
            .get(raw)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Number of inputs with a cached result.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times the underlying transform has run.
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for StyleCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse nested CSS and print it flat for browsers without nesting.
pub fn flatten_nested(raw: &str, browsers: Browsers) -> Result<String, StyleError> {
    let targets = Targets::from(browsers);

    let mut stylesheet =
        StyleSheet::parse(raw, ParserOptions::default()).map_err(StyleError::from_css)?;

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..Default::default()
        })
        .map_err(StyleError::from_css)?;

    let printed = stylesheet
        .to_css(PrinterOptions {
            targets,
            ..Default::default()
        })
        .map_err(StyleError::from_css)?;

    Ok(printed.code)
}
