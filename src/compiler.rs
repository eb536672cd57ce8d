//! Adapter around the external single-file-component compiler.
//!
//! Every component file goes through [`CompilerAdapter::compile`]: the
//! `<style global>` pre-pass runs first, source maps are always requested, and
//! compiler failures come back as a [`Diagnostic`] with a code frame.

use std::future::Future;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diagnostics::Diagnostic;
use crate::{BuildTarget, CssMode};

/// `<style … global …>body</style>`; the attribute may sit among others.
static GLOBAL_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<style((?:\s+[^>]*?)?)\s+global((?:\s+[^>]*?)?)\s*>(.*?)</style>").unwrap()
});

/// Which flavour of module the compiler generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generate {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub generate: Generate,
    pub css: CssMode,
    pub dev: bool,
    pub sourcemap: bool,
    /// Emit code able to attach to existing server markup.
    pub hydratable: bool,
    pub filename: String,
}

impl CompileOptions {
    /// Options used for every component of a build target.
    pub fn for_target(target: BuildTarget, requested_css: CssMode, dev: bool) -> Self {
        match target {
            BuildTarget::Ssr => Self {
                generate: Generate::Server,
                css: CssMode::Injected,
                dev,
                sourcemap: true,
                hydratable: false,
                filename: String::new(),
            },
            BuildTarget::ClientDom => Self {
                generate: Generate::Client,
                css: requested_css,
                dev,
                sourcemap: true,
                hydratable: false,
                filename: String::new(),
            },
            // Styles already ship with the server markup.
            BuildTarget::ClientHydrate => Self {
                generate: Generate::Client,
                css: CssMode::External,
                dev,
                sourcemap: true,
                hydratable: true,
                filename: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledModule {
    pub code: String,
    pub map: Option<String>,
    pub warnings: Vec<CompilerError>,
}

/// A compiler error or warning as reported by the compiler. `line` is 1-based,
/// `column` 0-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerError {
    pub name: String,
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub frame: Option<String>,
}

/// The external compiler: component source text in, module code out.
pub trait ComponentCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> impl Future<Output = Result<CompiledModule, CompilerError>> + Send;
}

/// Output of a successful adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub code: String,
    pub map: Option<String>,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct CompilerAdapter<C> {
    compiler: C,
}

impl<C: ComponentCompiler> CompilerAdapter<C> {
    pub fn new(compiler: C) -> Self {
        Self { compiler }
    }

    pub fn inner(&self) -> &C {
        &self.compiler
    }

    /// Compile one component file.
    pub async fn compile(
        &self,
        source: &str,
        filename: &str,
        options: &CompileOptions,
    ) -> Result<CompileOutput, Diagnostic> {
        let source = rewrite_global_styles(&source.replace("\r\n", "\n"));
        let options = CompileOptions {
            sourcemap: true,
            filename: filename.to_string(),
            ..options.clone()
        };

        debug!(file = %filename, generate = ?options.generate, css = ?options.css, "compiling component");

        match self.compiler.compile(&source, &options).await {
            Ok(compiled) => {
                let warnings: Vec<Diagnostic> = compiled
                    .warnings
                    .into_iter()
                    .map(|w| to_diagnostic(w, filename, &source))
                    .collect();
                for warning in &warnings {
                    warn!(file = %filename, "{}", warning.render());
                }
                Ok(CompileOutput {
                    code: compiled.code,
                    map: compiled.map,
                    warnings,
                })
            }
            Err(err) => Err(to_diagnostic(err, filename, &source)),
        }
    }
}

fn to_diagnostic(err: CompilerError, filename: &str, source: &str) -> Diagnostic {
    let name = if err.name.is_empty() {
        "CompileError".to_string()
    } else {
        err.name
    };
    let mut diagnostic = Diagnostic::new(name, err.message).with_filename(filename);
    if let Some(line) = err.line {
        diagnostic = diagnostic.with_position(line, err.column.unwrap_or(0));
    }
    if let Some(frame) = err.frame {
        diagnostic = diagnostic.with_frame(frame);
    }
    diagnostic.ensure_frame(source);
    diagnostic
}

/// Rewrite `<style global>` blocks into a `:global { … }` wrapper.
///
/// Newlines are neither added nor removed, so compiler positions still match
/// the author's line numbers.
pub fn rewrite_global_styles(source: &str) -> String {
    GLOBAL_STYLE_RE
        .replace_all(source, |caps: &Captures<'_>| {
            format!(
                "<style{}{}>:global {{{}}}</style>",
                &caps[1], &caps[2], &caps[3]
            )
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records what it was asked to compile; fails on sources containing "FAIL".
    #[derive(Default)]
    struct RecordingCompiler {
        seen: Mutex<Vec<(String, CompileOptions)>>,
    }

    impl ComponentCompiler for RecordingCompiler {
        fn compile(
            &self,
            source: &str,
            options: &CompileOptions,
        ) -> impl Future<Output = Result<CompiledModule, CompilerError>> + Send {
            self.seen
                .lock()
                .unwrap()
                .push((source.to_string(), options.clone()));
            let failed = source.contains("FAIL");
            async move {
                if failed {
                    Err(CompilerError {
                        name: String::new(),
                        message: "Unexpected token".into(),
                        line: Some(2),
                        column: Some(3),
                        frame: None,
                    })
                } else {
                    Ok(CompiledModule {
                        code: "export default {}".into(),
                        map: Some("{}".into()),
                        warnings: vec![CompilerError {
                            name: "A11yWarning".into(),
                            message: "img needs alt".into(),
                            line: Some(1),
                            column: Some(0),
                            frame: None,
                        }],
                    })
                }
            }
        }
    }

    #[test]
    fn rewrites_global_style() {
        let source = "<div/>\n<style global>\n  body { margin: 0 }\n</style>";
        assert_eq!(
            rewrite_global_styles(source),
            "<div/>\n<style>:global {\n  body { margin: 0 }\n}</style>"
        );
    }

    #[test]
    fn rewrite_keeps_other_attributes_and_lines() {
        let source = "<style lang=\"postcss\" global>\na {}\n</style>";
        let rewritten = rewrite_global_styles(source);
        assert_eq!(rewritten, "<style lang=\"postcss\">:global {\na {}\n}</style>");
        assert_eq!(rewritten.lines().count(), source.lines().count());
    }

    #[test]
    fn leaves_scoped_styles_alone() {
        let source = "<style>\n.a { color: red }\n</style>";
        assert_eq!(rewrite_global_styles(source), source);
        let tricky = "<style data-globals>\n.a {}\n</style>";
        assert_eq!(rewrite_global_styles(tricky), tricky);
    }

    #[test]
    fn target_options() {
        let ssr = CompileOptions::for_target(BuildTarget::Ssr, CssMode::External, false);
        assert_eq!(ssr.generate, Generate::Server);
        assert_eq!(ssr.css, CssMode::Injected);

        let dom = CompileOptions::for_target(BuildTarget::ClientDom, CssMode::Injected, true);
        assert_eq!(dom.generate, Generate::Client);
        assert_eq!(dom.css, CssMode::Injected);
        assert!(dom.dev);

        let hydrate = CompileOptions::for_target(BuildTarget::ClientHydrate, CssMode::Injected, false);
        assert_eq!(hydrate.css, CssMode::External);
        assert!(hydrate.hydratable);
    }

    #[tokio::test]
    async fn adapter_prepasses_and_forces_sourcemap() {
        let adapter = CompilerAdapter::new(RecordingCompiler::default());
        let mut options = CompileOptions::for_target(BuildTarget::ClientDom, CssMode::Injected, false);
        options.sourcemap = false;

        let output = adapter
            .compile("<p/>\r\n<style global>p{}</style>", "App.svelte", &options)
            .await
            .unwrap();
        assert_eq!(output.code, "export default {}");
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(output.warnings[0].filename.as_deref(), Some("App.svelte"));

        let seen = adapter.inner().seen.lock().unwrap();
        let (source, options) = &seen[0];
        assert_eq!(source, "<p/>\n<style>:global {p{}}</style>");
        assert!(options.sourcemap);
        assert_eq!(options.filename, "App.svelte");
    }

    #[tokio::test]
    async fn adapter_synthesizes_frame() {
        let adapter = CompilerAdapter::new(RecordingCompiler::default());
        let options = CompileOptions::for_target(BuildTarget::Ssr, CssMode::Injected, false);

        let diagnostic = adapter
            .compile("<div>\n<p>FAIL\n</div>", "Component_0.svelte", &options)
            .await
            .unwrap_err();
        assert_eq!(diagnostic.name, "CompileError");
        assert_eq!(diagnostic.line, Some(2));
        let frame = diagnostic.frame.unwrap();
        assert!(frame.contains("2 | <p>FAIL"));
        assert!(frame.contains("  |    ^"));
    }
}
