//! # Prism Bundler
//!
//! In-process build pipeline that turns single-file component sources into a
//! server-rendered module (for static hosting) and an optional client bundle
//! (for hydration).
//!
//! The SFC compiler and the module bundler are external collaborators, plugged
//! in through the [`ComponentCompiler`] and [`ModuleBundler`] traits. This crate
//! owns everything around them: module resolution, virtual data modules, the
//! remote module cache, nested CSS flattening, and diagnostics.

pub mod bundle;
pub mod bundler;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod plugin;
pub mod resolver;
pub mod utils;
pub mod virtual_modules;
pub mod worker;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use bundle::BuildOrchestrator;
pub use bundler::{BundleHooks, BundleInput, BundleOutput, ModuleBundler};
pub use compiler::{
    CompileOptions, CompiledModule, CompilerAdapter, CompilerError, ComponentCompiler, Generate,
};
pub use config::PipelineConfig;
pub use diagnostics::Diagnostic;
pub use plugin::module_cache::{FetchError, HttpFetcher, ModuleCache, RemoteFetcher};
pub use plugin::style_cache::{StyleCache, StyleError};
pub use resolver::{ModuleResolver, ResolvedTarget};
pub use worker::{BuildHandle, BuildWorker};

// ---------------------------------------------------------------------------
// Build Target
// ---------------------------------------------------------------------------

/// One bundler invocation producing one output string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildTarget {
    /// Server render. Virtual bindings are inlined, lifecycle hooks are no-ops.
    Ssr,
    /// Client-only render.
    ClientDom,
    /// Client bundle that attaches to server-rendered markup.
    ClientHydrate,
}

impl BuildTarget {
    pub fn is_ssr(self) -> bool {
        self == BuildTarget::Ssr
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildTarget::Ssr => "ssr",
            BuildTarget::ClientDom => "dom",
            BuildTarget::ClientHydrate => "hydrate",
        }
    }
}

// ---------------------------------------------------------------------------
// Build Options
// ---------------------------------------------------------------------------

/// Where component styles end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CssMode {
    /// Emitted separately and loaded by the host page.
    External,
    /// Inlined into the generated code / markup.
    #[default]
    Injected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Esm,
}

/// Decides which build targets run and how each one compiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Produce the server-rendered module (and skip the plain client build).
    pub build_static: bool,
    /// Produce a hydration bundle; overrides any plain client output.
    pub hydrated: bool,
    pub css: CssMode,
    pub format: OutputFormat,
    pub dev_mode: bool,
    pub sourcemap: bool,
    /// Runtime names re-exported from the entry, in order.
    pub runtime_exports: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            build_static: false,
            hydrated: false,
            css: CssMode::Injected,
            format: OutputFormat::Esm,
            dev_mode: false,
            sourcemap: false,
            runtime_exports: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Component Sources
// ---------------------------------------------------------------------------

/// A section authored as separate fields instead of a complete component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentRecord {
    pub html: String,
    pub css: String,
    pub js: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentSource {
    /// A complete single-file component.
    Raw(String),
    /// Fields assembled into a component before compilation.
    Record(ComponentRecord),
}

/// One source or an ordered list of page sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sources {
    One(ComponentSource),
    Many(Vec<ComponentSource>),
}

impl Sources {
    pub fn as_slice(&self) -> &[ComponentSource] {
        match self {
            Sources::One(source) => std::slice::from_ref(source),
            Sources::Many(sources) => sources,
        }
    }
}

/// Page-level head markup plus fields bound into every section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Head {
    pub code: String,
    pub data: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Virtual Bindings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Collection {
    pub records: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Runtime values behind the virtual data modules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualBindings {
    pub content: BTreeMap<String, Value>,
    pub design: BTreeMap<String, Value>,
    pub data: BTreeMap<String, Collection>,
    pub project_id: String,
}

// ---------------------------------------------------------------------------
// Build Request / Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub sources: Sources,
    #[serde(default)]
    pub head: Head,
    #[serde(default)]
    pub options: BuildOptions,
    #[serde(default)]
    pub bindings: VirtualBindings,
}

/// Outcome of one build. When `error` is set, `ssr` and `dom` are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub ssr: String,
    pub dom: String,
    pub error: Option<String>,
}

impl BuildResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ssr: String::new(),
            dom: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// BuildError
// ---------------------------------------------------------------------------

/// Errors that abort a build.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("{}", .0.render())]
    Compile(Diagnostic),

    #[error("{}", diagnostics::format_style_error(.0))]
    Style(StyleError),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Bundle failed: {0}")]
    Bundle(String),

    #[error("Invalid build request: {0}")]
    InvalidRequest(String),

    #[error("Build worker is no longer running")]
    WorkerClosed,
}

impl From<StyleError> for BuildError {
    fn from(err: StyleError) -> Self {
        BuildError::Style(err)
    }
}

impl From<FetchError> for BuildError {
    fn from(err: FetchError) -> Self {
        BuildError::Fetch {
            url: err.url,
            message: err.message,
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Build one request with a fresh orchestrator.
///
/// Convenience for one-off callers. Long-lived hosts should keep a single
/// [`BuildOrchestrator`] (or [`BuildWorker`]) so the module and style caches
/// survive across builds.
pub async fn build<C, B>(
    config: PipelineConfig,
    compiler: C,
    bundler: B,
    request: &BuildRequest,
) -> BuildResult
where
    C: ComponentCompiler + 'static,
    B: ModuleBundler,
{
    BuildOrchestrator::new(config, compiler, bundler, HttpFetcher::new())
        .build(request)
        .await
}
