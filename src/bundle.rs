//! Build orchestration.
//!
//! One request moves through a fixed sequence:
//! 1. Assemble the module graph: one file per section, an app shell when
//!    there are several sections, and an entry module
//! 2. SSR target (when `buildStatic`)
//! 3. Plain client target (when not `buildStatic`)
//! 4. Hydration target (when `hydrated`), superseding the plain client output
//!
//! Targets run strictly in that order and the first failure ends the build.
//! A failed build never returns partial output: both `ssr` and `dom` are
//! empty and `error` holds the formatted diagnostic.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use arcstr::ArcStr;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::bundler::{BundleInput, ModuleBundler};
use crate::compiler::{CompilerAdapter, ComponentCompiler};
use crate::config::PipelineConfig;
use crate::diagnostics;
use crate::plugin::module_cache::{HttpFetcher, ModuleCache, RemoteFetcher};
use crate::plugin::site_loader::{LoaderServices, SiteLoader, SiteLoaderConfig};
use crate::plugin::style_cache::StyleCache;
use crate::utils::{escape_js_string, is_js_identifier, normalize_output, to_js_literal, COMPONENT_EXT};
use crate::{
    BuildError, BuildOptions, BuildRequest, BuildResult, BuildTarget, ComponentRecord,
    ComponentSource, Head, VirtualBindings,
};

// ---------------------------------------------------------------------------
// Assembled graph
// ---------------------------------------------------------------------------

/// The files synthesized for one build, shared read-only by every target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledGraph {
    /// Entry module name.
    pub entry: String,
    /// Local file table: name → source text.
    pub files: BTreeMap<String, ArcStr>,
    /// Section component files, in page order.
    pub section_files: Vec<String>,
}

impl AssembledGraph {
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(|code| code.as_str())
    }
}

/// File name of the section at `index`.
pub fn section_filename(index: usize) -> String {
    format!("Component_{}{}", index, COMPONENT_EXT)
}

fn section_binding(filename: &str) -> &str {
    filename.strip_suffix(COMPONENT_EXT).unwrap_or(filename)
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs builds against one compiler, one bundler, and process-scoped caches.
///
/// The module and style caches are explicit state: hand the same `Arc` to
/// several orchestrators to share them, or give each test its own.
pub struct BuildOrchestrator<C, B, F = HttpFetcher> {
    config: PipelineConfig,
    bundler: B,
    services: LoaderServices<C, F>,
    style_cache: Arc<StyleCache>,
}

impl<C, B, F> BuildOrchestrator<C, B, F>
where
    C: ComponentCompiler + 'static,
    B: ModuleBundler,
    F: RemoteFetcher,
{
    pub fn new(config: PipelineConfig, compiler: C, bundler: B, fetcher: F) -> Self {
        Self {
            config,
            bundler,
            services: LoaderServices {
                compiler: Arc::new(CompilerAdapter::new(compiler)),
                fetcher: Arc::new(fetcher),
                module_cache: Arc::new(ModuleCache::new()),
            },
            style_cache: Arc::new(StyleCache::new()),
        }
    }

    pub fn with_module_cache(mut self, module_cache: Arc<ModuleCache>) -> Self {
        self.services.module_cache = module_cache;
        self
    }

    pub fn with_style_cache(mut self, style_cache: Arc<StyleCache>) -> Self {
        self.style_cache = style_cache;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn module_cache(&self) -> &Arc<ModuleCache> {
        &self.services.module_cache
    }

    pub fn style_cache(&self) -> &Arc<StyleCache> {
        &self.style_cache
    }

    /// Run one build. Failures are reported in [`BuildResult::error`].
    pub async fn build(&self, request: &BuildRequest) -> BuildResult {
        let started = Instant::now();
        match self.try_build(request).await {
            Ok(result) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ssr_bytes = result.ssr.len(),
                    dom_bytes = result.dom.len(),
                    "build complete"
                );
                result
            }
            Err(err) => {
                let message = diagnostics::format_error(&err);
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, "build failed: {}", message);
                BuildResult::failed(message)
            }
        }
    }

    async fn try_build(&self, request: &BuildRequest) -> Result<BuildResult, BuildError> {
        validate_request(request)?;
        let options = &request.options;

        let graph = Arc::new(self.assemble_graph(request).await?);
        let bindings = Arc::new(request.bindings.clone());
        let mut result = BuildResult::default();

        if options.build_static {
            result.ssr = self.run_target(BuildTarget::Ssr, &graph, &bindings, options).await?;
        } else {
            result.dom = self
                .run_target(BuildTarget::ClientDom, &graph, &bindings, options)
                .await?;
        }

        if options.hydrated {
            result.dom = self
                .run_target(BuildTarget::ClientHydrate, &graph, &bindings, options)
                .await?;
        }

        Ok(result)
    }

    /// Synthesize the local file table for a request.
    pub async fn assemble_graph(&self, request: &BuildRequest) -> Result<AssembledGraph, BuildError> {
        let sources = request.sources.as_slice();
        let mut graph = AssembledGraph {
            entry: self.config.entry_filename.clone(),
            ..Default::default()
        };

        for (index, source) in sources.iter().enumerate() {
            let filename = section_filename(index);
            let text = match source {
                ComponentSource::Raw(text) => text.clone(),
                ComponentSource::Record(record) => self.assemble_record(record).await?,
            };
            graph.files.insert(filename.clone(), ArcStr::from(text));
            graph.section_files.push(filename);
        }

        // Head markup is only rendered by the shell, so a lone section with
        // head code still gets one.
        let needs_shell =
            graph.section_files.len() > 1 || !request.head.code.trim().is_empty();
        let root = if needs_shell {
            let shell = app_shell(&graph.section_files, sources, &request.head);
            graph
                .files
                .insert(self.config.app_shell_filename.clone(), ArcStr::from(shell));
            self.config.app_shell_filename.clone()
        } else {
            graph.section_files[0].clone()
        };

        let entry = entry_module(
            &root,
            &request.head,
            &request.options.runtime_exports,
            &self.config.runtime_name,
        );
        graph.files.insert(graph.entry.clone(), ArcStr::from(entry));

        debug!(
            sections = graph.section_files.len(),
            files = graph.files.len(),
            "assembled module graph"
        );
        Ok(graph)
    }

    /// Turn a structured record into component source, flattening its CSS.
    async fn assemble_record(&self, record: &ComponentRecord) -> Result<String, BuildError> {
        let css = if record.css.trim().is_empty() {
            String::new()
        } else {
            self.style_cache.process(&record.css).await?
        };
        Ok(record_component(record, &css))
    }

    async fn run_target(
        &self,
        target: BuildTarget,
        graph: &Arc<AssembledGraph>,
        bindings: &Arc<VirtualBindings>,
        options: &BuildOptions,
    ) -> Result<String, BuildError> {
        let started = Instant::now();
        let loader = SiteLoader::new(
            &self.config,
            SiteLoaderConfig {
                target,
                css: options.css,
                dev: options.dev_mode,
            },
            Arc::clone(graph),
            Arc::clone(bindings),
            self.services.clone(),
        );
        info!(build_target = target.as_str(), compile = ?loader.compile_options(), "bundling target");

        let input = BundleInput {
            entry: graph.entry.clone(),
            format: options.format,
            sourcemap: options.sourcemap,
            target,
        };
        let output = self
            .bundler
            .bundle(input, Arc::new(loader))
            .await
            .map_err(into_build_error)?;

        let code = normalize_output(&output.code);
        debug!(
            build_target = target.as_str(),
            bytes = code.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "target complete"
        );
        Ok(code)
    }
}

/// Recover the pipeline's own error from whatever the bundler wrapped it in.
fn into_build_error(err: anyhow::Error) -> BuildError {
    match err.downcast::<BuildError>() {
        Ok(build_error) => build_error,
        Err(err) => err
            .chain()
            .find_map(|cause| cause.downcast_ref::<BuildError>().cloned())
            .unwrap_or_else(|| BuildError::Bundle(format!("{:#}", err))),
    }
}

fn validate_request(request: &BuildRequest) -> Result<(), BuildError> {
    if request.sources.as_slice().is_empty() {
        return Err(BuildError::InvalidRequest(
            "at least one component source is required".into(),
        ));
    }
    let mut seen = std::collections::BTreeSet::new();
    for name in &request.options.runtime_exports {
        if !is_js_identifier(name) {
            return Err(BuildError::InvalidRequest(format!(
                "runtime export '{}' is not a valid identifier",
                name
            )));
        }
        if !seen.insert(name.as_str()) {
            return Err(BuildError::InvalidRequest(format!(
                "runtime export '{}' is listed twice",
                name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Source synthesis
// ---------------------------------------------------------------------------

fn object_literal(fields: &BTreeMap<String, Value>) -> String {
    let object: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    to_js_literal(&Value::Object(object))
}

/// Component text for a structured record: data fields become props with
/// their values as defaults.
pub fn record_component(record: &ComponentRecord, flat_css: &str) -> String {
    let mut out = String::new();

    let props: Vec<(&String, &Value)> = record
        .data
        .iter()
        .filter(|(key, _)| is_js_identifier(key))
        .collect();

    if !props.is_empty() || !record.js.trim().is_empty() {
        out.push_str("<script>\n");
        for (key, value) in props {
            let _ = writeln!(out, "  export let {} = {};", key, to_js_literal(value));
        }
        if !record.js.trim().is_empty() {
            out.push_str(record.js.trim_end());
            out.push('\n');
        }
        out.push_str("</script>\n\n");
    }

    out.push_str(record.html.trim_end());
    out.push('\n');

    if !flat_css.trim().is_empty() {
        out.push_str("\n<style>\n");
        out.push_str(flat_css.trim_end());
        out.push_str("\n</style>\n");
    }
    out
}

/// App shell composing the sections in order.
pub fn app_shell(section_files: &[String], sources: &[ComponentSource], head: &Head) -> String {
    let mut out = String::from("<script>\n");
    for file in section_files {
        let _ = writeln!(
            out,
            "  import {} from \"./{}\";",
            section_binding(file),
            escape_js_string(file)
        );
    }

    let section_props: Vec<String> = sources
        .iter()
        .map(|source| match source {
            ComponentSource::Record(record) => object_literal(&record.data),
            ComponentSource::Raw(_) => "{}".to_string(),
        })
        .collect();

    let _ = writeln!(out, "\n  const head = {};", object_literal(&head.data));
    let _ = writeln!(out, "  const sections = [{}];", section_props.join(", "));
    if !head.code.trim().is_empty() {
        let _ = writeln!(
            out,
            "  const head_code = {};",
            to_js_literal(&Value::String(head.code.clone()))
        );
    }
    out.push_str("</script>\n\n");

    if !head.code.trim().is_empty() {
        out.push_str("<svelte:head>{@html head_code}</svelte:head>\n\n");
    }

    for (index, file) in section_files.iter().enumerate() {
        let _ = writeln!(
            out,
            "<{} {{...head}} {{...sections[{}]}} />",
            section_binding(file),
            index
        );
    }
    out
}

/// Entry module: the root component, declared runtime exports, and the head.
pub fn entry_module(
    root: &str,
    head: &Head,
    runtime_exports: &[String],
    runtime_name: &str,
) -> String {
    let mut out = format!("export {{ default }} from \"./{}\";\n", escape_js_string(root));

    if !runtime_exports.is_empty() {
        let _ = writeln!(
            out,
            "export {{ {} }} from \"{}\";",
            runtime_exports.join(", "),
            escape_js_string(runtime_name)
        );
    }

    let mut head_object = Map::new();
    head_object.insert("code".into(), Value::String(head.code.clone()));
    head_object.insert(
        "data".into(),
        Value::Object(head.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    let _ = writeln!(out, "export const head = {};", to_js_literal(&Value::Object(head_object)));
    let _ = writeln!(out, "export const props = {};", object_literal(&head.data));
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
