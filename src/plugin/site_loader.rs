//! Site Loader: the bundler hooks for one build target.
//!
//! - `resolve_id` runs the ordered resolution rules and marks client-side
//!   bindings external
//! - `load` serves virtual modules, synthesized files, the icon shim, and
//!   remote modules through the shared module cache
//! - `transform` compiles component files through the compiler adapter
//!
//! One loader is created per target so the resolver, compile options and
//! virtual module sources always agree on which target is being built.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use arcstr::ArcStr;
use tracing::{debug, trace};

use crate::bundle::AssembledGraph;
use crate::bundler::{BundleHooks, HookLoadOutput, HookResolveIdOutput, HookTransformOutput};
use crate::compiler::{CompileOptions, CompilerAdapter, ComponentCompiler};
use crate::config::PipelineConfig;
use crate::plugin::module_cache::{ModuleCache, RemoteFetcher};
use crate::resolver::ModuleResolver;
use crate::utils::{extract_virtual_name, is_component_file, is_remote_url};
use crate::virtual_modules::{self, VirtualContext, VirtualModule, ICON_SHIM_FILE};
use crate::{BuildError, BuildTarget, CssMode, VirtualBindings};

/// Per-target settings for the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteLoaderConfig {
    pub target: BuildTarget,
    /// CSS mode the caller asked for; the target may override it.
    pub css: CssMode,
    pub dev: bool,
}

/// Long-lived collaborators shared by every loader an orchestrator creates.
pub struct LoaderServices<C, F> {
    pub compiler: Arc<CompilerAdapter<C>>,
    pub fetcher: Arc<F>,
    pub module_cache: Arc<ModuleCache>,
}

impl<C, F> Clone for LoaderServices<C, F> {
    fn clone(&self) -> Self {
        Self {
            compiler: Arc::clone(&self.compiler),
            fetcher: Arc::clone(&self.fetcher),
            module_cache: Arc::clone(&self.module_cache),
        }
    }
}

pub struct SiteLoader<C, F> {
    config: SiteLoaderConfig,
    resolver: ModuleResolver,
    compile_options: CompileOptions,
    runtime_url: String,
    graph: Arc<AssembledGraph>,
    bindings: Arc<VirtualBindings>,
    services: LoaderServices<C, F>,
}

impl<C, F> fmt::Debug for SiteLoader<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteLoader")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("files", &self.graph.files.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C, F> SiteLoader<C, F>
where
    C: ComponentCompiler + 'static,
    F: RemoteFetcher,
{
    pub fn new(
        pipeline: &PipelineConfig,
        config: SiteLoaderConfig,
        graph: Arc<AssembledGraph>,
        bindings: Arc<VirtualBindings>,
        services: LoaderServices<C, F>,
    ) -> Self {
        let resolver = ModuleResolver::new(
            pipeline.clone(),
            config.target,
            graph.files.keys().cloned(),
        );
        Self {
            config,
            resolver,
            compile_options: CompileOptions::for_target(config.target, config.css, config.dev),
            runtime_url: pipeline.runtime_url(None),
            graph,
            bindings,
            services,
        }
    }

    pub fn target(&self) -> BuildTarget {
        self.config.target
    }

    pub fn compile_options(&self) -> &CompileOptions {
        &self.compile_options
    }

    async fn load_module(&self, id: &str) -> Result<ArcStr, BuildError> {
        if let Some(name) = extract_virtual_name(id) {
            let module = VirtualModule::from_name(name)
                .ok_or_else(|| BuildError::ModuleNotFound(id.replace('\0', "\\0")))?;
            let ctx = VirtualContext {
                bindings: &self.bindings,
                target: self.config.target,
                dev: self.config.dev,
                runtime_url: &self.runtime_url,
            };
            trace!(module = module.name(), build_target = self.config.target.as_str(), "serving virtual module");
            return Ok(ArcStr::from(virtual_modules::render(module, &ctx)));
        }

        if let Some(code) = self.graph.files.get(id) {
            return Ok(code.clone());
        }

        if id == ICON_SHIM_FILE {
            return Ok(ArcStr::from(virtual_modules::icon_shim()));
        }

        if is_remote_url(id) {
            let fetcher = self.services.fetcher.as_ref();
            return Ok(self.services.module_cache.fetch_remote(fetcher, id).await?);
        }

        Err(BuildError::ModuleNotFound(id.to_string()))
    }

    async fn compile_module(
        &self,
        code: &str,
        id: &str,
    ) -> Result<HookTransformOutput, BuildError> {
        let output = self
            .services
            .compiler
            .compile(code, id, &self.compile_options)
            .await
            .map_err(BuildError::Compile)?;
        Ok(HookTransformOutput {
            code: output.code,
            map: output.map,
        })
    }
}

// ---------------------------------------------------------------------------
// Bundler hook implementation
// ---------------------------------------------------------------------------

impl<C, F> BundleHooks for SiteLoader<C, F>
where
    C: ComponentCompiler + 'static,
    F: RemoteFetcher,
{
    fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> impl Future<Output = anyhow::Result<Option<HookResolveIdOutput>>> + Send {
        let resolved = self.resolver.resolve(specifier, importer);
        debug!(
            specifier = %specifier,
            importer = importer.unwrap_or("<entry>"),
            resolved = ?resolved,
            build_target = self.config.target.as_str(),
            "resolved module"
        );
        let output = HookResolveIdOutput {
            id: ArcStr::from(resolved.module_id(specifier)),
            external: resolved.is_external(),
        };

        async move { Ok(Some(output)) }
    }

    fn load(&self, id: &str) -> impl Future<Output = anyhow::Result<Option<HookLoadOutput>>> + Send {
        let id = id.to_string();

        async move {
            let code = self.load_module(&id).await?;
            Ok(Some(HookLoadOutput { code }))
        }
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
    ) -> impl Future<Output = anyhow::Result<Option<HookTransformOutput>>> + Send {
        let code = code.to_string();
        let id = id.to_string();

        async move {
            if !is_component_file(&id) {
                return Ok(None);
            }
            Ok(Some(self.compile_module(&code, &id).await?))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
