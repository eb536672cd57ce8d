//! The module bundler seam.
//!
//! The bundler itself is an external collaborator: it walks the module graph
//! from an entry, asking the pipeline to resolve, load and transform each
//! module, and returns a single output file. The pipeline's side of that
//! contract is [`BundleHooks`], implemented by
//! [`SiteLoader`](crate::plugin::site_loader::SiteLoader).

use std::future::Future;
use std::sync::Arc;

use arcstr::ArcStr;

use crate::{BuildTarget, OutputFormat};

/// Describes WHAT to bundle for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInput {
    /// Entry module specifier, resolved through the hooks like any import.
    pub entry: String,
    pub format: OutputFormat,
    pub sourcemap: bool,
    pub target: BuildTarget,
}

/// A bundler's single output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleOutput {
    pub code: String,
    pub map: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResolveIdOutput {
    pub id: ArcStr,
    /// Keep the import as-is in the output instead of bundling it.
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookLoadOutput {
    pub code: ArcStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTransformOutput {
    pub code: String,
    pub map: Option<String>,
}

/// Callbacks the bundler invokes per module.
///
/// Returning `Ok(None)` means "not mine"; the bundler falls back to its own
/// behaviour. Errors abort the bundle and are returned from
/// [`ModuleBundler::bundle`] unchanged.
pub trait BundleHooks: Send + Sync + 'static {
    fn resolve_id(
        &self,
        specifier: &str,
        importer: Option<&str>,
    ) -> impl Future<Output = anyhow::Result<Option<HookResolveIdOutput>>> + Send;

    fn load(&self, id: &str) -> impl Future<Output = anyhow::Result<Option<HookLoadOutput>>> + Send;

    fn transform(
        &self,
        code: &str,
        id: &str,
    ) -> impl Future<Output = anyhow::Result<Option<HookTransformOutput>>> + Send;
}

/// The external bundler: module graph in, one output file out.
pub trait ModuleBundler: Send + Sync {
    fn bundle<H: BundleHooks>(
        &self,
        input: BundleInput,
        hooks: Arc<H>,
    ) -> impl Future<Output = anyhow::Result<BundleOutput>> + Send;
}
