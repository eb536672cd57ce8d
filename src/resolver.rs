//! Module resolution.
//!
//! Decides, for every specifier the bundler encounters, whether the module is
//! virtual, a file synthesized for this build, a remote CDN module, or left
//! external for the browser to resolve. Rules are checked in a fixed order and
//! the first match wins; nothing ever fails to resolve. An unknown bare name
//! becomes a CDN URL, and a missing module surfaces later as a load error.

use std::collections::BTreeSet;

use url::Url;

use crate::config::PipelineConfig;
use crate::utils::{is_remote_url, local_key, virtual_module_id};
use crate::virtual_modules::{VirtualModule, ENV_SPECIFIER, ICON_SHIM_FILE, ICON_SHIM_SPECIFIER};
use crate::BuildTarget;

/// Where a specifier's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// Synthesized in memory.
    Virtual(VirtualModule),
    /// A file in this build's local table (or a caller-relative passthrough).
    Local(String),
    /// Absolute URL fetched through the module cache.
    Remote(String),
    /// Left as an import in the output; supplied by the page's import map.
    External,
}

impl ResolvedTarget {
    /// The module ID handed back to the bundler.
    pub fn module_id(&self, requested: &str) -> String {
        match self {
            ResolvedTarget::Virtual(module) => virtual_module_id(module.name()),
            ResolvedTarget::Local(file) => local_key(file).to_string(),
            ResolvedTarget::Remote(url) => url.clone(),
            ResolvedTarget::External => requested.to_string(),
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ResolvedTarget::External)
    }
}

/// Per-target resolver over one build's local file table.
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    config: PipelineConfig,
    target: BuildTarget,
    local_files: BTreeSet<String>,
}

impl ModuleResolver {
    pub fn new<I, S>(config: PipelineConfig, target: BuildTarget, local_files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            config,
            target,
            local_files: local_files.into_iter().map(Into::into).collect(),
        }
    }

    pub fn target(&self) -> BuildTarget {
        self.target
    }

    /// Resolve `requested` as imported from `importer`.
    pub fn resolve(&self, requested: &str, importer: Option<&str>) -> ResolvedTarget {
        let remote_importer = importer.filter(|id| is_remote_url(id));

        // 1. Environment flags.
        if requested == ENV_SPECIFIER {
            return ResolvedTarget::Virtual(VirtualModule::Env);
        }

        // 2. Reserved bindings: inlined for SSR, import-mapped on the client.
        if let Some(module) = VirtualModule::binding_for(requested) {
            return if self.target.is_ssr() {
                ResolvedTarget::Virtual(module)
            } else {
                ResolvedTarget::External
            };
        }

        // 3. Files synthesized for this build.
        if self.is_local_file(requested, remote_importer.is_some()) {
            return ResolvedTarget::Local(local_key(requested).to_string());
        }

        // 4. Already absolute.
        if is_remote_url(requested) {
            return ResolvedTarget::Remote(requested.to_string());
        }

        // 5. Relative: against a remote importer, otherwise caller-relative.
        if requested.starts_with("./") || requested.starts_with("../") {
            return match remote_importer.and_then(|base| join_url(base, requested)) {
                Some(url) => ResolvedTarget::Remote(url),
                None => ResolvedTarget::Local(requested.to_string()),
            };
        }

        // 6. Root-relative imports inside CDN modules.
        if requested.starts_with('/') {
            if let Some(url) = remote_importer.and_then(|base| join_url(base, requested)) {
                return ResolvedTarget::Remote(url);
            }
        }

        // 7. The runtime, pinned to the compiler's version.
        if let Some(subpath) = self.runtime_subpath(requested) {
            if self.target.is_ssr() && subpath.is_none() {
                return ResolvedTarget::Virtual(VirtualModule::LifecycleShim);
            }
            return ResolvedTarget::Remote(self.config.runtime_url(subpath));
        }

        // 8. Icon component shim.
        if requested == ICON_SHIM_SPECIFIER {
            return ResolvedTarget::Local(ICON_SHIM_FILE.to_string());
        }

        // 9. Bare package name.
        ResolvedTarget::Remote(self.config.package_url(requested))
    }

    fn is_local_file(&self, requested: &str, remote_importer: bool) -> bool {
        if self.local_files.contains(requested) {
            return true;
        }
        // `./App.svelte` from a CDN module means the CDN's file, not ours.
        !remote_importer && self.local_files.contains(local_key(requested))
    }

    /// `Some(None)` for the bare runtime name, `Some(Some(path))` for a subpath.
    fn runtime_subpath<'a>(&self, requested: &'a str) -> Option<Option<&'a str>> {
        let name = self.config.runtime_name.as_str();
        if requested == name {
            return Some(None);
        }
        requested
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(Some)
    }
}

fn join_url(base: &str, relative: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(relative).ok().map(String::from)
}
