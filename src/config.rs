//! Pipeline configuration shared by every build an orchestrator runs.

use serde::{Deserialize, Serialize};

/// Where remote packages come from and which runtime build is pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL bare package names are rebuilt against.
    pub cdn_base: String,
    /// Reserved runtime-library package name.
    pub runtime_name: String,
    /// Runtime version matching the compiler in use.
    pub runtime_version: String,
    /// Name of the synthesized entry module.
    pub entry_filename: String,
    /// Name of the synthesized app shell used for multi-section pages.
    pub app_shell_filename: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cdn_base: "https://esm.sh".into(),
            runtime_name: "svelte".into(),
            runtime_version: "5.19.0".into(),
            entry_filename: "entry.js".into(),
            app_shell_filename: "App.svelte".into(),
        }
    }
}

impl PipelineConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_cdn_base(mut self, cdn_base: impl Into<String>) -> Self {
        self.cdn_base = cdn_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_runtime(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.runtime_name = name.into();
        self.runtime_version = version.into();
        self
    }

    /// `<cdn>/<runtime>@<version>`, optionally followed by a subpath.
    pub fn runtime_url(&self, subpath: Option<&str>) -> String {
        let base = format!(
            "{}/{}@{}",
            self.cdn_base.trim_end_matches('/'),
            self.runtime_name,
            self.runtime_version
        );
        match subpath {
            Some(path) if !path.is_empty() => format!("{}/{}", base, path.trim_start_matches('/')),
            _ => base,
        }
    }

    /// `<cdn>/<package>` for a bare package specifier.
    pub fn package_url(&self, package: &str) -> String {
        format!("{}/{}", self.cdn_base.trim_end_matches('/'), package)
    }
}
