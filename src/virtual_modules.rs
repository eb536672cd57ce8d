//! Sources of the in-memory modules that stand in for real files.
//!
//! Five reserved specifiers expose the project's runtime bindings (content,
//! design tokens, data collections, host utilities, a backend stub). During a
//! server render they are inlined from the request's [`VirtualBindings`];
//! client builds leave them external for the page's import map. Two more
//! modules are always synthesized: the environment flags and, for server
//! renders, the lifecycle shim wrapping the runtime.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::utils::{is_css_custom_property_name, is_js_identifier, to_js_literal};
use crate::{BuildTarget, Collection, VirtualBindings};

/// Environment flags module.
pub const ENV_SPECIFIER: &str = "esm-env";
pub const CONTENT_SPECIFIER: &str = "$content";
pub const DESIGN_SPECIFIER: &str = "$design";
pub const DATA_SPECIFIER: &str = "$data";
pub const UTILS_SPECIFIER: &str = "$utils";
pub const BACKEND_SPECIFIER: &str = "$backend";

/// Icon component package replaced by a local shim.
pub const ICON_SHIM_SPECIFIER: &str = "@iconify/svelte";
/// Local file the icon shim is served as.
pub const ICON_SHIM_FILE: &str = "__icon_shim.svelte";

/// Lifecycle hooks overridden with no-ops in the server render.
const SSR_NOOP_HOOKS: [&str; 4] = ["onMount", "onDestroy", "beforeUpdate", "afterUpdate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualModule {
    Env,
    Content,
    Design,
    Data,
    Utils,
    Backend,
    LifecycleShim,
}

impl VirtualModule {
    /// The five binding modules subject to the SSR/client split.
    pub const BINDINGS: [VirtualModule; 5] = [
        VirtualModule::Content,
        VirtualModule::Design,
        VirtualModule::Data,
        VirtualModule::Utils,
        VirtualModule::Backend,
    ];

    /// Match one of the reserved binding specifiers.
    pub fn binding_for(specifier: &str) -> Option<Self> {
        match specifier {
            CONTENT_SPECIFIER => Some(VirtualModule::Content),
            DESIGN_SPECIFIER => Some(VirtualModule::Design),
            DATA_SPECIFIER => Some(VirtualModule::Data),
            UTILS_SPECIFIER => Some(VirtualModule::Utils),
            BACKEND_SPECIFIER => Some(VirtualModule::Backend),
            _ => None,
        }
    }

    pub fn specifier(self) -> Option<&'static str> {
        match self {
            VirtualModule::Env => Some(ENV_SPECIFIER),
            VirtualModule::Content => Some(CONTENT_SPECIFIER),
            VirtualModule::Design => Some(DESIGN_SPECIFIER),
            VirtualModule::Data => Some(DATA_SPECIFIER),
            VirtualModule::Utils => Some(UTILS_SPECIFIER),
            VirtualModule::Backend => Some(BACKEND_SPECIFIER),
            VirtualModule::LifecycleShim => None,
        }
    }

    /// Stable name used in internal module IDs.
    pub fn name(self) -> &'static str {
        match self {
            VirtualModule::Env => "env",
            VirtualModule::Content => "content",
            VirtualModule::Design => "design",
            VirtualModule::Data => "data",
            VirtualModule::Utils => "utils",
            VirtualModule::Backend => "backend",
            VirtualModule::LifecycleShim => "runtime-ssr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "env" => Some(VirtualModule::Env),
            "content" => Some(VirtualModule::Content),
            "design" => Some(VirtualModule::Design),
            "data" => Some(VirtualModule::Data),
            "utils" => Some(VirtualModule::Utils),
            "backend" => Some(VirtualModule::Backend),
            "runtime-ssr" => Some(VirtualModule::LifecycleShim),
            _ => None,
        }
    }
}

/// Everything a virtual module's source depends on.
#[derive(Debug, Clone, Copy)]
pub struct VirtualContext<'a> {
    pub bindings: &'a VirtualBindings,
    pub target: BuildTarget,
    pub dev: bool,
    /// Pinned runtime URL the lifecycle shim re-exports.
    pub runtime_url: &'a str,
}

/// Generate the JS source of a virtual module.
pub fn render(module: VirtualModule, ctx: &VirtualContext<'_>) -> String {
    match module {
        VirtualModule::Env => env_module(ctx.target, ctx.dev),
        VirtualModule::Content => record_module(&ctx.bindings.content, None),
        VirtualModule::Design => record_module(
            &ctx.bindings.design,
            Some(css_variables(&ctx.bindings.design)),
        ),
        VirtualModule::Data => data_module(&ctx.bindings.data),
        VirtualModule::Utils => utils_module(&ctx.bindings.project_id),
        VirtualModule::Backend => backend_stub(),
        VirtualModule::LifecycleShim => lifecycle_shim(ctx.runtime_url),
    }
}

fn env_module(target: BuildTarget, dev: bool) -> String {
    let browser = !target.is_ssr();
    format!(
        "export const BROWSER = {browser};\n\
         export const DEV = {dev};\n\
         export const NODE = {node};\n\
         export default {{ BROWSER, DEV, NODE }};\n",
        browser = browser,
        dev = dev,
        node = !browser,
    )
}

/// Prefix of the module-local bindings in generated modules. Keys carrying it
/// never get a named export.
const LOCAL_PREFIX: &str = "__prism_";

/// Whether `key` can become `export const key` without clashing with the
/// module's own bindings or with a name it already exports.
fn exportable(key: &str, taken: &[&str]) -> bool {
    is_js_identifier(key) && !key.starts_with(LOCAL_PREFIX) && !taken.contains(&key)
}

/// `export default {…}` plus a named export for each identifier-safe key.
fn record_module(
    fields: &std::collections::BTreeMap<String, Value>,
    css_variables: Option<String>,
) -> String {
    let object: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    let taken: &[&str] = if css_variables.is_some() {
        &["css_variables"]
    } else {
        &[]
    };

    let mut code = format!(
        "const __prism_fields = {};\n",
        to_js_literal(&Value::Object(object))
    );
    for key in fields.keys().filter(|key| exportable(key, taken)) {
        let _ = writeln!(
            code,
            "export const {key} = __prism_fields[\"{key}\"];",
            key = key
        );
    }
    if let Some(css) = css_variables {
        let _ = writeln!(
            code,
            "export const css_variables = {};",
            to_js_literal(&Value::String(css))
        );
    }
    code.push_str("export default __prism_fields;\n");
    code
}

/// Design tokens with scalar values as CSS custom properties.
///
/// Tokens whose name is not a valid custom-property name, or whose value
/// would escape the declaration, are left out.
pub fn css_variables(tokens: &std::collections::BTreeMap<String, Value>) -> String {
    let mut css = String::from(":root {");
    for (name, value) in tokens {
        if !is_css_custom_property_name(name) {
            continue;
        }
        let value = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if value.trim().is_empty() || value.contains([';', '{', '}', '\n', '\r']) {
            continue;
        }
        let _ = write!(css, " --{}: {};", name, value);
    }
    css.push_str(" }");
    css
}

fn collection_value(collection: &Collection) -> Value {
    let mut object = Map::new();
    object.insert("records".into(), Value::Array(collection.records.clone()));
    object.insert(
        "schema".into(),
        collection.schema.clone().unwrap_or(Value::Null),
    );
    Value::Object(object)
}

/// Collections by name, with `collection(name)` falling back to an empty one.
fn data_module(data: &std::collections::BTreeMap<String, Collection>) -> String {
    let collections: Map<String, Value> = data
        .iter()
        .map(|(name, collection)| (name.clone(), collection_value(collection)))
        .collect();

    let mut code = format!(
        "const __prism_collections = {};\n\
         const __prism_empty = Object.freeze({{ records: [], schema: null }});\n\
         export function collection(name) {{\n\
         \x20 return Object.prototype.hasOwnProperty.call(__prism_collections, name) ? __prism_collections[name] : __prism_empty;\n\
         }}\n",
        to_js_literal(&Value::Object(collections))
    );
    for name in data.keys().filter(|name| exportable(name, &["collection"])) {
        let _ = writeln!(
            code,
            "export const {name} = __prism_collections[\"{name}\"];",
            name = name
        );
    }
    code.push_str("export default __prism_collections;\n");
    code
}

fn utils_module(project_id: &str) -> String {
    format!(
        "export const project_id = {id};\n\
         export function asset_url(path) {{\n\
         \x20 return \"/assets/\" + project_id + \"/\" + String(path).replace(/^\\/+/, \"\");\n\
         }}\n\
         export function slugify(text) {{\n\
         \x20 return String(text).toLowerCase().trim().replace(/[^a-z0-9]+/g, \"-\").replace(/^-+|-+$/g, \"\");\n\
         }}\n\
         export default {{ project_id, asset_url, slugify }};\n",
        id = to_js_literal(&Value::String(project_id.to_string()))
    )
}

fn backend_stub() -> String {
    "export async function call(name, payload) {\n\
     \x20 return null;\n\
     }\n\
     export async function query(collection, filter) {\n\
     \x20 return [];\n\
     }\n\
     export default { call, query };\n"
        .to_string()
}

/// Re-export the real runtime, overriding lifecycle hooks for the server render.
///
/// Local exports shadow names from `export *`, so every other runtime export
/// passes through untouched.
pub fn lifecycle_shim(runtime_url: &str) -> String {
    let mut code = format!(
        "export * from \"{}\";\n",
        crate::utils::escape_js_string(runtime_url)
    );
    for hook in SSR_NOOP_HOOKS {
        let _ = writeln!(code, "export function {}() {{}}", hook);
    }
    code.push_str("export function tick() {\n  return Promise.resolve();\n}\n");
    code
}

/// Minimal icon component rendering the Iconify SVG endpoint.
pub fn icon_shim() -> &'static str {
    r#"<script>
  export let icon = "";
  export let width = "1em";
  export let height = width;
</script>

<img class="icon" src="https://api.iconify.design/{icon.replace(':', '/')}.svg" alt={icon} {width} {height} />
"#
}
