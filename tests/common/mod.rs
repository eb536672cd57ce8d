//! In-process stand-ins for the external compiler, bundler and CDN.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use sha2::{Digest, Sha256};

use prism_bundler::{
    BuildOptions, BuildOrchestrator, BuildRequest, BundleHooks, BundleInput, BundleOutput,
    CompileOptions, CompiledModule, CompilerError, ComponentCompiler, ComponentRecord,
    ComponentSource, CssMode, FetchError, Generate, Head, ModuleBundler, PipelineConfig,
    RemoteFetcher, Sources, VirtualBindings,
};

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(/)?([a-zA-Z][a-zA-Z0-9:_-]*)(?:\s[^>]*?)?(/)?>"#).unwrap()
});
static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<script[^>]*>(.*?)</script>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<style[^>]*>(.*?)</style>").unwrap());

const VOID_TAGS: [&str; 6] = ["img", "br", "hr", "input", "meta", "link"];

/// Splits a component into script, markup and style, and rejects markup with
/// unclosed elements. Errors carry a position but no frame.
#[derive(Debug, Clone, Default)]
pub struct FakeSvelte {
    compiles: Arc<AtomicUsize>,
}

impl FakeSvelte {
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0);
    (line, column)
}

fn check_balanced(source: &str) -> Result<(), CompilerError> {
    let mut open: Vec<(String, usize)> = Vec::new();
    let mut raw_until: Option<String> = None;

    for caps in TAG_RE.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        let closing = caps.get(1).is_some();
        let name = caps[2].to_string();
        let self_closing = caps.get(3).is_some();

        if let Some(raw) = &raw_until {
            if closing && &name == raw {
                raw_until = None;
            }
            continue;
        }
        if !closing && (name == "script" || name == "style") {
            raw_until = Some(name);
            continue;
        }
        if self_closing || VOID_TAGS.contains(&name.as_str()) {
            continue;
        }
        if !closing {
            open.push((name, whole.start()));
            continue;
        }
        match open.pop() {
            Some((top, _)) if top == name => {}
            Some((top, offset)) => return Err(left_open(source, &top, offset)),
            None => {
                let (line, column) = position(source, whole.start());
                return Err(CompilerError {
                    name: "CompileError".into(),
                    message: format!("`</{}>` attempted to close an element that was not open", name),
                    line: Some(line),
                    column: Some(column),
                    frame: None,
                });
            }
        }
    }

    match open.pop() {
        Some((top, offset)) => Err(left_open(source, &top, offset)),
        None => Ok(()),
    }
}

fn left_open(source: &str, tag: &str, offset: usize) -> CompilerError {
    let (line, column) = position(source, offset);
    CompilerError {
        name: "CompileError".into(),
        message: format!("`<{}>` was left open", tag),
        line: Some(line),
        column: Some(column),
        frame: None,
    }
}

impl ComponentCompiler for FakeSvelte {
    fn compile(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> impl Future<Output = Result<CompiledModule, CompilerError>> + Send {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let result = check_balanced(source).map(|()| render_module(source, options));
        async move { result }
    }
}

fn render_module(source: &str, options: &CompileOptions) -> CompiledModule {
    let script: String = SCRIPT_RE
        .captures_iter(source)
        .map(|caps| caps[1].trim().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let css: String = STYLE_RE
        .captures_iter(source)
        .map(|caps| caps[1].trim().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let markup = STYLE_RE.replace_all(&SCRIPT_RE.replace_all(source, ""), "").trim().to_string();

    let generate = match options.generate {
        Generate::Server => "server",
        Generate::Client => "client",
    };
    let css_mode = match options.css {
        CssMode::Injected => "injected",
        CssMode::External => "external",
    };

    let mut code = format!(
        "// compiled {} generate={} css={} hydratable={}\nimport \"svelte/internal/{}\";\n",
        options.filename, generate, css_mode, options.hydratable, generate
    );
    if !script.is_empty() {
        code.push_str(&script);
        code.push('\n');
    }
    code.push_str(&format!(
        "export const __markup = {};\n",
        serde_json::to_string(&markup).unwrap()
    ));
    if options.css == CssMode::Injected && !css.is_empty() {
        code.push_str(&format!(
            "export const __css = {};\n",
            serde_json::to_string(&css).unwrap()
        ));
    }
    code.push_str("export default function Component() {}\n");

    CompiledModule {
        code,
        map: Some("{\"version\":3}".into()),
        warnings: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Bundler
// ---------------------------------------------------------------------------

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:(?:import|export)\b[^;\n]*?\bfrom\s*|import\s*)"([^"]+)""#).unwrap()
});

/// Walks the graph breadth-first through the hooks and concatenates modules
/// with `// module:` markers. Externals are listed at the top.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBundler;

fn marker(id: &str) -> String {
    id.replace('\0', "\\0")
}

impl ModuleBundler for GraphBundler {
    fn bundle<H: BundleHooks>(
        &self,
        input: BundleInput,
        hooks: Arc<H>,
    ) -> impl Future<Output = anyhow::Result<BundleOutput>> + Send {
        async move {
            let entry = hooks
                .resolve_id(&input.entry, None)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unresolved entry {}", input.entry))?;

            let mut queue = VecDeque::from([entry.id.to_string()]);
            let mut seen = BTreeSet::new();
            let mut externals = BTreeSet::new();
            let mut body = String::new();

            while let Some(id) = queue.pop_front() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                let loaded = hooks
                    .load(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("nothing loaded {}", marker(&id)))?;
                let code = match hooks.transform(&loaded.code, &id).await? {
                    Some(transformed) => transformed.code,
                    None => loaded.code.to_string(),
                };

                body.push_str(&format!("//#region {}\n// module: {}\n", marker(&id), marker(&id)));
                body.push_str(code.trim_end());
                body.push_str("\n//#endregion\n");

                let specifiers: Vec<String> = IMPORT_RE
                    .captures_iter(&code)
                    .map(|caps| caps[1].to_string())
                    .collect();
                for specifier in specifiers {
                    let resolved = hooks
                        .resolve_id(&specifier, Some(&id))
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("unresolved {}", specifier))?;
                    if resolved.external {
                        externals.insert(resolved.id.to_string());
                    } else {
                        queue.push_back(resolved.id.to_string());
                    }
                }
            }

            let mut code = format!("// bundle {}\n", input.target.as_str());
            for external in &externals {
                code.push_str(&format!("// external: {}\n", external));
            }
            code.push_str(&body);
            Ok(BundleOutput { code, map: None })
        }
    }
}

// ---------------------------------------------------------------------------
// CDN
// ---------------------------------------------------------------------------

/// Serves a stub module for every URL except those marked as failing.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    log: Arc<Mutex<Vec<String>>>,
    failing: Arc<BTreeSet<String>>,
}

impl StaticFetcher {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            log: Arc::default(),
            failing: Arc::new(urls.iter().map(|u| u.to_string()).collect()),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl RemoteFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        self.log.lock().unwrap().push(url.to_string());
        let result = if self.failing.contains(url) {
            Err(FetchError {
                url: url.to_string(),
                message: "HTTP 404 Not Found".into(),
            })
        } else {
            Ok(format!("export const __remote = {:?};\n", url))
        };
        async move { result }
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub type TestOrchestrator = BuildOrchestrator<FakeSvelte, GraphBundler, StaticFetcher>;

pub fn orchestrator_with(compiler: FakeSvelte, fetcher: StaticFetcher) -> TestOrchestrator {
    BuildOrchestrator::new(PipelineConfig::default(), compiler, GraphBundler, fetcher)
}

pub fn orchestrator() -> TestOrchestrator {
    orchestrator_with(FakeSvelte::default(), StaticFetcher::default())
}

pub fn options(build_static: bool, hydrated: bool) -> BuildOptions {
    BuildOptions {
        build_static,
        hydrated,
        ..Default::default()
    }
}

pub fn raw_request(source: &str, options: BuildOptions) -> BuildRequest {
    BuildRequest {
        sources: Sources::One(ComponentSource::Raw(source.to_string())),
        head: Head::default(),
        options,
        bindings: VirtualBindings::default(),
    }
}

pub fn record(html: &str, css: &str, data: serde_json::Value) -> ComponentSource {
    ComponentSource::Record(ComponentRecord {
        html: html.to_string(),
        css: css.to_string(),
        js: String::new(),
        data: serde_json::from_value(data).unwrap(),
    })
}

pub fn sha256(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}
