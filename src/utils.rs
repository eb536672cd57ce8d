//! Utility functions for the pipeline.
//!
//! - Virtual module ID construction and parsing
//! - JS literal / string escaping (injection-safe)
//! - Output normalization

use serde_json::Value;

// ---------------------------------------------------------------------------
// Virtual Module IDs
// ---------------------------------------------------------------------------

/// Prefix for all internal virtual modules.
/// The `\0` prefix keeps them out of reach of user specifiers and the CDN.
pub const VIRTUAL_PREFIX: &str = "\0prism:";

/// Extension of files handed to the component compiler.
pub const COMPONENT_EXT: &str = ".svelte";

/// Create the internal module ID for a virtual module name.
pub fn virtual_module_id(name: &str) -> String {
    format!("{}{}", VIRTUAL_PREFIX, name)
}

/// Extract the virtual module name from an internal ID.
pub fn extract_virtual_name(id: &str) -> Option<&str> {
    id.strip_prefix(VIRTUAL_PREFIX)
}

/// Check if a module ID is an internal virtual module.
pub fn is_virtual(id: &str) -> bool {
    id.starts_with(VIRTUAL_PREFIX)
}

/// Check if a module ID names a single-file component.
pub fn is_component_file(id: &str) -> bool {
    let path = id.split(['?', '#']).next().unwrap_or(id);
    path.ends_with(COMPONENT_EXT)
}

pub fn is_remote_url(id: &str) -> bool {
    id.starts_with("https://") || id.starts_with("http://")
}

/// Local file table key for a specifier: `./App.svelte` and `App.svelte` are the same file.
pub fn local_key(specifier: &str) -> &str {
    specifier.strip_prefix("./").unwrap_or(specifier)
}

/// Whether `name` can be used as a JS binding (`export const name`).
pub fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') && !is_reserved_word(name)
}

fn is_reserved_word(name: &str) -> bool {
    matches!(
        name,
        "break" | "case" | "catch" | "class" | "const" | "continue" | "debugger" | "default"
            | "delete" | "do" | "else" | "enum" | "export" | "extends" | "false" | "finally"
            | "for" | "function" | "if" | "import" | "in" | "instanceof" | "let" | "new"
            | "null" | "return" | "static" | "super" | "switch" | "this" | "throw" | "true"
            | "try" | "typeof" | "var" | "void" | "while" | "with" | "yield" | "await"
            // Reserved or unbindable in strict code, which every module is.
            | "implements" | "interface" | "package" | "private" | "protected" | "public"
            | "arguments" | "eval"
    )
}

/// Whether `name` can follow `--` in a custom property declaration.
pub fn is_css_custom_property_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii())
}

// ---------------------------------------------------------------------------
// JS Escaping
// ---------------------------------------------------------------------------

/// Escape a string for safe embedding inside a JS double-quoted string literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Serialize a JSON value as a JS expression that is safe inside `<script>`.
pub fn to_js_literal(value: &Value) -> String {
    // Serializing a `Value` cannot fail: every key is already a string.
    let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    json.replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

// ---------------------------------------------------------------------------
// Output Normalization
// ---------------------------------------------------------------------------

/// Strip bundler region markers (they can carry absolute paths) and normalize
/// line endings so identical inputs give identical bytes.
pub fn normalize_output(code: &str) -> String {
    code.lines()
        .filter(|line| !line.starts_with("//#region") && !line.starts_with("//#endregion"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_virtual_module_id() {
        assert_eq!(virtual_module_id("content"), "\0prism:content");
        assert_eq!(extract_virtual_name("\0prism:content"), Some("content"));
        assert_eq!(extract_virtual_name("$content"), None);
        assert!(is_virtual("\0prism:env"));
        assert!(!is_virtual("prism:env"));
    }

    #[test]
    fn test_is_component_file() {
        assert!(is_component_file("App.svelte"));
        assert!(is_component_file("https://esm.sh/x/Button.svelte?raw"));
        assert!(!is_component_file("entry.js"));
    }

    #[test]
    fn test_local_key() {
        assert_eq!(local_key("./App.svelte"), "App.svelte");
        assert_eq!(local_key("App.svelte"), "App.svelte");
        assert_eq!(local_key("../App.svelte"), "../App.svelte");
    }

    #[test]
    fn test_is_js_identifier() {
        assert!(is_js_identifier("title"));
        assert!(is_js_identifier("_private"));
        assert!(is_js_identifier("$store"));
        assert!(is_js_identifier("item2"));
        assert!(!is_js_identifier(""));
        assert!(!is_js_identifier("2fast"));
        assert!(!is_js_identifier("hero-image"));
        assert!(!is_js_identifier("default"));
    }

    #[test]
    fn test_strict_mode_words_are_not_identifiers() {
        for word in [
            "package", "interface", "public", "private", "protected", "implements", "arguments",
            "eval",
        ] {
            assert!(!is_js_identifier(word), "{}", word);
        }
    }

    #[test]
    fn test_is_css_custom_property_name() {
        assert!(is_css_custom_property_name("primary"));
        assert!(is_css_custom_property_name("space-2_x"));
        assert!(!is_css_custom_property_name(""));
        assert!(!is_css_custom_property_name("bad name"));
        assert!(!is_css_custom_property_name("a;b"));
        assert!(!is_css_custom_property_name("x:y"));
    }

    #[test]
    fn test_escape_js_string() {
        assert_eq!(escape_js_string(r#"he said "hi""#), r#"he said \"hi\""#);
        assert_eq!(escape_js_string("line1\nline2"), "line1\\nline2");
    }

    #[test]
    fn test_to_js_literal_escapes_script_close() {
        let literal = to_js_literal(&json!({ "html": "</script><b>" }));
        assert_eq!(literal, r#"{"html":"<\/script><b>"}"#);
    }

    #[test]
    fn test_normalize_output() {
        let code = "//#region /abs/path.js\nconst a = 1;\r\n//#endregion\nexport { a };";
        assert_eq!(normalize_output(code), "const a = 1;\nexport { a };");
    }
}
