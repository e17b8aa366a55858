//! Style capability.
//!
//! SCSS and Sass sources are compiled with grass first. `@import` rules
//! become dependency edges and are removed from the output, since the
//! imported sheet lands in the same style bundle. Relative `url()`
//! references become asset edges and are left in place for the emitter to
//! rewrite. The result is parsed and printed with lightningcss.

use super::{push_unique, Capability, CapabilityError, CapabilityInput, CapabilityOutput};
use crate::resource::ModuleKind;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use regex_lite::Regex;
use std::sync::OnceLock;

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"@import\s+(?:url\(\s*)?["']?([^"')\s;]+)["']?\s*\)?[^;]*;"#)
            .expect("import pattern is valid")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"url\(\s*["']?([^"')\s]+)["']?\s*\)"#).expect("url pattern is valid")
    })
}

fn is_remote(spec: &str) -> bool {
    spec.starts_with("http://")
        || spec.starts_with("https://")
        || spec.starts_with("//")
        || spec.starts_with("data:")
}

/// Remove local `@import` rules, returning the remaining CSS and the
/// imported specifiers in order. Remote imports are kept as written.
#[must_use]
pub fn strip_imports(css: &str) -> (String, Vec<String>) {
    let mut deps = Vec::new();
    let stripped = import_pattern().replace_all(css, |caps: &regex_lite::Captures<'_>| {
        let spec = &caps[1];
        if is_remote(spec) {
            caps[0].to_string()
        } else {
            push_unique(&mut deps, spec);
            String::new()
        }
    });
    (stripped.into_owned(), deps)
}

/// Relative `url()` references in order of appearance.
#[must_use]
pub fn scan_urls(css: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for caps in url_pattern().captures_iter(css) {
        let spec = &caps[1];
        if spec.starts_with("./") || spec.starts_with("../") {
            push_unique(&mut deps, spec);
        }
    }
    deps
}

fn compile_sass(input: &CapabilityInput<'_>, source: &str, minify: bool) -> Result<String, CapabilityError> {
    let style = if minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };
    let mut options = grass::Options::default().style(style).load_path(input.id.dir());
    if input.id.extension() == Some("sass") {
        options = options.input_syntax(grass::InputSyntax::Sass);
    }

    grass::from_string(source.to_string(), &options).map_err(|e| CapabilityError::new(e.to_string()))
}

fn print_css(filename: &str, css: &str, minify: bool) -> Result<String, CapabilityError> {
    let options = ParserOptions {
        filename: filename.to_string(),
        ..ParserOptions::default()
    };
    let mut stylesheet =
        StyleSheet::parse(css, options).map_err(|e| CapabilityError::new(format!("parse error: {e}")))?;

    if minify {
        stylesheet
            .minify(MinifyOptions::default())
            .map_err(|e| CapabilityError::new(format!("minify error: {e}")))?;
    }

    let printed = stylesheet
        .to_css(PrinterOptions {
            minify,
            ..PrinterOptions::default()
        })
        .map_err(|e| CapabilityError::new(format!("print error: {e}")))?;
    Ok(printed.code)
}

/// Built-in `style` capability.
///
/// Options: `minify` (bool).
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleCapability;

impl Capability for StyleCapability {
    fn name(&self) -> &str {
        "style"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Style
    }

    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
        let source = input.text()?;
        let minify = input.flag("minify");

        let css = match input.id.extension() {
            Some("scss" | "sass") => compile_sass(input, source, minify)?,
            _ => source.to_string(),
        };

        let (css, mut dependencies) = strip_imports(&css);
        for spec in scan_urls(&css) {
            push_unique(&mut dependencies, &spec);
        }

        let code = print_css(input.id.as_str(), &css, minify)?;
        Ok(CapabilityOutput {
            code: code.into_bytes(),
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceId;
    use std::path::Path;

    fn compile(path: &str, source: &str, options: serde_json::Value) -> Result<CapabilityOutput, CapabilityError> {
        let id = ResourceId::from_canonical(Path::new(path));
        StyleCapability.compile(&CapabilityInput {
            id: &id,
            source: source.as_bytes(),
            options: &options,
        })
    }

    #[test]
    fn test_strip_imports() {
        let (css, deps) = strip_imports(
            "@import './reset.css';\n@import url(\"theme.css\") screen;\n@import url(https://fonts.example.com/a.css);\nbody { color: red; }\n",
        );
        assert_eq!(deps, vec!["./reset.css", "theme.css"]);
        assert!(!css.contains("reset.css"));
        assert!(css.contains("https://fonts.example.com/a.css"));
        assert!(css.contains("body { color: red; }"));
    }

    #[test]
    fn test_scan_urls_only_relative() {
        let deps = scan_urls(
            ".a { background: url(./img/a.png); }\n.b { background: url('../b.svg'); }\n.c { background: url(data:image/png;base64,AAAA); }\n.d { background: url(/abs.png); }\n.e { background: url(\"./img/a.png\"); }\n",
        );
        assert_eq!(deps, vec!["./img/a.png", "../b.svg"]);
    }

    #[test]
    fn test_compile_plain_css() {
        let out = compile(
            "/p/style.css",
            "@import './base.css';\n.logo { background: url(./logo.png); color: red; }\n",
            serde_json::Value::Null,
        )
        .unwrap();

        assert_eq!(out.dependencies, vec!["./base.css", "./logo.png"]);
        let code = String::from_utf8(out.code).unwrap();
        assert!(code.contains(".logo"));
        assert!(!code.contains("@import"));
    }

    #[test]
    fn test_compile_minify() {
        let out = compile(
            "/p/style.css",
            ".a {\n  color: #ff0000;\n}\n",
            serde_json::json!({ "minify": true }),
        )
        .unwrap();
        let code = String::from_utf8(out.code).unwrap();
        assert!(code.starts_with(".a{color:"));
    }

    #[test]
    fn test_compile_scss() {
        let out = compile(
            "/p/style.scss",
            "$brand: #336699;\n.nav { a { color: $brand; } }\n",
            serde_json::Value::Null,
        )
        .unwrap();
        let code = String::from_utf8(out.code).unwrap();
        assert!(code.contains(".nav a"));
        assert!(!code.contains("$brand"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = compile("/p/broken.scss", ".a { color: $undefined; }", serde_json::Value::Null).unwrap_err();
        assert!(err.message.contains("Undefined variable"));
    }
}
