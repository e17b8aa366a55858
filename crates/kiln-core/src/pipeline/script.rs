//! Script capability.
//!
//! Scans `import`, `export ... from`, `require()` and dynamic `import()`
//! for static string specifiers and inlines `process.env.KEY` for keys
//! present in the loaded environment.

use super::{push_unique, Capability, CapabilityError, CapabilityInput, CapabilityOutput};
use crate::env::EnvMap;
use crate::resource::ModuleKind;
use regex_lite::Regex;
use std::sync::OnceLock;

fn import_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // import x from '...'; import { a } from '...'; import '...';
            r#"\bimport\s+(?:[\w$*{}\s,]+?\s+from\s+)?["']([^"']+)["']"#,
            // export * from '...'; export { a } from '...'
            r#"\bexport\s+(?:\*\s+as\s+[\w$]+|\*|\{[^}]*\})\s*from\s*["']([^"']+)["']"#,
            r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#,
            r#"\bimport\s*\(\s*["']([^"']+)["']\s*\)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("import pattern is valid"))
        .collect()
    })
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bprocess\.env\.([A-Za-z_][A-Za-z0-9_]*)").expect("env pattern is valid")
    })
}

/// Specifiers in `source`, in order of appearance.
#[must_use]
pub fn scan_imports(source: &str) -> Vec<String> {
    let mut deps = Vec::new();

    for line in source.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
            continue;
        }

        let mut found: Vec<(usize, &str)> = import_patterns()
            .iter()
            .flat_map(|re| re.captures_iter(line))
            .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str())))
            .collect();
        found.sort_by_key(|(start, _)| *start);

        for (_, spec) in found {
            push_unique(&mut deps, spec);
        }
    }

    deps
}

/// Replace `process.env.KEY` with the JSON string literal of its value.
/// Keys missing from `env` are left untouched.
#[must_use]
pub fn inline_env(source: &str, env: &EnvMap) -> String {
    if env.is_empty() || !source.contains("process.env.") {
        return source.to_string();
    }

    env_pattern()
        .replace_all(source, |caps: &regex_lite::Captures<'_>| match env.get(&caps[1]) {
            Some(value) => serde_json::Value::String(value.clone()).to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Built-in `script` capability.
#[derive(Debug, Clone, Default)]
pub struct ScriptCapability {
    env: EnvMap,
}

impl ScriptCapability {
    #[must_use]
    pub fn new(env: EnvMap) -> Self {
        Self { env }
    }
}

impl Capability for ScriptCapability {
    fn name(&self) -> &str {
        "script"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Script
    }

    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
        let source = input.text()?;
        let dependencies = scan_imports(source);
        let code = inline_env(source, &self.env);

        Ok(CapabilityOutput {
            code: code.into_bytes(),
            dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_import_forms() {
        let source = r#"
import React from 'react';
import { a, b } from "./lib/ab";
import * as ns from './ns';
import './side-effect.css';
export * from './reexport';
export { c } from './c';
const fs = require('./fs-shim');
const lazy = import('./lazy');
"#;
        assert_eq!(
            scan_imports(source),
            vec![
                "react",
                "./lib/ab",
                "./ns",
                "./side-effect.css",
                "./reexport",
                "./c",
                "./fs-shim",
                "./lazy",
            ]
        );
    }

    #[test]
    fn test_scan_dedupes_and_keeps_first_position() {
        let source = "import a from './a';\nimport b from './b';\nconst again = require('./a');\n";
        assert_eq!(scan_imports(source), vec!["./a", "./b"]);
    }

    #[test]
    fn test_scan_skips_comments() {
        let source = "// import x from './commented';\n/* require('./block') */\nimport y from './real';\n";
        assert_eq!(scan_imports(source), vec!["./real"]);
    }

    #[test]
    fn test_scan_same_line_order() {
        let source = "const a = require('./first'), b = import('./second');";
        assert_eq!(scan_imports(source), vec!["./first", "./second"]);
    }

    #[test]
    fn test_inline_env() {
        let mut env = EnvMap::default();
        env.insert("API_URL".to_string(), "https://api.example.com".to_string());

        let out = inline_env(
            "fetch(process.env.API_URL);\nconsole.log(process.env.UNSET);",
            &env,
        );
        assert_eq!(
            out,
            "fetch(\"https://api.example.com\");\nconsole.log(process.env.UNSET);"
        );
    }

    #[test]
    fn test_compile_rejects_invalid_utf8() {
        let id = crate::ResourceId::from_canonical(std::path::Path::new("/p/a.js"));
        let input = CapabilityInput {
            id: &id,
            source: &[0xff, 0xfe],
            options: &serde_json::Value::Null,
        };
        assert!(ScriptCapability::default().compile(&input).is_err());
    }
}
