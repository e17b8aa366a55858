//! Script bundle linking.
//!
//! Every script module becomes a function in a `__modules` registry, keyed
//! by its position in the bundle. Static `import`/`export` statements,
//! `require()` calls and `import()` calls that point at bundled scripts are
//! rewritten to `require(<key>)`. Imports of styles become comments, since
//! the style bundle is emitted separately, and imports of assets become
//! their output URLs. Scripts nothing else in the bundle imports, and the
//! configured entries, are required at the end.

use super::relative_url;
use crate::graph::{Module, ModuleGraph};
use crate::resource::{ModuleKind, ResourceId};
use regex_lite::{Captures, Regex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

const PRELUDE: &str = "\
var __modules = {};
var __cache = {};

function __require(id) {
  if (__cache[id]) return __cache[id].exports;
  var module = (__cache[id] = { exports: {} });
  __modules[id](module, module.exports, __require);
  return module.exports;
}

function __export(target, getters) {
  for (var name in getters) {
    Object.defineProperty(target, name, { enumerable: true, get: getters[name] });
  }
}

function __reexport(target, source) {
  for (var name in source) {
    if (name !== \"default\" && !Object.prototype.hasOwnProperty.call(target, name)) {
      Object.defineProperty(target, name, { enumerable: true, get: (function (n) { return function () { return source[n]; }; })(name) });
    }
  }
}

function __default(m) {
  return m && m.default !== undefined ? m.default : m;
}
";

fn export_from_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?m)^([ \t]*)export\s*(\*\s*as\s+[\w$]+|\*|\{[^}]*\})\s*from\s*["']([^"']+)["'][ \t]*;?"#,
        )
        .expect("export-from pattern is valid")
    })
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)^([ \t]*)import\s*(?:([\w$*{}\s,]+?)\s*from\s*)?["']([^"']+)["'][ \t]*;?"#)
            .expect("import pattern is valid")
    })
}

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(require|import)\s*\(\s*["']([^"']+)["']\s*\)"#).expect("call pattern is valid")
    })
}

fn export_list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s*\{([^}]*)\}[ \t]*;?").expect("export list pattern is valid")
    })
}

fn export_default_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^([ \t]*)export\s+default\s+").expect("export default pattern is valid")
    })
}

fn export_decl_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^([ \t]*)export\s+((?:const|let|var)\s+([\w$]+)|(?:async\s+)?function\s*\*?\s*([\w$]+)|class\s+([\w$]+))",
        )
        .expect("export declaration pattern is valid")
    })
}

/// What a specifier of one module points at, from the bundle's point of view.
#[derive(Debug, Clone)]
enum Target {
    /// Key of a script in this bundle.
    Script(usize),
    /// Bundled into the style bundle.
    Style,
    /// URL of an emitted file, relative to the script bundle.
    Url(String),
    /// Not part of the graph; left for the runtime.
    External,
}

/// Link the script modules of one bundle, in emission order.
///
/// `label` names each module in its header comment; `locations` maps emitted
/// modules to their output paths; `bundle_location` is where the script
/// bundle itself is written.
pub(super) fn link(
    members: &[&Arc<Module>],
    graph: &ModuleGraph,
    locations: &FxHashMap<ResourceId, String>,
    bundle_location: &str,
    label: impl Fn(&ResourceId) -> String,
) -> String {
    let keys: FxHashMap<&ResourceId, usize> = members.iter().enumerate().map(|(key, m)| (&m.id, key)).collect();

    let mut imported = FxHashSet::default();
    for module in members {
        for edge in graph.dependencies_of(&module.id) {
            if edge.to != module.id && keys.contains_key(&edge.to) {
                imported.insert(edge.to.clone());
            }
        }
    }

    let mut out = String::from("(function () {\n");
    out.push_str(PRELUDE);

    for (key, module) in members.iter().enumerate() {
        let targets: FxHashMap<&str, Target> = graph
            .dependencies_of(&module.id)
            .map(|edge| {
                let target = match keys.get(&edge.to) {
                    Some(&key) => Target::Script(key),
                    None => match graph.get(&edge.to).map(|m| m.kind) {
                        Some(ModuleKind::Style) => Target::Style,
                        _ => locations
                            .get(&edge.to)
                            .map_or(Target::External, |location| {
                                Target::Url(relative_url(bundle_location, location))
                            }),
                    },
                };
                (edge.specifier.as_str(), target)
            })
            .collect();

        let body = rewrite_module(&String::from_utf8_lossy(&module.compiled), &targets);
        let _ = writeln!(out, "\n// {}", label(&module.id));
        let _ = writeln!(out, "__modules[{key}] = function (module, exports, require) {{");
        for line in body.lines() {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str("  ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str("};\n");
    }

    out.push('\n');
    for (key, module) in members.iter().enumerate() {
        if graph.entries().contains(&module.id) || !imported.contains(&module.id) {
            let _ = writeln!(out, "__require({key});");
        }
    }
    out.push_str("})();\n");
    out
}

/// Rewrite one module's imports and exports into registry calls.
fn rewrite_module(source: &str, targets: &FxHashMap<&str, Target>) -> String {
    let mut getters: Vec<String> = Vec::new();
    let mut reexports = 0usize;

    let code = export_from_pattern().replace_all(source, |caps: &Captures<'_>| {
        let indent = &caps[1];
        let clause = caps[2].trim();
        let specifier = &caps[3];
        let Some(module) = require_expr(specifier, targets) else {
            return format!("{indent}/* style: {specifier} */");
        };

        if clause == "*" {
            return format!("{indent}__reexport(exports, {module});");
        }
        if let Some(name) = clause.strip_prefix('*') {
            let name = name.trim_start().trim_start_matches("as").trim();
            getters.push(format!("{name}: function () {{ return {module}; }}"));
            return format!("{indent}{module};");
        }

        let local = format!("__reexport{reexports}");
        reexports += 1;
        let list = clause.trim_start_matches('{').trim_end_matches('}');
        for (imported, exported) in specifier_pairs(list) {
            getters.push(format!("{exported}: function () {{ return {local}.{imported}; }}"));
        }
        format!("{indent}var {local} = {module};")
    });

    let code = import_pattern().replace_all(&code, |caps: &Captures<'_>| {
        let indent = &caps[1];
        let specifier = &caps[3];
        let clause = caps.get(2).map_or("", |m| m.as_str().trim());
        rewrite_import(indent, clause, specifier, targets)
    });

    let code = call_pattern().replace_all(&code, |caps: &Captures<'_>| {
        let dynamic = &caps[1] == "import";
        let specifier = &caps[2];
        let value = match targets.get(specifier) {
            Some(Target::Script(key)) => format!("require({key})"),
            Some(Target::Style) => "{}".to_string(),
            Some(Target::Url(url)) => serde_json::Value::String(url.clone()).to_string(),
            Some(Target::External) | None => return caps[0].to_string(),
        };
        if dynamic {
            format!("Promise.resolve({value})")
        } else {
            value
        }
    });

    let code = export_list_pattern().replace_all(&code, |caps: &Captures<'_>| {
        for (local, exported) in specifier_pairs(&caps[2]) {
            getters.push(format!("{exported}: function () {{ return {local}; }}"));
        }
        caps[1].to_string()
    });

    let code = export_default_pattern().replace_all(&code, "${1}exports.default = ");

    let code = export_decl_pattern().replace_all(&code, |caps: &Captures<'_>| {
        let name = caps
            .get(3)
            .or_else(|| caps.get(4))
            .or_else(|| caps.get(5))
            .map_or("", |m| m.as_str());
        getters.push(format!("{name}: function () {{ return {name}; }}"));
        format!("{}{}", &caps[1], &caps[2])
    });

    if getters.is_empty() {
        return code.into_owned();
    }
    // Getters go first so importers on a cycle see live bindings.
    format!("__export(exports, {{ {} }});\n{code}", getters.join(", "))
}

/// `require(<key>)` for a bundled script, `None` for a style.
fn require_expr(specifier: &str, targets: &FxHashMap<&str, Target>) -> Option<String> {
    match targets.get(specifier) {
        Some(Target::Script(key)) => Some(format!("require({key})")),
        Some(Target::Style) => None,
        Some(Target::Url(url)) => Some(serde_json::Value::String(url.clone()).to_string()),
        Some(Target::External) | None => Some(format!(
            "require({})",
            serde_json::Value::String(specifier.to_string())
        )),
    }
}

fn rewrite_import(indent: &str, clause: &str, specifier: &str, targets: &FxHashMap<&str, Target>) -> String {
    let module = match targets.get(specifier) {
        Some(Target::Style) => return format!("{indent}/* style: {specifier} */"),
        Some(Target::Url(url)) => {
            let url = serde_json::Value::String(url.clone()).to_string();
            return match default_binding(clause) {
                Some(name) => format!("{indent}var {name} = {url};"),
                None => format!("{indent}/* asset: {specifier} */"),
            };
        }
        _ => require_expr(specifier, targets).unwrap_or_default(),
    };

    if clause.is_empty() {
        return format!("{indent}{module};");
    }

    let mut statements = Vec::new();
    if let Some(name) = default_binding(clause) {
        statements.push(format!("var {name} = __default({module});"));
    }
    if let Some(start) = clause.find("* as ") {
        let name = clause[start + 5..].trim().trim_end_matches(',').trim();
        statements.push(format!("var {name} = {module};"));
    }
    if let (Some(open), Some(close)) = (clause.find('{'), clause.rfind('}')) {
        let pairs: Vec<String> = specifier_pairs(&clause[open + 1..close])
            .into_iter()
            .map(|(imported, local)| {
                if imported == local {
                    local
                } else {
                    format!("{imported}: {local}")
                }
            })
            .collect();
        statements.push(format!("var {{ {} }} = {module};", pairs.join(", ")));
    }
    format!("{indent}{}", statements.join(" "))
}

/// Default import name of an import clause (`x` in `x, { y }`).
fn default_binding(clause: &str) -> Option<&str> {
    let first = clause.split(',').next()?.trim();
    let is_ident = !first.is_empty()
        && first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    is_ident.then_some(first)
}

/// `(name, alias)` pairs of `a, b as c`.
fn specifier_pairs(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once(" as ") {
            Some((name, alias)) => (name.trim().to_string(), alias.trim().to_string()),
            None => (part.to_string(), part.to_string()),
        })
        .collect()
}
