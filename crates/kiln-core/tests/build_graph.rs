//! End-to-end builds over fixture projects.
//!
//! These tests verify:
//! - The example graph (main -> util, style) bundles in dependency order
//! - Unresolvable imports fail with the import chain and write nothing
//! - Cycles complete and every module is compiled exactly once
//! - Two specifiers for one file produce one module
//! - Static assets are copied and referenced from style bundles
//! - A failed publish leaves the output directory untouched

use kiln_core::codes;
use kiln_core::emit::STAGING_PREFIX;
use kiln_core::pipeline::{
    Capability, CapabilityError, CapabilityInput, CapabilityOutput, CapabilityRegistry, ScriptCapability,
};
use kiln_core::{Build, CancelToken, Error, LoadedConfig, ModuleKind, ResourceId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

fn project(files: &[(&str, &str)], config: &serde_json::Value) -> TempDir {
    let dir = tempdir().unwrap();
    for (path, contents) in files {
        let path = dir.path().join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
    std::fs::write(
        dir.path().join("kiln.json"),
        serde_json::to_string_pretty(config).unwrap(),
    )
    .unwrap();
    dir
}

fn load(dir: &TempDir) -> LoadedConfig {
    LoadedConfig::load(&dir.path().join("kiln.json")).unwrap()
}

fn id(config: &LoadedConfig, path: &str) -> ResourceId {
    ResourceId::canonicalize(&config.root.join(path)).unwrap()
}

fn default_rules() -> serde_json::Value {
    serde_json::json!([
        { "test": "\\.js$", "use": "script" },
        { "test": "\\.css$", "use": "style" },
        { "test": "\\.html$", "use": "markup" }
    ])
}

fn dist_entries(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir.join("dist")) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Wraps the script capability and counts compilations per file name.
struct Counting {
    inner: ScriptCapability,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl Capability for Counting {
    fn name(&self) -> &str {
        "script"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Script
    }

    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
        let name = input.id.as_path().file_name().unwrap().to_string_lossy().into_owned();
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
        self.inner.compile(input)
    }
}

#[test]
fn test_example_graph_bundles_dependencies_first() {
    let dir = project(
        &[
            ("main.js", "import { util } from './util';\nimport './style.css';\nutil();\n"),
            ("util.js", "export function util() {}\n"),
            ("style.css", ".app { color: red; }\n"),
        ],
        &serde_json::json!({ "entry": "./main.js", "rules": default_rules() }),
    );
    let config = load(&dir);
    let (main, util, style) = (id(&config, "main.js"), id(&config, "util.js"), id(&config, "style.css"));

    let build = Build::from_config(config).unwrap();
    let report = build.run(&CancelToken::new()).unwrap();

    assert_eq!(report.modules, 3);
    assert_eq!(report.edges, 2);

    let script = report.bundles.iter().find(|b| b.kind == ModuleKind::Script).unwrap();
    assert_eq!(script.modules, vec![util, main]);
    let css = report.bundles.iter().find(|b| b.kind == ModuleKind::Style).unwrap();
    assert_eq!(css.modules, vec![style]);

    let js = std::fs::read_to_string(dir.path().join("dist/main.js")).unwrap();
    assert!(js.find("function util()").unwrap() < js.find("util();").unwrap());
    assert!(dir.path().join("dist/main.css").is_file());
    assert!(!dist_entries(dir.path()).iter().any(|e| e.starts_with(STAGING_PREFIX)));
}

#[test]
fn test_missing_import_reports_chain_and_writes_nothing() {
    let dir = project(
        &[
            ("main.js", "import './lib';\n"),
            ("lib.js", "import './missing.js';\n"),
        ],
        &serde_json::json!({ "entry": "./main.js", "rules": default_rules() }),
    );
    let config = load(&dir);
    let (main, lib) = (id(&config, "main.js"), id(&config, "lib.js"));

    let err = Build::from_config(config).unwrap().run(&CancelToken::new()).unwrap_err();

    assert_eq!(err.code(), codes::BUILD_RESOLUTION_ERROR);
    assert_eq!(err.chain(), &[main, lib.clone()]);
    match &err {
        Error::Build(kiln_core::graph::BuildError::Resolution { requester, specifier, .. }) => {
            assert_eq!(requester, &lib);
            assert_eq!(specifier, "./missing.js");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_cycle_completes_and_compiles_each_module_once() {
    let dir = project(
        &[
            ("a.js", "import { b } from './b';\nexport const a = 1;\n"),
            ("b.js", "import { a } from './a';\nexport const b = 2;\n"),
        ],
        &serde_json::json!({ "entry": "./a.js", "rules": [{ "test": "\\.js$", "use": "script" }] }),
    );
    let config = load(&dir);
    let (a, b) = (id(&config, "a.js"), id(&config, "b.js"));

    let calls = Arc::new(Mutex::new(HashMap::new()));
    let mut registry = CapabilityRegistry::with_builtins(config.env.clone());
    registry.register(Arc::new(Counting {
        inner: ScriptCapability::default(),
        calls: Arc::clone(&calls),
    }));

    let build = Build::with_registry(config, &registry).unwrap();
    let graph = build.graph(&CancelToken::new()).unwrap();

    assert!(graph.is_complete());
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.edges().len(), 2);
    // On a cycle, discovery order decides.
    assert_eq!(graph.topological_order(), vec![a, b]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.get("a.js"), Some(&1));
    assert_eq!(calls.get("b.js"), Some(&1));
}

#[test]
fn test_two_specifiers_for_one_file_share_a_module() {
    let dir = project(
        &[
            ("main.js", "import './lib/util';\nimport './lib/../lib/util.js';\n"),
            ("lib/util.js", "export {};\n"),
        ],
        &serde_json::json!({ "entry": "./main.js", "rules": default_rules() }),
    );
    let config = load(&dir);
    let util = id(&config, "lib/util.js");

    let graph = Build::from_config(config).unwrap().graph(&CancelToken::new()).unwrap();

    assert_eq!(graph.len(), 2);
    assert!(graph.get(&util).is_some());
    assert!(graph.edges().iter().all(|edge| edge.to == util));
}

#[test]
fn test_static_assets_are_copied_and_referenced() {
    let dir = project(
        &[
            ("src/main.js", "import './style.css';\n"),
            ("src/style.css", ".logo { background: url(./img/logo.png); }\n"),
            ("src/img/logo.png", "not really a png"),
        ],
        &serde_json::json!({ "entry": "./src/main.js", "rules": default_rules() }),
    );

    let report = Build::from_config(load(&dir)).unwrap().run(&CancelToken::new()).unwrap();

    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.assets[0].name, "static/src/img/logo.png");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("dist/static/src/img/logo.png")).unwrap(),
        "not really a png"
    );
    let css = std::fs::read_to_string(dir.path().join("dist/main.css")).unwrap();
    assert!(css.contains("static/src/img/logo.png"));
    assert!(!css.contains("./img/logo.png"));
}

#[test]
fn test_unclaimed_script_reports_no_matching_rule() {
    let dir = project(
        &[("main.js", "import './types.ts';\n"), ("types.ts", "export type A = 1;\n")],
        &serde_json::json!({ "entry": "./main.js", "rules": default_rules() }),
    );
    let config = load(&dir);
    let main = id(&config, "main.js");

    let err = Build::from_config(config).unwrap().run(&CancelToken::new()).unwrap_err();
    assert_eq!(err.code(), codes::TRANSFORM_NO_MATCHING_RULE);
    assert_eq!(err.chain(), &[main]);
}

#[test]
fn test_entry_not_found() {
    let dir = project(&[], &serde_json::json!({ "entry": "./nope.js", "rules": default_rules() }));
    let err = Build::from_config(load(&dir)).unwrap().run(&CancelToken::new()).unwrap_err();
    assert_eq!(err.code(), codes::BUILD_ENTRY_NOT_FOUND);
}

#[test]
fn test_unknown_capability_is_rejected_at_startup() {
    let dir = project(
        &[("main.js", "")],
        &serde_json::json!({ "entry": "./main.js", "rules": [{ "test": "\\.js$", "use": "babel" }] }),
    );
    let err = Build::from_config(load(&dir)).unwrap_err();
    assert_eq!(err.code(), codes::CONFIG_UNKNOWN_CAPABILITY);
}

#[test]
fn test_cancelled_build_writes_nothing() {
    let dir = project(
        &[("main.js", "export {};\n")],
        &serde_json::json!({ "entry": "./main.js", "rules": default_rules() }),
    );
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = Build::from_config(load(&dir)).unwrap().run(&cancel).unwrap_err();
    assert_eq!(err.code(), codes::BUILD_CANCELLED);
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_plain_specifiers_resolve_next_to_requester() {
    let dir = project(
        &[
            ("main.js", "import 'util.js';\nimport 'style.css';\n"),
            ("util.js", "export const u = 1;\n"),
            ("style.css", ".u { color: red; }\n"),
        ],
        &serde_json::json!({ "entry": ["main.js"], "rules": default_rules() }),
    );
    let config = load(&dir);
    let (main, util, style) = (id(&config, "main.js"), id(&config, "util.js"), id(&config, "style.css"));

    let graph = Build::from_config(config).unwrap().graph(&CancelToken::new()).unwrap();

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.edges().len(), 2);
    assert_eq!(graph.entries(), &[main.clone()]);
    let scripts: Vec<ResourceId> = graph
        .topological_order()
        .into_iter()
        .filter(|id| graph.get(id).unwrap().kind == ModuleKind::Script)
        .collect();
    assert_eq!(scripts, vec![util, main]);
    assert_eq!(graph.get(&style).unwrap().kind, ModuleKind::Style);
}

#[test]
fn test_script_bundle_is_linked() {
    let dir = project(
        &[
            ("src/main.js", "import { u } from './util';\nimport './style.css';\nconsole.log(u);\n"),
            ("src/util.js", "export const u = 1;\n"),
            ("src/style.css", "body { margin: 0; }\n"),
        ],
        &serde_json::json!({
            "entry": "./src/main.js",
            "output": { "filename": "js/[name].js" },
            "rules": default_rules()
        }),
    );

    let report = Build::from_config(load(&dir)).unwrap().run(&CancelToken::new()).unwrap();
    let script = report.bundles.iter().find(|b| b.kind == ModuleKind::Script).unwrap();
    assert_eq!(script.name, "js/main.js");

    let js = std::fs::read_to_string(dir.path().join("dist/js/main.js")).unwrap();
    assert!(!js.contains("import '"), "bundle: {js}");
    assert!(!js.contains("import {"), "bundle: {js}");
    assert!(!js.lines().any(|line| line.trim_start().starts_with("export ")), "bundle: {js}");
    assert!(js.contains("__modules[0] = function (module, exports, require) {"));
    assert!(js.contains("__export(exports, { u: function () { return u; } });"));
    assert!(js.contains("var { u } = require(0);"));
    assert!(js.contains("/* style: ./style.css */"));
    assert!(js.trim_end().ends_with("__require(1);\n})();"));
    assert!(!js.contains("__require(0);\n})"));
}

#[test]
fn test_markup_inject_and_env_inlining() {
    let dir = project(
        &[
            (
                "index.html",
                "<html><head><title>{{ title }}</title></head><body></body></html>\n",
            ),
            ("main.js", "import './style.css';\nconsole.log(process.env.GREETING);\n"),
            ("style.css", "body { margin: 0; }\n"),
            (".env", "GREETING=hello\n"),
        ],
        &serde_json::json!({
            "entry": ["./main.js", "./index.html"],
            "output": { "filename": "js/[name].js", "inject": true },
            "rules": [
                { "test": "\\.js$", "use": "script" },
                { "test": "\\.css$", "use": "style" },
                { "test": "\\.html$", "use": "markup", "options": { "data": { "title": "Kiln" } } }
            ]
        }),
    );

    Build::from_config(load(&dir)).unwrap().run(&CancelToken::new()).unwrap();

    let js = std::fs::read_to_string(dir.path().join("dist/js/main.js")).unwrap();
    assert!(js.contains("console.log(\"hello\")"));

    let html = std::fs::read_to_string(dir.path().join("dist/index.html")).unwrap();
    assert!(html.contains("<title>Kiln</title>"));
    assert!(html.contains("<link rel=\"stylesheet\" href=\"main.css\"></head>"));
    assert!(html.contains("<script src=\"js/main.js\"></script></body>"));
}

#[test]
fn test_emit_failure_publishes_nothing() {
    let dir = project(
        &[
            ("index.html", "<html><body><script src=\"./main.js\"></script></body></html>\n"),
            ("main.js", "import './style.css';\n"),
            ("style.css", "body { margin: 0; }\n"),
        ],
        &serde_json::json!({ "entry": ["./main.js", "./index.html"], "rules": default_rules() }),
    );
    // A directory where the style bundle should go.
    std::fs::create_dir_all(dir.path().join("dist/main.css/keep")).unwrap();

    let err = Build::from_config(load(&dir)).unwrap().run(&CancelToken::new()).unwrap_err();
    assert_eq!(err.code(), codes::EMIT_WRITE_ERROR);

    let files: Vec<_> = walkdir::WalkDir::new(dir.path().join("dist"))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .collect();
    assert!(files.is_empty(), "unexpected outputs: {files:?}");
    assert!(dir.path().join("dist/main.css/keep").is_dir());
    assert_eq!(dist_entries(dir.path()), vec!["main.css".to_string()]);
}
