//! `kiln build` command implementation.
//!
//! Loads the config, runs one build and reports the files written. With
//! `--json` exactly one JSON object is printed to stdout, on success and on
//! failure alike.

use super::{diagnostic, display_id, load_config, ErrorJson};
use kiln_core::{Build, BuildReport, CancelToken, Error};
use miette::Result;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// JSON output for the build command.
#[derive(Serialize)]
struct BuildResultJson {
    ok: bool,
    modules: usize,
    bundles: Vec<OutputJson>,
    assets: Vec<OutputJson>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

#[derive(Serialize)]
struct OutputJson {
    name: String,
    kind: String,
    /// Project-relative ids of the modules in the file.
    modules: Vec<String>,
}

/// Run the build command.
pub fn run(config_path: &Path, json: bool) -> Result<()> {
    let start = Instant::now();
    let cancel = CancelToken::new();
    listen_for_interrupt(cancel.clone());

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(err) => return fail(&err, None, json, start),
    };
    let root = config.root.clone();

    let result = Build::from_config(config).and_then(|build| build.run(&cancel));
    match result {
        Ok(report) => {
            if json {
                print_json(&success_json(&report, &root));
            } else {
                print_human(&report, &root);
            }
            Ok(())
        }
        Err(err) => fail(&err, Some(&root), json, start),
    }
}

/// Cancel the build on Ctrl-C. The listener runs on its own thread with a
/// small runtime so the build itself stays synchronous.
fn listen_for_interrupt(cancel: CancelToken) {
    let spawned = std::thread::Builder::new()
        .name("kiln-interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::debug!(error = %e, "no interrupt handler");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                tracing::warn!("interrupted, cancelling build");
                cancel.cancel();
            }
        });
    if let Err(e) = spawned {
        tracing::debug!(error = %e, "failed to spawn interrupt listener");
    }
}

fn success_json(report: &BuildReport, root: &Path) -> BuildResultJson {
    BuildResultJson {
        ok: true,
        modules: report.modules,
        bundles: report
            .bundles
            .iter()
            .map(|bundle| OutputJson {
                name: bundle.name.clone(),
                kind: bundle.kind.to_string(),
                modules: bundle.modules.iter().map(|id| display_id(id, Some(root))).collect(),
            })
            .collect(),
        assets: report
            .assets
            .iter()
            .map(|asset| OutputJson {
                name: asset.name.clone(),
                kind: "asset".to_string(),
                modules: vec![display_id(&asset.id, Some(root))],
            })
            .collect(),
        duration_ms: report.duration_ms,
        error: None,
    }
}

fn print_json(value: &BuildResultJson) {
    match serde_json::to_string(value) {
        Ok(out) => println!("{out}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}

fn print_human(report: &BuildReport, root: &Path) {
    for file in &report.files {
        let shown = file
            .path
            .strip_prefix(root)
            .map_or_else(|_| file.path.display().to_string(), |rel| rel.display().to_string());
        println!("  {shown} ({:.1}KB)", file.size as f64 / 1024.0);
    }
    println!(
        "  {} modules, {} files in {}ms",
        report.modules,
        report.files.len(),
        report.duration_ms
    );
}

fn fail(err: &Error, root: Option<&Path>, json: bool, start: Instant) -> Result<()> {
    if json {
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        print_json(&BuildResultJson {
            ok: false,
            modules: 0,
            bundles: Vec::new(),
            assets: Vec::new(),
            duration_ms,
            error: Some(ErrorJson::new(err, root)),
        });
        std::process::exit(1);
    }
    Err(diagnostic(err, root))
}
