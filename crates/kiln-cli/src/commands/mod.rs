pub mod build;
pub mod config;
pub mod version;

use kiln_core::config::CONFIG_FILE;
use kiln_core::{Error, LoadedConfig, ResourceId};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Config file to load: `--config` relative to `cwd`, or `cwd/kiln.json`.
pub fn config_path(cwd: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => cwd.join(path),
        None => cwd.join(CONFIG_FILE),
    }
}

/// Error object embedded in `--json` output.
#[derive(Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
    /// Import chain, entry first, as project-relative paths.
    pub chain: Vec<String>,
}

impl ErrorJson {
    pub fn new(err: &Error, root: Option<&Path>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.causes().join(": "),
            chain: err.chain().iter().map(|id| display_id(id, root)).collect(),
        }
    }
}

/// `id` relative to `root` when it lies under it.
pub fn display_id(id: &ResourceId, root: Option<&Path>) -> String {
    root.and_then(|root| id.as_path().strip_prefix(root).ok())
        .map_or_else(|| id.to_string(), |rel| rel.display().to_string())
}

/// Turn a core error into a diagnostic, with the import chain as help text.
pub fn diagnostic(err: &Error, root: Option<&Path>) -> miette::Report {
    let message = err.causes().join(": ");
    let chain = err.chain();
    if chain.is_empty() {
        return miette::miette!(code = err.code(), "{message}");
    }

    let mut help = String::from("imported via:");
    for (depth, id) in chain.iter().enumerate() {
        help.push('\n');
        help.push_str(&"  ".repeat(depth + 1));
        help.push_str(&display_id(id, root));
    }
    miette::miette!(code = err.code(), help = help, "{message}")
}

/// Load the config, mapping failures to the shared error type.
pub fn load_config(path: &Path) -> Result<LoadedConfig, Error> {
    LoadedConfig::load(path).map_err(Error::from)
}
