//! Build configuration (`kiln.json`).
//!
//! Relative paths in the file are resolved against the directory holding
//! it, which is the project root for the build.

use crate::codes;
use crate::emit::OutputOptions;
use crate::env::{self, EnvMap};
use crate::resolver::{Alias, ResolverOptions};
use crate::resource::ModuleKind;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE: &str = "kiln.json";

/// Configuration errors. All of them are raised before any resource is read.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },

    #[error("rule {index}: unknown capability '{name}' (available: {})", .available.join(", "))]
    UnknownCapability {
        index: usize,
        name: String,
        available: Vec<String>,
    },

    #[error("rule {index}: invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        message: String,
    },

    #[error("invalid port '{value}' in ${var}")]
    InvalidPort { var: String, value: String },
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => codes::CONFIG_READ_ERROR,
            Self::Parse { .. } => codes::CONFIG_PARSE_ERROR,
            Self::Invalid { .. } => codes::CONFIG_INVALID,
            Self::UnknownCapability { .. } => codes::CONFIG_UNKNOWN_CAPABILITY,
            Self::InvalidPattern { .. } => codes::CONFIG_INVALID_PATTERN,
            Self::InvalidPort { .. } => codes::CONFIG_INVALID_PORT,
        }
    }
}

/// Contents of `kiln.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Value of `[name]` in output templates.
    #[serde(default = "default_name")]
    pub name: String,

    /// Entry specifiers, relative to the project root. A single string is accepted.
    #[serde(deserialize_with = "one_or_many")]
    pub entry: Vec<String>,

    #[serde(default)]
    pub output: OutputConfig,

    /// Ordered transform rules; the first match wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub resolve: ResolveConfig,

    #[serde(default)]
    pub dev_server: DevServerConfig,

    #[serde(default)]
    pub env: EnvConfig,
}

fn default_name() -> String {
    "main".to_string()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(entry) => vec![entry],
        OneOrMany::Many(entries) => entries,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutputConfig {
    /// Output directory.
    pub path: String,
    /// Script bundle template.
    pub filename: String,
    pub style_filename: String,
    pub markup_filename: String,
    /// Directory, under `path`, receiving static assets.
    pub static_dir: String,
    /// File name template for static assets.
    pub asset_name: String,
    /// Reference the script and style bundles from the markup bundle.
    pub inject: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: "dist".to_string(),
            filename: "[name].js".to_string(),
            style_filename: "[name].css".to_string(),
            markup_filename: "index.html".to_string(),
            static_dir: "static".to_string(),
            asset_name: "[name].[ext]".to_string(),
            inject: false,
        }
    }
}

/// One transform rule as written in the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regular expression matched against the resource id.
    pub test: String,
    /// Capability name.
    #[serde(rename = "use")]
    pub capability: String,
    /// Overrides the capability's module kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveConfig {
    /// Extensions tried after the verbatim specifier, in order.
    pub extensions: Vec<String>,
    pub alias: Vec<AliasConfig>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: vec![".js".to_string(), ".json".to_string()],
            alias: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasConfig {
    pub from: String,
    /// Target directory, relative to the project root.
    pub to: String,
}

/// Dev-server settings. The server itself is external; only its port is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    /// Environment variable holding the port.
    pub port_env: String,
    /// Port used when the variable is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            port_env: "PORT".to_string(),
            port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    /// `.env` files relative to the project root; later files override earlier ones.
    pub files: Vec<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            files: vec![".env".to_string()],
        }
    }
}

/// A config file together with everything derived from its location.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedConfig {
    /// Project root (the config file's directory, canonicalized).
    pub root: PathBuf,
    pub config: BuildConfig,
    /// Variables from the `.env` files, process values applied.
    #[serde(skip)]
    pub env: EnvMap,
    pub dev_port: Option<u16>,
}

impl LoadedConfig {
    /// Read and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BuildConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let root = dunce::canonicalize(dir).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), root = %root.display(), "loaded config");
        Self::from_config(root, config)
    }

    /// Validate `config` for a project rooted at `root` and load its environment.
    pub fn from_config(root: PathBuf, config: BuildConfig) -> Result<Self, ConfigError> {
        validate(&config)?;

        let env = env::load(&root, &config.env.files);
        let dev_port = resolve_port(&config.dev_server, &env)?;

        Ok(Self {
            root,
            config,
            env,
            dev_port,
        })
    }

    /// Absolute output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(strip_dot(&self.config.output.path))
    }

    #[must_use]
    pub fn resolver_options(&self) -> ResolverOptions {
        let extensions = self
            .config
            .resolve
            .extensions
            .iter()
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{ext}")
                }
            })
            .collect();
        let aliases = self
            .config
            .resolve
            .alias
            .iter()
            .map(|alias| Alias {
                from: alias.from.clone(),
                to: self.root.join(strip_dot(&alias.to)),
            })
            .collect();

        ResolverOptions { extensions, aliases }
    }

    #[must_use]
    pub fn output_options(&self) -> OutputOptions {
        let output = &self.config.output;
        OutputOptions {
            root: self.root.clone(),
            out_dir: self.out_dir(),
            name: self.config.name.clone(),
            script_filename: output.filename.clone(),
            style_filename: output.style_filename.clone(),
            markup_filename: output.markup_filename.clone(),
            static_dir: output.static_dir.clone(),
            asset_name: output.asset_name.clone(),
            inject: output.inject,
        }
    }
}

fn strip_dot(path: &str) -> &str {
    match path {
        "." => "",
        _ => path.strip_prefix("./").unwrap_or(path),
    }
}

fn validate(config: &BuildConfig) -> Result<(), ConfigError> {
    let invalid = |message: &str| {
        Err(ConfigError::Invalid {
            message: message.to_string(),
        })
    };

    if config.entry.is_empty() {
        return invalid("`entry` must name at least one file");
    }
    if config.entry.iter().any(|e| e.trim().is_empty()) {
        return invalid("`entry` contains an empty specifier");
    }
    if config.output.path.trim().is_empty() {
        return invalid("`output.path` must not be empty");
    }
    let templates = [
        ("output.filename", &config.output.filename),
        ("output.styleFilename", &config.output.style_filename),
        ("output.markupFilename", &config.output.markup_filename),
        ("output.assetName", &config.output.asset_name),
    ];
    for (field, template) in templates {
        if template.trim().is_empty() {
            return invalid(&format!("`{field}` must not be empty"));
        }
    }
    // References inside a bundle are made relative to its directory, which
    // is fixed before the contents (and so the hash) are known.
    for (field, template) in &templates[..3] {
        if template
            .rsplit_once('/')
            .is_some_and(|(dir, _)| dir.contains("[hash]"))
        {
            return invalid(&format!("`{field}` may only use [hash] in the file name"));
        }
    }
    if config.resolve.alias.iter().any(|a| a.from.is_empty()) {
        return invalid("`resolve.alias` entries need a non-empty `from`");
    }
    Ok(())
}

fn resolve_port(dev_server: &DevServerConfig, env: &EnvMap) -> Result<Option<u16>, ConfigError> {
    match env::lookup(env, &dev_server.port_env) {
        Some(value) => value
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidPort {
                var: dev_server.port_env.clone(),
                value,
            }),
        None => Ok(dev_server.port),
    }
}
