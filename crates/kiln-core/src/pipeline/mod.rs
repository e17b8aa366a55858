//! Transform pipeline.
//!
//! Each resource is compiled by the first [`TransformRule`] whose pattern
//! matches its [`ResourceId`]; registration order breaks ties. Rules refer
//! to [`Capability`] implementations by name through a
//! [`CapabilityRegistry`], so the pipeline itself holds no global state.
//!
//! ## Example
//!
//! ```ignore
//! use kiln_core::pipeline::{CapabilityRegistry, Pipeline, RuleSet};
//!
//! let registry = CapabilityRegistry::with_builtins(env);
//! let rules = RuleSet::from_config(&config.rules, &registry)?;
//! let out = Pipeline::new(rules).transform(&id, &bytes)?;
//! ```

mod markup;
mod raw;
mod script;
mod style;

pub use markup::MarkupCapability;
pub use raw::RawCapability;
pub use script::ScriptCapability;
pub use style::StyleCapability;

use crate::assets::AssetType;
use crate::codes;
use crate::config::{ConfigError, RuleConfig};
use crate::env::EnvMap;
use crate::resource::{ModuleKind, ResourceId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a capability. The message is shown to the user as-is.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Input handed to a capability.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityInput<'a> {
    pub id: &'a ResourceId,
    pub source: &'a [u8],
    /// The matching rule's `options` object (`Null` when absent).
    pub options: &'a serde_json::Value,
}

impl<'a> CapabilityInput<'a> {
    /// Source as UTF-8 text.
    pub fn text(&self) -> Result<&'a str, CapabilityError> {
        std::str::from_utf8(self.source)
            .map_err(|e| CapabilityError::new(format!("source is not valid UTF-8: {e}")))
    }

    /// Boolean option, `false` when missing.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Compiled bytes plus the specifiers the source refers to.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOutput {
    pub code: Vec<u8>,
    /// Specifiers in order of first appearance, without duplicates.
    pub dependencies: Vec<String>,
}

/// An external compilation step: script compilation, style compilation,
/// markup templating, or plain copying.
///
/// Implementations must be pure with respect to the build: same input,
/// same output. Failures are reported, never retried.
pub trait Capability: Send + Sync {
    /// Name rules use to refer to this capability.
    fn name(&self) -> &str;

    /// Kind assigned to modules compiled by this capability unless the rule
    /// overrides it.
    fn kind(&self) -> ModuleKind;

    /// Compile one resource.
    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError>;
}

/// Named capabilities available to rules.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `script`, `style`, `markup` and `raw`.
    ///
    /// `env` feeds `process.env.*` replacement in scripts.
    #[must_use]
    pub fn with_builtins(env: EnvMap) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptCapability::new(env)));
        registry.register(Arc::new(StyleCapability));
        registry.register(Arc::new(MarkupCapability));
        registry.register(Arc::new(RawCapability));
        registry
    }

    /// Add a capability. A later registration replaces one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities.retain(|c| c.name() != capability.name());
        self.capabilities.push(capability);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.iter().find(|c| c.name() == name).cloned()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(|c| c.name())
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Regular expression over a resource id.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: regex_lite::Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: regex_lite::Regex::new(source)?,
        })
    }

    #[must_use]
    pub fn matches(&self, id: &ResourceId) -> bool {
        self.regex.is_match(id.as_str())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.source)
    }
}

/// One entry of the ordered rule list.
#[derive(Clone)]
pub struct TransformRule {
    pub pattern: Pattern,
    pub capability: Arc<dyn Capability>,
    pub kind: ModuleKind,
    pub options: serde_json::Value,
}

impl TransformRule {
    /// Rule using the capability's own kind and no options.
    #[must_use]
    pub fn new(pattern: Pattern, capability: Arc<dyn Capability>) -> Self {
        let kind = capability.kind();
        Self {
            pattern,
            capability,
            kind,
            options: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ModuleKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

impl fmt::Debug for TransformRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRule")
            .field("pattern", &self.pattern)
            .field("capability", &self.capability.name())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered rule registry; configured once, read-only during a build.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<TransformRule>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the rule list from config entries, looking capabilities up by name.
    pub fn from_config(rules: &[RuleConfig], registry: &CapabilityRegistry) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for (index, rule) in rules.iter().enumerate() {
            let pattern = Pattern::new(&rule.test).map_err(|e| ConfigError::InvalidPattern {
                index,
                pattern: rule.test.clone(),
                message: e.to_string(),
            })?;
            let capability = registry
                .get(&rule.capability)
                .ok_or_else(|| ConfigError::UnknownCapability {
                    index,
                    name: rule.capability.clone(),
                    available: registry.names().map(str::to_string).collect(),
                })?;

            let mut built = TransformRule::new(pattern, capability).with_options(rule.options.clone());
            if let Some(kind) = rule.kind {
                built = built.with_kind(kind);
            }
            set.push(built);
        }
        Ok(set)
    }

    pub fn push(&mut self, rule: TransformRule) {
        self.rules.push(rule);
    }

    /// First rule whose pattern matches `id`.
    #[must_use]
    pub fn select(&self, id: &ResourceId) -> Option<&TransformRule> {
        self.rules.iter().find(|rule| rule.pattern.matches(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Error from the transform stage.
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("no transform rule matches '{id}'")]
    NoMatchingRule { id: ResourceId },

    #[error("[{capability}] failed to compile '{id}': {diagnostic}")]
    Failed {
        id: ResourceId,
        capability: String,
        diagnostic: String,
    },
}

impl TransformError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatchingRule { .. } => codes::TRANSFORM_NO_MATCHING_RULE,
            Self::Failed { .. } => codes::TRANSFORM_FAILED,
        }
    }
}

/// Output of [`Pipeline::transform`].
#[derive(Debug, Clone)]
pub struct Transformed {
    pub compiled: Vec<u8>,
    pub dependencies: Vec<String>,
    pub kind: ModuleKind,
}

/// The transform stage.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    rules: RuleSet,
}

impl Pipeline {
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Compile `raw` with the first matching rule.
    ///
    /// Unclaimed static assets pass through unchanged with no dependencies.
    pub fn transform(&self, id: &ResourceId, raw: &[u8]) -> Result<Transformed, TransformError> {
        let Some(rule) = self.rules.select(id) else {
            if AssetType::is_static(id) {
                return Ok(Transformed {
                    compiled: raw.to_vec(),
                    dependencies: Vec::new(),
                    kind: ModuleKind::Asset,
                });
            }
            return Err(TransformError::NoMatchingRule { id: id.clone() });
        };

        let input = CapabilityInput {
            id,
            source: raw,
            options: &rule.options,
        };
        let output = rule
            .capability
            .compile(&input)
            .map_err(|e| TransformError::Failed {
                id: id.clone(),
                capability: rule.capability.name().to_string(),
                diagnostic: e.message,
            })?;

        tracing::debug!(
            id = %id,
            capability = rule.capability.name(),
            deps = output.dependencies.len(),
            "transformed"
        );

        Ok(Transformed {
            compiled: output.code,
            dependencies: output.dependencies,
            kind: rule.kind,
        })
    }
}

/// Append `spec` unless already present.
pub(crate) fn push_unique(deps: &mut Vec<String>, spec: &str) {
    if !deps.iter().any(|d| d == spec) {
        deps.push(spec.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Upper;

    impl Capability for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn kind(&self) -> ModuleKind {
            ModuleKind::Script
        }

        fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
            Ok(CapabilityOutput {
                code: input.text()?.to_uppercase().into_bytes(),
                dependencies: Vec::new(),
            })
        }
    }

    struct Broken;

    impl Capability for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn kind(&self) -> ModuleKind {
            ModuleKind::Style
        }

        fn compile(&self, _input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
            Err(CapabilityError::new("unexpected token at 1:4"))
        }
    }

    fn id(path: &str) -> ResourceId {
        ResourceId::from_canonical(Path::new(path))
    }

    #[test]
    fn test_first_match_wins() {
        let mut rules = RuleSet::new();
        rules.push(TransformRule::new(Pattern::new(r"\.js$").unwrap(), Arc::new(Upper)));
        rules.push(TransformRule::new(Pattern::new(r".*").unwrap(), Arc::new(RawCapability)));
        let pipeline = Pipeline::new(rules);

        let out = pipeline.transform(&id("/p/a.js"), b"abc").unwrap();
        assert_eq!(out.compiled, b"ABC");
        assert_eq!(out.kind, ModuleKind::Script);

        let out = pipeline.transform(&id("/p/a.txt"), b"abc").unwrap();
        assert_eq!(out.compiled, b"abc");
        assert_eq!(out.kind, ModuleKind::Asset);
    }

    #[test]
    fn test_rule_kind_override() {
        let mut rules = RuleSet::new();
        rules.push(
            TransformRule::new(Pattern::new(r"\.svg$").unwrap(), Arc::new(Upper))
                .with_kind(ModuleKind::Markup),
        );
        let out = Pipeline::new(rules).transform(&id("/p/icon.svg"), b"<svg/>").unwrap();
        assert_eq!(out.kind, ModuleKind::Markup);
    }

    #[test]
    fn test_static_asset_passthrough_without_rule() {
        let pipeline = Pipeline::default();
        let bytes = [0x89, b'P', b'N', b'G', 0xff];

        let out = pipeline.transform(&id("/p/img/logo.png"), &bytes).unwrap();
        assert_eq!(out.compiled, bytes);
        assert!(out.dependencies.is_empty());
        assert_eq!(out.kind, ModuleKind::Asset);
    }

    #[test]
    fn test_no_matching_rule() {
        let err = Pipeline::default().transform(&id("/p/main.ts"), b"").unwrap_err();
        assert_eq!(err.code(), codes::TRANSFORM_NO_MATCHING_RULE);
    }

    #[test]
    fn test_capability_failure_carries_diagnostic() {
        let mut rules = RuleSet::new();
        rules.push(TransformRule::new(Pattern::new(r"\.css$").unwrap(), Arc::new(Broken)));

        let err = Pipeline::new(rules).transform(&id("/p/a.css"), b"a{").unwrap_err();
        assert_eq!(err.code(), codes::TRANSFORM_FAILED);
        let message = err.to_string();
        assert!(message.contains("[broken]"));
        assert!(message.contains("unexpected token at 1:4"));
    }

    #[test]
    fn test_from_config_rejects_unknown_capability() {
        let registry = CapabilityRegistry::with_builtins(EnvMap::default());
        let rules = vec![RuleConfig {
            test: r"\.ts$".to_string(),
            capability: "typescript".to_string(),
            kind: None,
            options: serde_json::Value::Null,
        }];

        let err = RuleSet::from_config(&rules, &registry).unwrap_err();
        assert_eq!(err.code(), codes::CONFIG_UNKNOWN_CAPABILITY);
    }

    #[test]
    fn test_from_config_rejects_bad_pattern() {
        let registry = CapabilityRegistry::with_builtins(EnvMap::default());
        let rules = vec![RuleConfig {
            test: r"\.(js$".to_string(),
            capability: "script".to_string(),
            kind: None,
            options: serde_json::Value::Null,
        }];

        let err = RuleSet::from_config(&rules, &registry).unwrap_err();
        assert_eq!(err.code(), codes::CONFIG_INVALID_PATTERN);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = CapabilityRegistry::with_builtins(EnvMap::default());
        let before = registry.names().count();
        registry.register(Arc::new(RawCapability));
        assert_eq!(registry.names().count(), before);
        assert!(registry.get("raw").is_some());
    }
}
