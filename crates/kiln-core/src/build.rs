//! One build, from loaded config to published files.

use crate::cancel::CancelToken;
use crate::config::LoadedConfig;
use crate::emit::{AssetCopy, Bundle, EmitPlan, EmittedFile, Emitter};
use crate::error::Error;
use crate::graph::{BuildError, GraphBuilder, ModuleGraph};
use crate::pipeline::{CapabilityRegistry, Pipeline, RuleSet};
use crate::resolver::Resolver;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

/// Summary of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub modules: usize,
    pub edges: usize,
    pub bundles: Vec<Bundle>,
    pub assets: Vec<AssetCopy>,
    pub out_dir: PathBuf,
    pub files: Vec<EmittedFile>,
    pub duration_ms: u64,
}

/// A configured build. Rules and capabilities are fixed at construction;
/// every [`Build::run`] gets a fresh resolver and module cache.
#[derive(Debug)]
pub struct Build {
    config: LoadedConfig,
    pipeline: Pipeline,
    emitter: Emitter,
}

impl Build {
    /// Build with the built-in capabilities.
    pub fn from_config(config: LoadedConfig) -> Result<Self, Error> {
        let registry = CapabilityRegistry::with_builtins(config.env.clone());
        Self::with_registry(config, &registry)
    }

    /// Build with an explicit capability registry.
    pub fn with_registry(config: LoadedConfig, registry: &CapabilityRegistry) -> Result<Self, Error> {
        let rules = RuleSet::from_config(&config.config.rules, registry)?;
        let emitter = Emitter::new(config.output_options());

        Ok(Self {
            config,
            pipeline: Pipeline::new(rules),
            emitter,
        })
    }

    #[must_use]
    pub fn config(&self) -> &LoadedConfig {
        &self.config
    }

    /// Construct the module graph without emitting anything.
    pub fn graph(&self, cancel: &CancelToken) -> Result<ModuleGraph, BuildError> {
        let resolver = Resolver::new(self.config.resolver_options());
        GraphBuilder::new(&resolver, &self.pipeline, &self.config.root)
            .with_cancel(cancel.clone())
            .build(&self.config.config.entry)
    }

    /// Build the graph and plan the output, without writing.
    pub fn plan(&self, cancel: &CancelToken) -> Result<(ModuleGraph, EmitPlan), Error> {
        let graph = self.graph(cancel)?;
        let plan = self.emitter.plan(&graph)?;
        Ok((graph, plan))
    }

    /// Run the whole build. Nothing is written unless every stage succeeds.
    pub fn run(&self, cancel: &CancelToken) -> Result<BuildReport, Error> {
        let start = Instant::now();

        let (graph, plan) = self.plan(cancel)?;
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled.into());
        }
        let written = self.emitter.write(&plan)?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            name = %self.config.config.name,
            modules = graph.len(),
            bundles = plan.bundles.len(),
            assets = plan.assets.len(),
            duration_ms,
            "build complete"
        );

        Ok(BuildReport {
            modules: graph.len(),
            edges: graph.edges().len(),
            bundles: plan.bundles,
            assets: plan.assets,
            out_dir: written.out_dir,
            files: written.files,
            duration_ms,
        })
    }
}
