//! Module graph construction.
//!
//! The builder walks breadth-first from the entries. Every frontier is
//! loaded in parallel (read, transform, resolve dependencies) and then
//! merged sequentially in frontier order, so discovery order and edge order
//! do not depend on thread scheduling.
//!
//! Transforms go through a [`ModuleCache`] keyed by [`ResourceId`]: the
//! first requester of an id compiles it, concurrent requesters wait for
//! that result.

use crate::cancel::CancelToken;
use crate::codes;
use crate::pipeline::{Pipeline, TransformError};
use crate::resolver::{ResolveError, Resolver};
use crate::resource::{ModuleKind, ResourceId};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use thiserror::Error;

/// One compiled input asset. Immutable once built.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ResourceId,
    /// Source bytes as read from disk.
    pub raw: Vec<u8>,
    /// Output of the transform stage.
    pub compiled: Vec<u8>,
    /// Specifiers found in the source, in order of appearance.
    pub dependencies: Vec<String>,
    pub kind: ModuleKind,
}

/// `from` depends on `to` through `specifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DependencyEdge {
    pub from: ResourceId,
    pub to: ResourceId,
    pub specifier: String,
}

/// Modules keyed by id, in discovery order, plus the edges between them.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: FxHashMap<ResourceId, Arc<Module>>,
    /// Every discovered id, completed or not, in discovery order.
    order: Vec<ResourceId>,
    index: FxHashMap<ResourceId, usize>,
    entries: Vec<ResourceId>,
    edges: Vec<DependencyEdge>,
    edge_set: FxHashSet<DependencyEdge>,
    pending: FxHashSet<ResourceId>,
    /// Edges whose target is still pending.
    deferred: Vec<DependencyEdge>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` as discovered. Returns `false` if it was already known.
    pub fn discover(&mut self, id: &ResourceId) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        self.index.insert(id.clone(), self.order.len());
        self.order.push(id.clone());
        self.pending.insert(id.clone());
        true
    }

    /// Mark a discovered id as an entry point.
    pub fn mark_entry(&mut self, id: &ResourceId) {
        self.discover(id);
        if !self.entries.contains(id) {
            self.entries.push(id.clone());
        }
    }

    /// Store a finished module and back-fill edges waiting on it.
    pub fn complete(&mut self, module: Arc<Module>) {
        let id = module.id.clone();
        self.discover(&id);
        self.pending.remove(&id);
        self.modules.insert(id.clone(), module);

        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred)
            .into_iter()
            .partition(|edge| edge.to == id);
        self.deferred = waiting;
        for edge in ready {
            self.push_edge(edge);
        }
    }

    /// Add an edge, deferring it while the target is pending.
    pub fn link(&mut self, from: ResourceId, to: ResourceId, specifier: String) {
        self.discover(&to);
        let edge = DependencyEdge { from, to, specifier };
        if self.modules.contains_key(&edge.to) {
            self.push_edge(edge);
        } else if !self.deferred.contains(&edge) {
            self.deferred.push(edge);
        }
    }

    fn push_edge(&mut self, edge: DependencyEdge) {
        if self.edge_set.insert(edge.clone()) {
            self.edges.push(edge);
        }
    }

    /// No pending modules and no unbound edges.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.deferred.is_empty()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<Module>> {
        self.modules.get(id)
    }

    /// Completed modules in discovery order.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.order.iter().filter_map(|id| self.modules.get(id))
    }

    #[must_use]
    pub fn entries(&self) -> &[ResourceId] {
        &self.entries
    }

    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Edges leaving `id`.
    pub fn dependencies_of<'a>(&'a self, id: &'a ResourceId) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |edge| &edge.from == id)
    }

    /// Position of `id` in discovery order.
    #[must_use]
    pub fn discovery_index(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Number of completed modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Completed modules ordered dependencies first.
    ///
    /// Ties go to the earlier-discovered module. Modules on a cycle are
    /// emitted together in discovery order, after everything the cycle
    /// depends on.
    #[must_use]
    pub fn topological_order(&self) -> Vec<ResourceId> {
        let nodes: Vec<&ResourceId> = self
            .order
            .iter()
            .filter(|id| self.modules.contains_key(*id))
            .collect();
        let position: FxHashMap<&ResourceId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut forward = vec![Vec::new(); nodes.len()];
        let mut reverse = vec![Vec::new(); nodes.len()];
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (position.get(&edge.from), position.get(&edge.to)) {
                forward[from].push(to);
                reverse[to].push(from);
            }
        }

        let (component, count) = strongly_connected(&forward, &reverse);

        // Members are pushed in discovery order, so members[c][0] is the
        // earliest module of each component.
        let mut members = vec![Vec::new(); count];
        for (node, &c) in component.iter().enumerate() {
            members[c].push(node);
        }

        let mut links = FxHashSet::default();
        let mut dependents = vec![Vec::new(); count];
        let mut remaining = vec![0usize; count];
        for (from, targets) in forward.iter().enumerate() {
            for &to in targets {
                let (cf, ct) = (component[from], component[to]);
                if cf != ct && links.insert((cf, ct)) {
                    dependents[ct].push(cf);
                    remaining[cf] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..count)
            .filter(|&c| remaining[c] == 0)
            .map(|c| Reverse((members[c][0], c)))
            .collect();

        let mut sorted = Vec::with_capacity(nodes.len());
        while let Some(Reverse((_, c))) = ready.pop() {
            sorted.extend(members[c].iter().map(|&node| nodes[node].clone()));
            for &dependent in &dependents[c] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse((members[dependent][0], dependent)));
                }
            }
        }
        sorted
    }
}

/// Kosaraju over adjacency lists. Returns the component of each node and
/// the number of components.
fn strongly_connected(forward: &[Vec<usize>], reverse: &[Vec<usize>]) -> (Vec<usize>, usize) {
    let n = forward.len();
    let mut visited = vec![false; n];
    let mut finished = Vec::with_capacity(n);

    for start in 0..n {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut stack = vec![(start, 0usize)];
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&succ) = forward[node].get(*next) {
                *next += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                finished.push(node);
                stack.pop();
            }
        }
    }

    let mut component = vec![usize::MAX; n];
    let mut count = 0;
    for &start in finished.iter().rev() {
        if component[start] != usize::MAX {
            continue;
        }
        component[start] = count;
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &pred in &reverse[node] {
                if component[pred] == usize::MAX {
                    component[pred] = count;
                    stack.push(pred);
                }
            }
        }
        count += 1;
    }

    (component, count)
}

/// Failure to produce a single module, before graph context is attached.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("failed to read '{id}': {message}")]
    Read { id: ResourceId, message: String },

    #[error(transparent)]
    Transform(#[from] TransformError),
}

type Slot = Arc<OnceLock<Result<Arc<Module>, LoadError>>>;

/// Memo table: at most one transform per resource per build.
#[derive(Default)]
pub struct ModuleCache {
    slots: Mutex<FxHashMap<ResourceId, Slot>>,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the module for `id`, running `build` only if no other caller
    /// has claimed it. Concurrent callers for the same id block until the
    /// claiming call finishes and all observe its result, error included.
    pub fn get_or_build<F>(&self, id: &ResourceId, build: F) -> Result<Arc<Module>, LoadError>
    where
        F: FnOnce() -> Result<Module, LoadError>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        slot.get_or_init(|| build().map(Arc::new)).clone()
    }

    /// Number of ids claimed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache").field("len", &self.len()).finish()
    }
}

/// Graph construction error. Any of these aborts the build.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    #[error("entry '{specifier}' could not be resolved")]
    EntryNotFound {
        specifier: String,
        #[source]
        source: ResolveError,
    },

    /// `chain` runs from the entry down to `requester`.
    #[error("cannot resolve '{specifier}' imported by '{requester}'")]
    Resolution {
        requester: ResourceId,
        specifier: String,
        chain: Vec<ResourceId>,
        #[source]
        source: ResolveError,
    },

    /// `chain` lists the modules that led to `id`.
    #[error("failed to read '{id}': {message}")]
    Read {
        id: ResourceId,
        message: String,
        chain: Vec<ResourceId>,
    },

    #[error("{source}")]
    Transform {
        chain: Vec<ResourceId>,
        #[source]
        source: TransformError,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error("module graph incomplete: {pending} pending modules, {deferred} unbound edges")]
    Incomplete { pending: usize, deferred: usize },
}

impl BuildError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntryNotFound { .. } => codes::BUILD_ENTRY_NOT_FOUND,
            Self::Resolution { .. } => codes::BUILD_RESOLUTION_ERROR,
            Self::Read { .. } => codes::BUILD_READ_ERROR,
            Self::Transform { source, .. } => source.code(),
            Self::Cancelled => codes::BUILD_CANCELLED,
            Self::Incomplete { .. } => codes::BUILD_GRAPH_INCOMPLETE,
        }
    }

    /// Requesting modules from the entry down, when the error has one.
    #[must_use]
    pub fn chain(&self) -> &[ResourceId] {
        match self {
            Self::Resolution { chain, .. } | Self::Read { chain, .. } | Self::Transform { chain, .. } => {
                chain.as_slice()
            }
            _ => &[],
        }
    }
}

struct Loaded {
    module: Arc<Module>,
    /// `(specifier, target)` in the module's dependency order.
    targets: Vec<(String, ResourceId)>,
}

enum TaskError {
    Load(LoadError),
    Resolve { specifier: String, source: ResolveError },
    Cancelled,
}

/// Drives the resolver and pipeline over the reachable resources.
pub struct GraphBuilder<'a> {
    resolver: &'a Resolver,
    pipeline: &'a Pipeline,
    root: PathBuf,
    cache: ModuleCache,
    cancel: CancelToken,
}

impl<'a> GraphBuilder<'a> {
    /// Entry specifiers are resolved from `root`.
    pub fn new(resolver: &'a Resolver, pipeline: &'a Pipeline, root: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            pipeline,
            root: root.into(),
            cache: ModuleCache::new(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Build the complete graph reachable from `entries`.
    pub fn build(&self, entries: &[String]) -> Result<ModuleGraph, BuildError> {
        let mut graph = ModuleGraph::new();
        let mut parents: FxHashMap<ResourceId, ResourceId> = FxHashMap::default();
        let mut frontier = Vec::new();

        for specifier in entries {
            let id = self
                .resolver
                .resolve(specifier, &self.root)
                .map_err(|source| BuildError::EntryNotFound {
                    specifier: specifier.clone(),
                    source,
                })?;
            if graph.discover(&id) {
                frontier.push(id.clone());
            }
            graph.mark_entry(&id);
        }

        while !frontier.is_empty() {
            self.check_cancelled()?;
            tracing::trace!(size = frontier.len(), "loading frontier");

            let results: Vec<Result<Loaded, TaskError>> =
                frontier.par_iter().map(|id| self.load(id)).collect();

            let mut next = Vec::new();
            for (id, result) in frontier.iter().zip(results) {
                self.check_cancelled()?;
                let loaded = result.map_err(|e| into_build_error(e, id, &parents))?;

                graph.complete(loaded.module);
                for (specifier, target) in loaded.targets {
                    if graph.discover(&target) {
                        parents.insert(target.clone(), id.clone());
                        next.push(target.clone());
                    }
                    graph.link(id.clone(), target, specifier);
                }
            }
            frontier = next;
        }

        if !graph.is_complete() {
            return Err(BuildError::Incomplete {
                pending: graph.pending_count(),
                deferred: graph.deferred_count(),
            });
        }

        tracing::debug!(modules = graph.len(), edges = graph.edges().len(), "module graph built");
        Ok(graph)
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    fn load(&self, id: &ResourceId) -> Result<Loaded, TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        let module = self
            .cache
            .get_or_build(id, || compile(self.pipeline, id))
            .map_err(TaskError::Load)?;

        let dir = id.dir();
        let targets = module
            .dependencies
            .iter()
            .map(|specifier| {
                self.resolver
                    .resolve(specifier, dir)
                    .map(|target| (specifier.clone(), target))
                    .map_err(|source| TaskError::Resolve {
                        specifier: specifier.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Loaded { module, targets })
    }
}

/// Read and transform one resource.
pub fn compile(pipeline: &Pipeline, id: &ResourceId) -> Result<Module, LoadError> {
    let raw = std::fs::read(id.as_path()).map_err(|e| LoadError::Read {
        id: id.clone(),
        message: e.to_string(),
    })?;
    let out = pipeline.transform(id, &raw)?;

    Ok(Module {
        id: id.clone(),
        raw,
        compiled: out.compiled,
        dependencies: out.dependencies,
        kind: out.kind,
    })
}

fn chain_to(id: &ResourceId, parents: &FxHashMap<ResourceId, ResourceId>) -> Vec<ResourceId> {
    let mut chain = vec![id.clone()];
    let mut current = id;
    while let Some(parent) = parents.get(current) {
        // A module is only given a parent once, so this walk ends at an entry.
        chain.push(parent.clone());
        current = parent;
    }
    chain.reverse();
    chain
}

fn into_build_error(
    error: TaskError,
    id: &ResourceId,
    parents: &FxHashMap<ResourceId, ResourceId>,
) -> BuildError {
    let requesters = || {
        let mut chain = chain_to(id, parents);
        chain.pop();
        chain
    };

    match error {
        TaskError::Resolve { specifier, source } => BuildError::Resolution {
            requester: id.clone(),
            specifier,
            chain: chain_to(id, parents),
            source,
        },
        TaskError::Load(LoadError::Read { id: failed, message }) => BuildError::Read {
            id: failed,
            message,
            chain: requesters(),
        },
        TaskError::Load(LoadError::Transform(source)) => BuildError::Transform {
            chain: requesters(),
            source,
        },
        TaskError::Cancelled => BuildError::Cancelled,
    }
}
