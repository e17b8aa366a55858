//! Output emission.
//!
//! [`Emitter::plan`] turns a complete [`ModuleGraph`] into bundles and
//! asset copies in memory. [`Emitter::write`] publishes a plan
//! all-or-nothing: every file is staged in a temporary directory inside the
//! output directory and then moved into place. A failure while moving rolls
//! back the files already published and restores the ones they replaced.
//!
//! Script bundles are linked into a module registry; style
//! and markup bundles are concatenated with references to other outputs
//! rewritten.

use crate::codes;
use crate::graph::{Module, ModuleGraph};
use crate::resource::{ModuleKind, ResourceId};
use kiln_util::fs::{move_file, relative_to, to_slash, write_creating_dirs};
use kiln_util::hash::short_hash;
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

mod script;

/// Prefix of the staging directory created inside the output directory.
pub const STAGING_PREFIX: &str = ".kiln-staging-";

/// Hex digits of the content hash used for `[hash]`.
const HASH_LEN: usize = 8;

const BUNDLE_KINDS: [ModuleKind; 3] = [ModuleKind::Script, ModuleKind::Style, ModuleKind::Markup];

// =============================================================================
// Options and output types
// =============================================================================

/// Where and how outputs are named.
#[derive(Debug, Clone)]
pub struct OutputOptions {
    /// Project root; module labels and asset paths are relative to it.
    pub root: PathBuf,
    pub out_dir: PathBuf,
    /// Value of `[name]` in bundle templates.
    pub name: String,
    pub script_filename: String,
    pub style_filename: String,
    pub markup_filename: String,
    /// Directory, relative to `out_dir`, receiving static assets.
    pub static_dir: String,
    /// File name template for static assets.
    pub asset_name: String,
    /// Add `<link>`/`<script>` tags for the bundles to the markup bundle.
    pub inject: bool,
}

impl OutputOptions {
    fn template(&self, kind: ModuleKind) -> &str {
        match kind {
            ModuleKind::Script => &self.script_filename,
            ModuleKind::Style => &self.style_filename,
            ModuleKind::Markup => &self.markup_filename,
            ModuleKind::Asset => &self.asset_name,
        }
    }
}

/// One output file concatenating every module of a kind.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    /// Output path relative to the output directory, `/`-separated.
    pub name: String,
    pub kind: ModuleKind,
    /// Module ids in emission order.
    pub modules: Vec<ResourceId>,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

/// A static asset copied verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct AssetCopy {
    pub id: ResourceId,
    /// Output path relative to the output directory, `/`-separated.
    pub name: String,
    #[serde(skip)]
    pub contents: Vec<u8>,
}

/// Everything a build will write, computed before touching the disk.
#[derive(Debug, Clone, Default)]
pub struct EmitPlan {
    pub bundles: Vec<Bundle>,
    pub assets: Vec<AssetCopy>,
}

impl EmitPlan {
    #[must_use]
    pub fn bundle(&self, kind: ModuleKind) -> Option<&Bundle> {
        self.bundles.iter().find(|b| b.kind == kind)
    }

    /// `(name, contents, kind)` for every file, bundles first.
    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8], ModuleKind)> {
        self.bundles
            .iter()
            .map(|b| (b.name.as_str(), b.contents.as_slice(), b.kind))
            .chain(
                self.assets
                    .iter()
                    .map(|a| (a.name.as_str(), a.contents.as_slice(), ModuleKind::Asset)),
            )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EmittedFile {
    pub path: PathBuf,
    pub kind: ModuleKind,
    pub size: usize,
}

/// Files published by [`Emitter::write`].
#[derive(Debug, Clone, Serialize)]
pub struct EmitReport {
    pub out_dir: PathBuf,
    pub files: Vec<EmittedFile>,
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("module graph is incomplete: {pending} pending modules, {deferred} unbound edges")]
    IncompleteGraph { pending: usize, deferred: usize },

    #[error("output '{name}' is produced by both {first} and {second}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("output name '{name}' is empty or leaves the output directory")]
    InvalidName { name: String },

    #[error("failed to write '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EmitError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::IncompleteGraph { .. } => codes::BUILD_GRAPH_INCOMPLETE,
            Self::NameCollision { .. } => codes::EMIT_NAME_COLLISION,
            Self::InvalidName { .. } => codes::EMIT_INVALID_NAME,
            Self::Write { .. } => codes::EMIT_WRITE_ERROR,
        }
    }
}

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> EmitError + '_ {
    move |source| EmitError::Write {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// Planning
// =============================================================================

/// Turns module graphs into files.
#[derive(Debug, Clone)]
pub struct Emitter {
    options: OutputOptions,
}

impl Emitter {
    #[must_use]
    pub fn new(options: OutputOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    /// Plan and write in one step.
    pub fn emit(&self, graph: &ModuleGraph) -> Result<EmitReport, EmitError> {
        let plan = self.plan(graph)?;
        self.write(&plan)
    }

    /// Group modules into bundles and asset copies.
    ///
    /// Modules are ordered dependencies first (see
    /// [`ModuleGraph::topological_order`]). References from style and markup
    /// modules to emitted files are rewritten to their output locations.
    pub fn plan(&self, graph: &ModuleGraph) -> Result<EmitPlan, EmitError> {
        if !graph.is_complete() {
            return Err(EmitError::IncompleteGraph {
                pending: graph.pending_count(),
                deferred: graph.deferred_count(),
            });
        }

        let ordered: Vec<&Arc<Module>> = graph
            .topological_order()
            .iter()
            .filter_map(|id| graph.get(id))
            .collect();

        // Output location of every emitted module, relative to the output directory.
        let mut locations: HashMap<ResourceId, String> = HashMap::default();

        let mut assets = Vec::new();
        for module in ordered.iter().filter(|m| m.kind == ModuleKind::Asset) {
            let name = self.asset_name(module);
            locations.insert(module.id.clone(), name.clone());
            assets.push(AssetCopy {
                id: module.id.clone(),
                name,
                contents: module.compiled.clone(),
            });
        }

        let mut bundles: Vec<Bundle> = Vec::new();
        for kind in BUNDLE_KINDS {
            let members: Vec<&Arc<Module>> = ordered.iter().copied().filter(|m| m.kind == kind).collect();
            if members.is_empty() {
                continue;
            }

            let template = self.options.template(kind);
            let ext = bundle_extension(kind);
            // Only the directory of this name is used, and it cannot depend on contents.
            let location = render_template(template, &self.options.name, ext, "");

            let mut contents = if kind == ModuleKind::Script {
                script::link(&members, graph, &locations, &location, |id| self.label(id))
            } else {
                let mut contents = String::new();
                for module in &members {
                    let code = String::from_utf8_lossy(&module.compiled);
                    let code = rewrite_references(&code, graph, module, &locations, &location, kind);
                    self.append_module(&mut contents, kind, &module.id, &code);
                }
                contents
            };

            if kind == ModuleKind::Markup && self.options.inject {
                let style = bundles.iter().find(|b| b.kind == ModuleKind::Style);
                let script = bundles.iter().find(|b| b.kind == ModuleKind::Script);
                contents = inject(
                    &contents,
                    &location,
                    style.map(|b| b.name.as_str()),
                    script.map(|b| b.name.as_str()),
                );
            }

            let hash = short_hash(contents.as_bytes(), HASH_LEN);
            let name = render_template(template, &self.options.name, ext, &hash);
            for module in &members {
                locations.insert(module.id.clone(), name.clone());
            }

            bundles.push(Bundle {
                name,
                kind,
                modules: members.iter().map(|m| m.id.clone()).collect(),
                contents: contents.into_bytes(),
            });
        }

        let plan = EmitPlan { bundles, assets };
        check_names(&plan)?;

        tracing::debug!(
            bundles = plan.bundles.len(),
            assets = plan.assets.len(),
            "planned output"
        );
        Ok(plan)
    }

    fn label(&self, id: &ResourceId) -> String {
        relative_to(id.as_path(), &self.options.root).map_or_else(|| id.to_string(), |rel| to_slash(&rel))
    }

    fn append_module(&self, out: &mut String, kind: ModuleKind, id: &ResourceId, code: &str) {
        if kind == ModuleKind::Style {
            out.push_str("/* ");
            out.push_str(&self.label(id));
            out.push_str(" */\n");
        }
        out.push_str(code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
    }

    /// `static_dir/<dir relative to root>/<asset_name>`.
    fn asset_name(&self, module: &Module) -> String {
        let dir = relative_to(module.id.dir(), &self.options.root)
            .map(|rel| to_slash(&rel))
            .unwrap_or_default();
        let file = render_template(
            &self.options.asset_name,
            module.id.stem(),
            module.id.extension().unwrap_or_default(),
            &short_hash(&module.compiled, HASH_LEN),
        );

        [self.options.static_dir.as_str(), dir.as_str(), file.as_str()]
            .iter()
            .flat_map(|part| part.split('/'))
            .filter(|part| !part.is_empty() && *part != ".")
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn bundle_extension(kind: ModuleKind) -> &'static str {
    match kind {
        ModuleKind::Script => "js",
        ModuleKind::Style => "css",
        ModuleKind::Markup => "html",
        ModuleKind::Asset => "bin",
    }
}

/// Substitute `[name]`, `[ext]` and `[hash]`.
#[must_use]
pub fn render_template(template: &str, name: &str, ext: &str, hash: &str) -> String {
    template
        .replace("[name]", name)
        .replace("[ext]", ext)
        .replace("[hash]", hash)
}

/// Relative URL from the file at `from` to the file at `to`, both relative
/// to the output directory.
#[must_use]
pub fn relative_url(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let target: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = std::iter::repeat("..").take(from_dir.len() - common).collect();
    parts.extend(&target[common..]);
    parts.join("/")
}

/// Point references to emitted modules at their output locations.
///
/// Style bundles only rewrite references to assets; markup rewrites any
/// reference whose target has already been placed.
fn rewrite_references(
    code: &str,
    graph: &ModuleGraph,
    module: &Module,
    locations: &HashMap<ResourceId, String>,
    bundle_location: &str,
    kind: ModuleKind,
) -> String {
    let mut out = code.to_string();
    for edge in graph.dependencies_of(&module.id) {
        if kind == ModuleKind::Style && graph.get(&edge.to).map(|m| m.kind) != Some(ModuleKind::Asset) {
            continue;
        }
        let Some(target) = locations.get(&edge.to) else {
            continue;
        };
        let url = relative_url(bundle_location, target);
        for (open, close) in [('"', '"'), ('\'', '\''), ('(', ')')] {
            out = out.replace(
                &format!("{open}{}{close}", edge.specifier),
                &format!("{open}{url}{close}"),
            );
        }
    }
    out
}

/// Add a stylesheet link before `</head>` and a script tag before `</body>`,
/// unless the markup already references the bundle.
fn inject(html: &str, markup_location: &str, style: Option<&str>, script: Option<&str>) -> String {
    let mut html = html.to_string();

    if let Some(style) = style {
        let href = relative_url(markup_location, style);
        if !html.contains(&format!("\"{href}\"")) {
            let tag = format!("<link rel=\"stylesheet\" href=\"{href}\">");
            html = match html.find("</head>") {
                Some(pos) => format!("{}{tag}{}", &html[..pos], &html[pos..]),
                None => format!("{tag}\n{html}"),
            };
        }
    }

    if let Some(script) = script {
        let src = relative_url(markup_location, script);
        if !html.contains(&format!("\"{src}\"")) {
            let tag = format!("<script src=\"{src}\"></script>");
            html = match html.rfind("</body>") {
                Some(pos) => format!("{}{tag}{}", &html[..pos], &html[pos..]),
                None => format!("{html}{tag}\n"),
            };
        }
    }

    html
}

fn check_names(plan: &EmitPlan) -> Result<(), EmitError> {
    let mut owners: HashMap<&str, String> = HashMap::default();
    let outputs = plan
        .bundles
        .iter()
        .map(|b| (b.name.as_str(), format!("the {} bundle", b.kind)))
        .chain(plan.assets.iter().map(|a| (a.name.as_str(), format!("asset '{}'", a.id))));

    for (name, owner) in outputs {
        let escapes = Path::new(name)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.trim().is_empty() || escapes {
            return Err(EmitError::InvalidName {
                name: name.to_string(),
            });
        }
        if let Some(first) = owners.get(name) {
            return Err(EmitError::NameCollision {
                name: name.to_string(),
                first: first.clone(),
                second: owner,
            });
        }
        owners.insert(name, owner);
    }
    Ok(())
}

// =============================================================================
// Writing
// =============================================================================

impl Emitter {
    /// Publish `plan` under the output directory, all or nothing.
    pub fn write(&self, plan: &EmitPlan) -> Result<EmitReport, EmitError> {
        let out_dir = &self.options.out_dir;
        let created_out_dir = !out_dir.exists();
        fs::create_dir_all(out_dir).map_err(write_error(out_dir))?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(out_dir)
            .map_err(write_error(out_dir))?;

        let mut tx = Transaction {
            out_dir,
            staging: staging.path(),
            published: Vec::new(),
            backups: Vec::new(),
            created_dirs: Vec::new(),
        };

        match tx.run(plan) {
            Ok(files) => {
                if let Err(e) = staging.close() {
                    tracing::warn!(error = %e, "failed to remove staging directory");
                }
                Ok(EmitReport {
                    out_dir: out_dir.clone(),
                    files,
                })
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolling back output");
                tx.rollback();
                drop(staging);
                if created_out_dir {
                    let _ = fs::remove_dir(out_dir);
                }
                Err(err)
            }
        }
    }
}

/// Book-keeping for one publish, so a failure can be undone.
struct Transaction<'a> {
    out_dir: &'a Path,
    staging: &'a Path,
    published: Vec<PathBuf>,
    /// `(target, backup)` for every file that was replaced.
    backups: Vec<(PathBuf, PathBuf)>,
    /// Directories created under `out_dir`, outermost first.
    created_dirs: Vec<PathBuf>,
}

impl Transaction<'_> {
    fn run(&mut self, plan: &EmitPlan) -> Result<Vec<EmittedFile>, EmitError> {
        let mut staged = Vec::new();
        for (name, contents, kind) in plan.files() {
            let path = self.staging.join("files").join(name);
            write_creating_dirs(&path, contents).map_err(write_error(&path))?;
            staged.push((name, path, kind, contents.len()));
        }

        let mut files = Vec::with_capacity(staged.len());
        for (name, path, kind, size) in staged {
            let target = self.publish(&path, name)?;
            tracing::debug!(path = %target.display(), size, "wrote output");
            files.push(EmittedFile {
                path: target,
                kind,
                size,
            });
        }
        Ok(files)
    }

    fn publish(&mut self, staged: &Path, name: &str) -> Result<PathBuf, EmitError> {
        let target = self.out_dir.join(name);
        if target.is_dir() {
            return Err(EmitError::Write {
                path: target,
                source: io::Error::other("a directory is in the way"),
            });
        }

        self.record_missing_dirs(&target);
        if target.exists() {
            let backup = self.staging.join("backup").join(name);
            move_file(&target, &backup).map_err(write_error(&target))?;
            self.backups.push((target.clone(), backup));
        }

        move_file(staged, &target).map_err(write_error(&target))?;
        self.published.push(target.clone());
        Ok(target)
    }

    fn record_missing_dirs(&mut self, target: &Path) {
        let mut missing = Vec::new();
        let mut dir = target.parent();
        while let Some(d) = dir {
            if d == self.out_dir || d.exists() {
                break;
            }
            missing.push(d.to_path_buf());
            dir = d.parent();
        }
        self.created_dirs.extend(missing.into_iter().rev());
    }

    fn rollback(&mut self) {
        for target in self.published.drain(..).rev() {
            if let Err(e) = fs::remove_file(&target) {
                tracing::warn!(path = %target.display(), error = %e, "rollback: failed to remove output");
            }
        }
        for (target, backup) in self.backups.drain(..).rev() {
            if let Err(e) = move_file(&backup, &target) {
                tracing::warn!(path = %target.display(), error = %e, "rollback: failed to restore file");
            }
        }
        for dir in self.created_dirs.drain(..).rev() {
            let _ = fs::remove_dir(&dir);
        }
    }
}
