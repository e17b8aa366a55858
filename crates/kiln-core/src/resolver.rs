//! Specifier resolution.
//!
//! Maps a specifier plus the requesting directory to a canonical
//! [`ResourceId`].
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../styles/main.scss`
//! - Absolute: `/abs/path/to/file.js`
//! - Aliased: `@/components/button` with an `@ → ./src` alias
//! - Bare: `main.js`, `lodash`, `@babel/polyfill` (tried next to the
//!   requester first, then looked up in `node_modules`)
//!
//! Each candidate path is tried verbatim, then with every registered
//! extension appended, then as a directory holding an `index` file.

use crate::codes;
use crate::resource::ResourceId;
use rustc_hash::FxHashMap as HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// Error during resolution.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("cannot resolve '{specifier}' from '{}'", .from.display())]
    NotFound {
        specifier: String,
        from: PathBuf,
        /// Every path that was checked, in order.
        tried: Vec<PathBuf>,
    },

    #[error("'{specifier}' is ambiguous: aliases resolve it to {}", join_ids(.targets))]
    Ambiguous {
        specifier: String,
        targets: Vec<ResourceId>,
    },
}

impl ResolveError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => codes::RESOLVE_NOT_FOUND,
            Self::Ambiguous { .. } => codes::RESOLVE_AMBIGUOUS,
        }
    }
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// A path alias: specifiers equal to `from` or starting with `from/` are
/// rewritten onto `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub from: String,
    /// Absolute target path.
    pub to: PathBuf,
}

/// Resolver settings, fixed for the duration of a build.
#[derive(Debug, Clone, Default)]
pub struct ResolverOptions {
    /// Extension candidates with leading dot, tried in order.
    pub extensions: Vec<String>,
    /// Path aliases in declaration order.
    pub aliases: Vec<Alias>,
}

/// Import resolver.
///
/// Results are memoized per instance; a build creates one resolver, so
/// filesystem changes between builds are always observed.
#[derive(Debug, Default)]
pub struct Resolver {
    options: ResolverOptions,
    cache: RwLock<HashMap<(String, PathBuf), Result<ResourceId, ResolveError>>>,
}

impl Resolver {
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            cache: RwLock::default(),
        }
    }

    /// Resolve `specifier` as requested from a file in `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<ResourceId, ResolveError> {
        let key = (specifier.to_string(), from_dir.to_path_buf());
        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(&key) {
                return cached.clone();
            }
        }

        let result = self.resolve_uncached(specifier, from_dir);
        tracing::trace!(specifier, from = %from_dir.display(), ok = result.is_ok(), "resolve");

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, result.clone());
        }
        result
    }

    fn resolve_uncached(&self, specifier: &str, from_dir: &Path) -> Result<ResourceId, ResolveError> {
        let mut tried = Vec::new();

        let expansions = self.alias_expansions(specifier);
        if !expansions.is_empty() {
            return self.resolve_aliased(specifier, from_dir, &expansions, &mut tried);
        }

        if is_path_like(specifier) {
            let target = from_dir.join(specifier);
            return self
                .resolve_path(&target, &mut tried)
                .ok_or_else(|| not_found(specifier, from_dir, tried));
        }

        // `main.js` next to the requester wins over a package of that name.
        if let Some(id) = self.resolve_path(&from_dir.join(specifier), &mut tried) {
            return Ok(id);
        }
        self.resolve_bare(specifier, from_dir, &mut tried)
            .ok_or_else(|| not_found(specifier, from_dir, tried))
    }

    /// Targets of every alias matching `specifier`, in declaration order.
    fn alias_expansions(&self, specifier: &str) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        for alias in &self.options.aliases {
            let expanded = if specifier == alias.from {
                alias.to.clone()
            } else if let Some(rest) = specifier
                .strip_prefix(alias.from.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                alias.to.join(rest)
            } else {
                continue;
            };
            if !out.contains(&expanded) {
                out.push(expanded);
            }
        }
        out
    }

    fn resolve_aliased(
        &self,
        specifier: &str,
        from_dir: &Path,
        expansions: &[PathBuf],
        tried: &mut Vec<PathBuf>,
    ) -> Result<ResourceId, ResolveError> {
        let mut found: Vec<ResourceId> = Vec::new();
        for target in expansions {
            if let Some(id) = self.resolve_path(target, tried) {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }

        match found.len() {
            0 => Err(not_found(specifier, from_dir, std::mem::take(tried))),
            1 => Ok(found.remove(0)),
            _ => Err(ResolveError::Ambiguous {
                specifier: specifier.to_string(),
                targets: found,
            }),
        }
    }

    /// Try `target` verbatim, with each extension, then as a directory index.
    fn resolve_path(&self, target: &Path, tried: &mut Vec<PathBuf>) -> Option<ResourceId> {
        tried.push(target.to_path_buf());
        if target.is_file() {
            return ResourceId::canonicalize(target).ok();
        }

        for ext in &self.options.extensions {
            let with_ext = PathBuf::from(format!("{}{}", target.display(), ext));
            tried.push(with_ext.clone());
            if with_ext.is_file() {
                return ResourceId::canonicalize(&with_ext).ok();
            }
        }

        if target.is_dir() {
            for ext in &self.options.extensions {
                let index = target.join(format!("index{ext}"));
                tried.push(index.clone());
                if index.is_file() {
                    return ResourceId::canonicalize(&index).ok();
                }
            }
        }

        None
    }

    /// Resolve a bare specifier by walking up through `node_modules` directories.
    fn resolve_bare(
        &self,
        specifier: &str,
        from_dir: &Path,
        tried: &mut Vec<PathBuf>,
    ) -> Option<ResourceId> {
        let (pkg_name, subpath) = split_bare_specifier(specifier);

        for dir in from_dir.ancestors() {
            let pkg_dir = dir.join("node_modules").join(pkg_name);
            if !pkg_dir.is_dir() {
                continue;
            }

            if let Some(sub) = subpath {
                if let Some(id) = self.resolve_path(&pkg_dir.join(sub), tried) {
                    return Some(id);
                }
                continue;
            }

            for field in package_entry_fields(&pkg_dir.join("package.json")) {
                if let Some(id) = self.resolve_path(&pkg_dir.join(field), tried) {
                    return Some(id);
                }
            }

            if let Some(id) = self.resolve_path(&pkg_dir, tried) {
                return Some(id);
            }
        }

        None
    }
}

fn not_found(specifier: &str, from_dir: &Path, tried: Vec<PathBuf>) -> ResolveError {
    ResolveError::NotFound {
        specifier: specifier.to_string(),
        from: from_dir.to_path_buf(),
        tried,
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || Path::new(specifier).is_absolute()
}

/// Split a bare specifier into package name and subpath.
fn split_bare_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut split_at = None;
    for (seen, (idx, _)) in specifier.match_indices('/').enumerate() {
        if seen + 1 == name_segments {
            split_at = Some(idx);
            break;
        }
    }
    match split_at {
        Some(idx) => (&specifier[..idx], Some(&specifier[idx + 1..])),
        None => (specifier, None),
    }
}

/// Entry candidates from `package.json`: `module` first, then `main`.
fn package_entry_fields(pkg_json: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(pkg_json) else {
        return Vec::new();
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return Vec::new();
    };
    ["module", "main"]
        .iter()
        .filter_map(|field| json.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> ResolverOptions {
        ResolverOptions {
            extensions: vec![".js".to_string(), ".scss".to_string()],
            aliases: Vec::new(),
        }
    }

    #[test]
    fn test_split_bare_specifier() {
        assert_eq!(split_bare_specifier("lodash"), ("lodash", None));
        assert_eq!(split_bare_specifier("lodash/get"), ("lodash", Some("get")));
        assert_eq!(split_bare_specifier("@babel/polyfill"), ("@babel/polyfill", None));
        assert_eq!(
            split_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core", Some("lib/parse"))
        );
    }

    #[test]
    fn test_resolve_relative_with_extension() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("utils.js"), "export const x = 1;").unwrap();

        let resolver = Resolver::new(options());
        let id = resolver.resolve("./utils", &src).unwrap();
        assert!(id.as_str().ends_with("utils.js"));
    }

    #[test]
    fn test_resolve_verbatim_before_extensions() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("theme"), "raw").unwrap();
        std::fs::write(dir.path().join("theme.js"), "js").unwrap();

        let resolver = Resolver::new(options());
        let id = resolver.resolve("./theme", dir.path()).unwrap();
        assert!(id.as_str().ends_with("theme"));
    }

    #[test]
    fn test_resolve_directory_index() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("widgets")).unwrap();
        std::fs::write(dir.path().join("widgets/index.js"), "").unwrap();

        let resolver = Resolver::new(options());
        let id = resolver.resolve("./widgets", dir.path()).unwrap();
        assert!(id.as_str().ends_with("index.js"));
    }

    #[test]
    fn test_resolve_is_deterministic_and_dedupes() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();
        std::fs::write(src.join("a.js"), "").unwrap();

        let resolver = Resolver::new(options());
        let first = resolver.resolve("./a.js", &src).unwrap();
        let second = resolver.resolve("./a.js", &src).unwrap();
        let other_spelling = resolver.resolve("../src/a", &src).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, other_spelling);

        // A fresh resolver agrees with the cached one.
        let fresh = Resolver::new(options()).resolve("./a.js", &src).unwrap();
        assert_eq!(first, fresh);
    }

    #[test]
    fn test_not_found_lists_candidates() {
        let dir = tempdir().unwrap();
        let resolver = Resolver::new(options());

        let err = resolver.resolve("./missing", dir.path()).unwrap_err();
        assert_eq!(err.code(), codes::RESOLVE_NOT_FOUND);
        let ResolveError::NotFound { tried, .. } = err else {
            panic!("expected NotFound");
        };
        assert!(tried.iter().any(|p| p.ends_with("missing")));
        assert!(tried.iter().any(|p| p.ends_with("missing.js")));
        assert!(tried.iter().any(|p| p.ends_with("missing.scss")));
    }

    #[test]
    fn test_alias_resolution() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("components")).unwrap();
        std::fs::write(src.join("components/button.js"), "").unwrap();

        let mut opts = options();
        opts.aliases.push(Alias {
            from: "@".to_string(),
            to: src.clone(),
        });
        let resolver = Resolver::new(opts);

        let id = resolver.resolve("@/components/button", dir.path()).unwrap();
        assert!(id.as_str().ends_with("button.js"));

        // "@scope/pkg" is not an alias hit.
        assert!(resolver.resolve("@scope/pkg", dir.path()).is_err());
    }

    #[test]
    fn test_conflicting_aliases_are_ambiguous() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/ui")).unwrap();
        std::fs::create_dir_all(dir.path().join("lib/ui")).unwrap();
        std::fs::write(dir.path().join("src/ui/button.js"), "").unwrap();
        std::fs::write(dir.path().join("lib/ui/button.js"), "").unwrap();

        let mut opts = options();
        opts.aliases.push(Alias {
            from: "@".to_string(),
            to: dir.path().join("src"),
        });
        opts.aliases.push(Alias {
            from: "@/ui".to_string(),
            to: dir.path().join("lib/ui"),
        });
        let resolver = Resolver::new(opts);

        let err = resolver.resolve("@/ui/button", dir.path()).unwrap_err();
        assert_eq!(err.code(), codes::RESOLVE_AMBIGUOUS);
    }

    #[test]
    fn test_agreeing_aliases_are_not_ambiguous() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.js"), "").unwrap();

        let mut opts = options();
        for _ in 0..2 {
            opts.aliases.push(Alias {
                from: "~".to_string(),
                to: dir.path().join("src"),
            });
        }
        let resolver = Resolver::new(opts);

        assert!(resolver.resolve("~/main", dir.path()).is_ok());
    }

    #[test]
    fn test_bare_specifier_prefers_sibling_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("util.js"), "").unwrap();
        std::fs::write(dir.path().join("theme.scss"), "").unwrap();
        let pkg = dir.path().join("node_modules/util.js");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("index.js"), "").unwrap();

        let resolver = Resolver::new(options());
        let id = resolver.resolve("util.js", dir.path()).unwrap();
        assert_eq!(id, ResourceId::canonicalize(&dir.path().join("util.js")).unwrap());

        let id = resolver.resolve("theme", dir.path()).unwrap();
        assert!(id.as_str().ends_with("theme.scss"));
    }

    #[test]
    fn test_bare_not_found_lists_local_and_package_candidates() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();

        let err = Resolver::new(options()).resolve("nothing", dir.path()).unwrap_err();
        let ResolveError::NotFound { tried, .. } = err else {
            panic!("expected NotFound");
        };
        assert!(tried.contains(&dir.path().join("nothing")));
        assert!(tried.contains(&dir.path().join("nothing.js")));
    }

    #[test]
    fn test_resolve_bare_package() {
        let dir = tempdir().unwrap();
        let pkg = dir.path().join("node_modules/@babel/polyfill");
        std::fs::create_dir_all(pkg.join("lib")).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"main": "lib/index.js"}"#).unwrap();
        std::fs::write(pkg.join("lib/index.js"), "").unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir(&src).unwrap();

        let resolver = Resolver::new(options());
        let id = resolver.resolve("@babel/polyfill", &src).unwrap();
        assert!(id.as_str().ends_with("index.js"));
        assert!(id.as_str().contains("polyfill"));
    }
}
