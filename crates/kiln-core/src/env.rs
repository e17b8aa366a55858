//! `.env` file loading.
//!
//! Files listed in the config are read in order, later files overriding
//! earlier ones. A variable already present in the process environment wins
//! over any file value, the way `dotenv` treats pre-set variables.

use rustc_hash::FxHashMap as HashMap;
use std::path::Path;

/// Variables loaded for a build, keyed by name.
pub type EnvMap = HashMap<String, String>;

/// Parse the contents of one `.env` file.
///
/// Accepts `KEY=value`, `export KEY=value`, double-quoted values with
/// `\n`/`\t`/`\"`/`\\` escapes, literal single-quoted values, and trailing
/// ` # comments` after unquoted values. Blank lines and `#` lines are skipped.
#[must_use]
pub fn parse(content: &str) -> EnvMap {
    let mut env = EnvMap::default();

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let key = key.strip_prefix("export ").map_or(key, str::trim);
        if key.is_empty() {
            continue;
        }
        env.insert(key.to_string(), parse_value(raw.trim()));
    }

    env
}

fn parse_value(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix('"') {
        let mut value = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => break,
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(other @ ('"' | '\\')) => value.push(other),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => value.push('\\'),
                },
                _ => value.push(c),
            }
        }
        return value;
    }

    if let Some(inner) = raw.strip_prefix('\'') {
        return inner.split('\'').next().unwrap_or_default().to_string();
    }

    match raw.find(" #") {
        Some(pos) => raw[..pos].trim_end().to_string(),
        None => raw.to_string(),
    }
}

/// Load `files` (relative to `root`) and apply process overrides.
///
/// Missing files are skipped silently; an unreadable file is treated the same.
#[must_use]
pub fn load(root: &Path, files: &[String]) -> EnvMap {
    let mut env = EnvMap::default();

    for file in files {
        let path = root.join(file);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                tracing::debug!(path = %path.display(), "loaded env file");
                env.extend(parse(&content));
            }
            Err(_) => continue,
        }
    }

    for (key, value) in &mut env {
        if let Ok(process_value) = std::env::var(key) {
            *value = process_value;
        }
    }

    env
}

/// Look up `key` in the process environment first, then in `env`.
#[must_use]
pub fn lookup(env: &EnvMap, key: &str) -> Option<String> {
    std::env::var(key).ok().or_else(|| env.get(key).cloned())
}
