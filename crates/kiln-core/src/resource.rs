use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Canonical identity of one input asset.
///
/// Always built from a canonicalized absolute path, so two specifiers that
/// reach the same file compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Canonicalize `path` and wrap it.
    pub fn canonicalize(path: &Path) -> std::io::Result<Self> {
        let canonical = dunce::canonicalize(path)?;
        Ok(Self(canonical.display().to_string()))
    }

    /// Wrap a path the caller has already canonicalized.
    #[must_use]
    pub fn from_canonical(path: &Path) -> Self {
        Self(path.display().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// Directory containing the resource; specifiers inside it resolve from here.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.as_path().parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Extension without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.as_path().extension().and_then(|e| e.to_str())
    }

    /// File name without the extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.as_path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("module")
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a module is, which decides the bundle it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Script,
    Style,
    Markup,
    Asset,
}

impl ModuleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::Markup => "markup",
            Self::Asset => "asset",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
