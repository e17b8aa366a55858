use crate::config::ConfigError;
use crate::emit::EmitError;
use crate::graph::BuildError;
use crate::resource::ResourceId;
use thiserror::Error;

/// Any failure of a kiln build.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl Error {
    /// Stable SCREAMING_SNAKE_CASE code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Build(e) => e.code(),
            Self::Emit(e) => e.code(),
        }
    }

    /// Modules leading to the failure, entry first. Empty when not applicable.
    #[must_use]
    pub fn chain(&self) -> &[ResourceId] {
        match self {
            Self::Build(e) => e.chain(),
            _ => &[],
        }
    }

    /// Messages of this error and all of its sources, outermost first.
    /// A source that repeats its wrapper's message is listed once.
    #[must_use]
    pub fn causes(&self) -> Vec<String> {
        let mut causes = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let message = err.to_string();
            if causes.last() != Some(&message) {
                causes.push(message);
            }
            source = err.source();
        }
        causes
    }
}
