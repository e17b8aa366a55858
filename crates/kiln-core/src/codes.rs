//! Stable error codes.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions. They appear
//! in `--json` output and in diagnostics.

/// No file matched the specifier or any extension candidate.
pub const RESOLVE_NOT_FOUND: &str = "RESOLVE_NOT_FOUND";

/// Path aliases matched the specifier and led to different files.
pub const RESOLVE_AMBIGUOUS: &str = "RESOLVE_AMBIGUOUS";

/// No transform rule matched a non-static resource.
pub const TRANSFORM_NO_MATCHING_RULE: &str = "TRANSFORM_NO_MATCHING_RULE";

/// A capability reported a failure while compiling a resource.
pub const TRANSFORM_FAILED: &str = "TRANSFORM_FAILED";

/// A dependency of a module could not be resolved.
pub const BUILD_RESOLUTION_ERROR: &str = "BUILD_RESOLUTION_ERROR";

/// An entry specifier could not be resolved.
pub const BUILD_ENTRY_NOT_FOUND: &str = "BUILD_ENTRY_NOT_FOUND";

/// A resolved resource could not be read.
pub const BUILD_READ_ERROR: &str = "BUILD_READ_ERROR";

/// The build was cancelled before completion.
pub const BUILD_CANCELLED: &str = "BUILD_CANCELLED";

/// Graph construction finished with unbound edges.
pub const BUILD_GRAPH_INCOMPLETE: &str = "BUILD_GRAPH_INCOMPLETE";

/// An output file could not be written or published.
pub const EMIT_WRITE_ERROR: &str = "EMIT_WRITE_ERROR";

/// Two outputs rendered to the same file name.
pub const EMIT_NAME_COLLISION: &str = "EMIT_NAME_COLLISION";

/// A rendered output name is empty or points outside the output directory.
pub const EMIT_INVALID_NAME: &str = "EMIT_INVALID_NAME";

/// The config file could not be read.
pub const CONFIG_READ_ERROR: &str = "CONFIG_READ_ERROR";

/// The config file is not valid JSON or has the wrong shape.
pub const CONFIG_PARSE_ERROR: &str = "CONFIG_PARSE_ERROR";

/// The config file is well-formed but describes an unusable build.
pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

/// A rule names a capability that is not registered.
pub const CONFIG_UNKNOWN_CAPABILITY: &str = "CONFIG_UNKNOWN_CAPABILITY";

/// A rule's `test` pattern is not a valid regular expression.
pub const CONFIG_INVALID_PATTERN: &str = "CONFIG_INVALID_PATTERN";

/// The dev-server port variable is set but not a valid port.
pub const CONFIG_INVALID_PORT: &str = "CONFIG_INVALID_PORT";
