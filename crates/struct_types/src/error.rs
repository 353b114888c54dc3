//! Errors raised by the schema engine

// ─────────────────────────────────────────────────────────────────────────────
// Serialization Error
// ─────────────────────────────────────────────────────────────────────────────

/// Shape mismatch raised while verifying, serializing or deserializing
///
/// The path is accumulated while unwinding: every container layer prepends
/// the key or index it was processing, so the final error points at the
/// offending leaf, e.g. `Expected number at .tracks.1.length`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}{}", .message, format_path_suffix(.path))]
pub struct SerializationError {
    message: String,
    path: Vec<String>,
}

impl SerializationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Error for a value that does not match the named type
    pub fn expected(type_name: &str) -> Self {
        Self::new(format!("Expected {type_name}"))
    }

    /// Prepend a path segment
    pub fn append_path(mut self, segment: impl ToString) -> Self {
        self.path.insert(0, segment.to_string());
        self
    }

    /// Message without the path
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Path segments from the root to the failing value
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Path rendered as `.a.b.c`
    pub fn path_string(&self) -> String {
        format_path(&self.path)
    }
}

/// Render path segments as `.a.b.c`
pub fn format_path(path: &[String]) -> String {
    path.iter().map(|segment| format!(".{segment}")).collect()
}

fn format_path_suffix(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at {}", format_path(path))
    }
}

/// Result type for schema operations
pub type SerializationResult<T> = Result<T, SerializationError>;

/// Helper to attach a path segment to an error in a result chain
pub(crate) trait ResultPathExt<T> {
    fn at(self, segment: impl ToString) -> SerializationResult<T>;
}

impl<T> ResultPathExt<T> for SerializationResult<T> {
    fn at(self, segment: impl ToString) -> SerializationResult<T> {
        self.map_err(|e| e.append_path(segment))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Union Discrimination Error
// ─────────────────────────────────────────────────────────────────────────────

/// Raised while constructing a union whose members cannot be told apart
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct UnionDiscriminationError(pub String);

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
