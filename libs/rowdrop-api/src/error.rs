use std::fmt;

/// Error kind for table source errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport or host failure while fetching.
    Io,
    /// Payload did not have the expected shape.
    Format,
    /// Table, row or column does not exist on the host.
    NotFound,
    /// Host refused access (token, permissions).
    Denied,
}

/// Error returned by all host-facing trait methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::NotFound, message: msg.into() }
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Denied, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_kind() {
        let err = SourceError::not_found("People").with_context("fetch_table");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "fetch_table: People");
        assert_eq!(err.to_string(), "NotFound: fetch_table: People");
    }

    #[test]
    fn json_errors_are_format_errors() {
        let err: SourceError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Format);
    }
}
