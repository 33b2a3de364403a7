//! Failure taxonomy shared by every pipeline component.
//!
//! Each module owns its own `thiserror` enum; all of them classify themselves into one of the
//! [`ErrorKind`] buckets so the HTTP surface and the CLI can report failures uniformly.

use serde::Serialize;
use std::fmt;

/// Coarse classification attached to every failure surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Profile absent, user not indexed, or session absent.
    NotFound,
    /// A downstream service could not be reached after the retry budget was spent.
    UpstreamUnavailable,
    /// A downstream service answered with content that could not be interpreted.
    MalformedUpstreamOutput,
    /// Missing endpoint, out-of-range setting, or embedding dimension mismatch.
    InvalidConfiguration,
    /// Caller supplied malformed input; rejected before any side effect.
    Validation,
}

impl ErrorKind {
    /// Stable snake_case label used in error bodies.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::MalformedUpstreamOutput => "malformed_upstream_output",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_serialized_form() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::UpstreamUnavailable,
            ErrorKind::MalformedUpstreamOutput,
            ErrorKind::InvalidConfiguration,
            ErrorKind::Validation,
        ] {
            let serialized = serde_json::to_value(kind).expect("serialize kind");
            assert_eq!(serialized, kind.as_str());
        }
    }
}
