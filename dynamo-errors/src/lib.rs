//! The error taxonomy of [section 7 of the spec](https://), shared by every
//! `dynamo-*` crate. Library code returns [`DynamoResult`]; only the `dynamo`
//! binary crate reaches for `anyhow` at its CLI boundary.

use std::fmt;

use thiserror::Error;

/// The kind of entity a remote catalog referenced but that the local
/// inventory has no record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentKind {
    Site,
    Group,
    Dataset,
    Block,
}

impl fmt::Display for ReferentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferentKind::Site => "site",
            ReferentKind::Group => "group",
            ReferentKind::Dataset => "dataset",
            ReferentKind::Block => "block",
        };
        write!(f, "{s}")
    }
}

/// One attempt of a retried network call: the error's type name and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub kind: String,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Errors produced anywhere in the dynamo workspace.
///
/// Every variant corresponds to one of the kinds enumerated in section 7 of
/// the spec; the doc comment on each repeats that section's propagation rule
/// so the call site reads correctly without cross-referencing the spec.
#[derive(Debug, Error)]
pub enum DynamoError {
    /// REST retries exhausted. The caller may skip the sub-query; never
    /// aborts a synchronization cycle unless raised during site/group load.
    #[error("transient network error after {} attempt(s): {}", .attempts.len(), .attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    TransientNetwork { attempts: Vec<AttemptError> },

    /// A remote payload had an unexpected shape. The adapter logs and
    /// returns an empty delta without mutating the inventory.
    #[error("failed to parse {context}: {message}")]
    Parse { context: String, message: String },

    /// A remote catalog named a site or group the local inventory doesn't
    /// have. The affected replica keeps the field null with a warning
    /// (site references instead skip the row entirely).
    #[error("{kind} {name:?} referenced by remote catalog is not known locally")]
    MissingReferent { kind: ReferentKind, name: String },

    /// An internal consistency check failed. Fatal: abort the cycle, do not
    /// commit the pending save.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A SQL failure. Aborts the current save swap; temporary tables are
    /// dropped and the live tables are left untouched.
    #[error("store error during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An unknown policy variable or malformed condition. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type DynamoResult<T> = Result<T, DynamoError>;

impl DynamoError {
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        DynamoError::Parse {
            context: context.into(),
            message: message.into(),
        }
    }

    pub fn missing_referent(kind: ReferentKind, name: impl Into<String>) -> Self {
        DynamoError::MissingReferent {
            kind,
            name: name.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        DynamoError::InvariantViolation(message.into())
    }

    pub fn store(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DynamoError::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        DynamoError::Config(message.into())
    }

    /// True for errors that a synchronization cycle may swallow and continue
    /// past (everything except [`DynamoError::InvariantViolation`], which is
    /// always fatal to the current cycle).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DynamoError::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_network_message_lists_every_attempt() {
        let err = DynamoError::TransientNetwork {
            attempts: vec![
                AttemptError::new("HttpError", "500"),
                AttemptError::new("HttpError", "502"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("2 attempt"));
        assert!(message.contains("500"));
        assert!(message.contains("502"));
    }

    #[test]
    fn invariant_violation_is_not_recoverable() {
        assert!(!DynamoError::invariant("bad graph").is_recoverable());
        assert!(DynamoError::parse("x", "y").is_recoverable());
    }
}
