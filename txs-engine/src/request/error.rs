// Request error types
// Parse and shape-validation failures that reject a whole request before execution

use crate::request::models::ErrorKind;

use std::fmt;
use thiserror::Error;

pub type RequestResult<T> = Result<T, RequestError>;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to read request file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML request: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("duplicate {scope} id '{id}'")]
    DuplicateId { scope: &'static str, id: String },

    #[error("invalid request: {}", join_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RequestError::DuplicateId { .. } => ErrorKind::DuplicateId,
            _ => ErrorKind::InvalidRequest,
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            RequestError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One shape problem found in a request, located by a dotted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
    pub path: String,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_display_joins_issues() {
        let err = RequestError::Invalid(vec![
            ValidationIssue::new("missing 'id'", "transactions[0].operations[0].params"),
            ValidationIssue::new("must not be empty", "transactions[1].operations"),
        ]);

        let text = err.to_string();
        assert!(text.contains("transactions[0].operations[0].params: missing 'id'"));
        assert!(text.contains("; transactions[1].operations: must not be empty"));
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(err.issues().len(), 2);
    }

    #[test]
    fn test_duplicate_kind() {
        let err = RequestError::DuplicateId {
            scope: "transaction",
            id: "tx-1".into(),
        };
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(err.to_string(), "duplicate transaction id 'tx-1'");
    }
}
