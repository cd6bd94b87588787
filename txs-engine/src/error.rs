// Engine error types
// Failures that stop a request before any operation runs

use crate::execution::graph::GraphError;
use crate::request::error::RequestError;
use crate::request::models::{ErrorKind, OperationError};

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Request(err) => err.kind(),
            EngineError::Graph(err) => err.error_kind(),
        }
    }

    /// The top-level error reported on a rejected response
    pub fn to_operation_error(&self) -> OperationError {
        let message = match self {
            EngineError::Graph(err) => err.message.clone(),
            other => other.to_string(),
        };
        OperationError::new(self.kind(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err: EngineError = GraphError::cyclic("a -> b -> a").into();
        assert_eq!(err.kind(), ErrorKind::CyclicDependency);
        assert_eq!(err.to_operation_error().message, "a -> b -> a");

        let err: EngineError = RequestError::DuplicateId {
            scope: "operation",
            id: "tx.op".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::DuplicateId);
        assert_eq!(err.to_string(), "duplicate operation id 'tx.op'");
    }
}
