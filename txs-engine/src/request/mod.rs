// Request Module
// Wire model, typed parameters and pre-execution validation

pub mod error;
pub mod models;
pub mod params;
pub mod validator;

pub use error::{RequestError, RequestResult, ValidationIssue};
pub use models::{
    ErrorKind, ExecutionMode, OpKey, Operation, OperationError, OperationResult, OperationStatus,
    ResponseStatus, TransactionGroup, TransactionResult, TransactionStatus, TransactionsRequest,
    TransactionsResponse, Verb,
};
pub use params::{OperationParams, Pagination, SortCriteria, SortDirection};
pub use validator::RequestValidator;
