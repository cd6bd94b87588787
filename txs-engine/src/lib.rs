// Transaction Engine Library
// Batch execution of CRUD operation groups with references, dependency scheduling and rollback

pub mod error;
pub mod execution;
pub mod reference;
pub mod registry;
pub mod request;

// Re-export commonly used types
pub use error::{EngineError, EngineResult};

// Re-export request types
pub use request::{
    ErrorKind, ExecutionMode, OpKey, Operation, OperationError, OperationResult, OperationStatus,
    RequestError, RequestValidator, ResponseStatus, TransactionGroup, TransactionResult,
    TransactionStatus, TransactionsRequest, TransactionsResponse, Verb,
};

// Re-export execution types
pub use execution::{
    plan, progress_channel, DependencyGraph, ExecutionEvent, ExecutorConfig, GraphError,
    ProgressReceiver, ProgressSender, RequestContext, TransactionExecutor,
};

// Re-export registry types
pub use registry::{
    memory_registry, DomainError, DomainObject, MemoryPersistence, MemorySession,
    OperationHandler, OperationRegistry, Persistence, PersistenceError, UnitOfWork,
};
