// Execution Engine Module
// Dependency graph, result store, scheduling and per-group atomicity

pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod store;

// Re-export key types
pub use context::{HandlerContext, RequestContext};
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{plan, ExecutorConfig, TransactionExecutor};
pub use graph::{DependencyGraph, GraphError, GraphErrorKind, GroupNode, OperationNode};
pub use store::{GroupState, OperationState, ResultStore};
