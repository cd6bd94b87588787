// Transaction RPC Library
// HTTP surface over the transaction engine

pub mod api;
pub mod error;
pub mod handlers;

pub use api::{router, serve, AppState};
pub use error::{RpcError, RpcResult};
pub use handlers::{acting_user, TxsHandler, USER_HEADER};

// Re-export types needed by clients
pub use txs_engine;
pub use txs_engine::{TransactionsRequest, TransactionsResponse};
