use crate::error::{RpcError, RpcResult};
use axum::http::HeaderMap;
use txs_engine::{
    Persistence, RequestContext, TransactionExecutor, TransactionsRequest, TransactionsResponse,
};
use uuid::Uuid;

/// Header carrying the identity established by the authentication layer
pub const USER_HEADER: &str = "x-user-id";

/// Read the acting user from the request headers
pub fn acting_user(headers: &HeaderMap) -> RpcResult<Uuid> {
    let value = headers
        .get(USER_HEADER)
        .ok_or_else(|| RpcError::Unauthorized(format!("missing {} header", USER_HEADER)))?;

    value
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| RpcError::Unauthorized(format!("invalid {} header", USER_HEADER)))
}

/// Runs transaction requests for the HTTP layer
pub struct TxsHandler<P: Persistence> {
    executor: TransactionExecutor<P>,
}

impl<P: Persistence> TxsHandler<P> {
    pub fn new(executor: TransactionExecutor<P>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &TransactionExecutor<P> {
        &self.executor
    }

    pub async fn execute(
        &self,
        request: TransactionsRequest,
        acting_user: Uuid,
    ) -> TransactionsResponse {
        let context = RequestContext::new(acting_user);
        tracing::debug!(
            request_id = %context.request_id,
            user = %acting_user,
            groups = request.transactions.len(),
            "received transaction request"
        );
        self.executor.execute_transactions(request, context).await
    }
}

impl<P: Persistence> Clone for TxsHandler<P> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
        }
    }
}
