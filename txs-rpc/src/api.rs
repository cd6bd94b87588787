use crate::error::RpcResult;
use crate::handlers::{acting_user, health, TxsHandler};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use txs_engine::{Persistence, TransactionExecutor, TransactionsRequest, TransactionsResponse};

/// Application state shared across handlers
pub struct AppState<P: Persistence> {
    pub txs: TxsHandler<P>,
}

impl<P: Persistence> Clone for AppState<P> {
    fn clone(&self) -> Self {
        Self {
            txs: self.txs.clone(),
        }
    }
}

/// Build the HTTP router around an executor
pub fn router<P: Persistence>(executor: TransactionExecutor<P>) -> Router {
    let state = AppState {
        txs: TxsHandler::new(executor),
    };

    Router::new()
        .route("/txs", post(execute_txs::<P>))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the router until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> RpcResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "transaction server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("transaction server stopped");
    Ok(())
}

async fn execute_txs<P: Persistence>(
    State(state): State<AppState<P>>,
    headers: HeaderMap,
    Json(request): Json<TransactionsRequest>,
) -> RpcResult<Json<TransactionsResponse>> {
    let user = acting_user(&headers).map_err(|err| {
        tracing::warn!("rejected transaction request: {}", err);
        err
    })?;

    Ok(Json(state.txs.execute(request, user).await))
}
