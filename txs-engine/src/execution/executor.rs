// Transaction Executor
// Orchestrates request execution with DAG-based scheduling and per-group atomicity

use crate::error::EngineResult;
use crate::execution::context::{HandlerContext, RequestContext};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{DependencyGraph, OperationNode};
use crate::execution::store::{GroupState, OperationState, ResultStore};
use crate::reference::{ParameterBuilder, ReferenceResolver};
use crate::registry::{OperationRegistry, Persistence, UnitOfWork};
use crate::request::models::{
    ErrorKind, ExecutionMode, Operation, OperationError, OperationResult, OperationStatus,
    TransactionGroup, TransactionResult, TransactionStatus, TransactionsRequest,
    TransactionsResponse,
};
use crate::request::params::OperationParams;
use crate::request::validator::RequestValidator;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Configuration for request execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum groups running at once in parallel mode (0 = unlimited)
    pub max_parallel_groups: usize,
    /// Maximum operations running at once per request (0 = unlimited)
    pub max_parallel_operations: usize,
    /// Per-operation handler timeout in milliseconds
    pub operation_timeout_ms: Option<u64>,
    /// In serial mode, skip every group after the first rollback
    pub skip_after_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_groups: 0,
            max_parallel_operations: 0,
            operation_timeout_ms: None,
            skip_after_failure: false,
        }
    }
}

impl ExecutorConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

/// Validate a request and build its dependency graph without running anything
pub fn plan(request: &TransactionsRequest) -> EngineResult<DependencyGraph> {
    RequestValidator::validate(request)?;
    Ok(DependencyGraph::from_request(request)?)
}

/// Executes transaction requests against one persistence backend
pub struct TransactionExecutor<P: Persistence> {
    persistence: Arc<P>,
    registry: Arc<OperationRegistry<P::Session>>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

impl<P: Persistence> Clone for TransactionExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            persistence: self.persistence.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Everything one request's tasks share
struct RequestRun<P: Persistence> {
    executor: TransactionExecutor<P>,
    graph: DependencyGraph,
    /// Request operations flattened in graph index order
    operations: Vec<Operation>,
    store: ResultStore,
    context: RequestContext,
    group_permits: Option<Arc<Semaphore>>,
    operation_permits: Option<Arc<Semaphore>>,
}

impl<P: Persistence> TransactionExecutor<P> {
    pub fn new(persistence: Arc<P>, registry: OperationRegistry<P::Session>) -> Self {
        Self {
            persistence,
            registry: Arc::new(registry),
            config: ExecutorConfig::default(),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperationRegistry<P::Session> {
        &self.registry
    }

    /// Validate and plan a request
    pub fn plan(&self, request: &TransactionsRequest) -> EngineResult<DependencyGraph> {
        plan(request)
    }

    /// Execute a whole request.
    ///
    /// Planning failures (shape, duplicate ids, unknown dependencies, cycles)
    /// reject the request before any handler runs.
    pub async fn execute_transactions(
        &self,
        request: TransactionsRequest,
        context: RequestContext,
    ) -> TransactionsResponse {
        let start = Instant::now();

        let graph = match plan(&request) {
            Ok(graph) => graph,
            Err(err) => {
                let error = err.to_operation_error();
                tracing::warn!(
                    request_id = %context.request_id,
                    kind = %error.kind,
                    "request rejected: {}",
                    error.message
                );
                self.event_tx
                    .send_event(ExecutionEvent::request_rejected(error.kind, &error.message));
                return TransactionsResponse::rejected(&request, error);
            }
        };

        let mode = request.execution_mode;
        self.event_tx.send_event(ExecutionEvent::request_started(
            mode,
            graph.groups.len(),
            graph.len(),
        ));
        tracing::info!(
            request_id = %context.request_id,
            mode = %mode,
            groups = graph.groups.len(),
            operations = graph.len(),
            "executing request"
        );

        let run = self.start(request, graph, context);
        let mut results = match mode {
            ExecutionMode::Serial => Self::run_groups_serial(&run).await,
            ExecutionMode::Parallel => Self::run_groups_parallel(&run).await,
        };
        results.sort_by_key(|(index, _)| *index);

        let response =
            TransactionsResponse::from_results(results.into_iter().map(|(_, r)| r).collect());

        let duration = start.elapsed();
        self.event_tx
            .send_event(ExecutionEvent::request_completed(response.status, duration));
        tracing::info!(
            request_id = %run.context.request_id,
            status = ?response.status,
            elapsed_ms = duration.as_millis() as u64,
            "request finished"
        );

        response
    }

    /// Execute one group as a request of its own
    pub async fn execute_transaction_group(
        &self,
        group: TransactionGroup,
        context: RequestContext,
    ) -> TransactionResult {
        let request = TransactionsRequest::new(ExecutionMode::Serial).with_group(group);
        let tx_id = request.transactions[0].id.clone();

        match plan(&request) {
            Ok(graph) => {
                let run = self.start(request, graph, context);
                Self::run_group(run, 0).await
            }
            Err(err) => TransactionResult::skipped(tx_id, err.to_string()),
        }
    }

    /// Execute one operation in its own unit of work
    pub async fn execute_operation(
        &self,
        tx_id: impl Into<String>,
        operation: Operation,
        context: RequestContext,
    ) -> OperationResult {
        let group = TransactionGroup::new(tx_id, ExecutionMode::Serial).with_operation(operation.clone());
        let request = TransactionsRequest::new(ExecutionMode::Serial).with_group(group);

        match plan(&request) {
            Ok(graph) => {
                let run = self.start(request, graph, context);
                Self::run_group(run, 0)
                    .await
                    .operations
                    .pop()
                    .unwrap_or_else(|| {
                        OperationResult::failed(
                            &operation,
                            OperationError::new(ErrorKind::Internal, "operation produced no result"),
                        )
                    })
            }
            Err(err) => OperationResult::failed(&operation, err.to_operation_error()),
        }
    }

    fn start(
        &self,
        request: TransactionsRequest,
        graph: DependencyGraph,
        context: RequestContext,
    ) -> Arc<RequestRun<P>> {
        let operations = request
            .transactions
            .into_iter()
            .flat_map(|group| group.operations)
            .collect();

        Arc::new(RequestRun {
            executor: self.clone(),
            store: ResultStore::new(&graph),
            graph,
            operations,
            context,
            group_permits: semaphore(self.config.max_parallel_groups),
            operation_permits: semaphore(self.config.max_parallel_operations),
        })
    }

    /// Groups one after another in dependency order
    async fn run_groups_serial(run: &Arc<RequestRun<P>>) -> Vec<(usize, TransactionResult)> {
        let mut results = Vec::with_capacity(run.graph.groups.len());
        let mut halted_by: Option<String> = None;

        for group in run.graph.group_order() {
            if let Some(failed) = &halted_by {
                let reason = format!("skipped after transaction '{}' rolled back", failed);
                run.store.set_group_state(&group.id, GroupState::Skipped);
                run.executor
                    .event_tx
                    .send_event(ExecutionEvent::group_skipped(&group.id, &reason));
                results.push((group.index, TransactionResult::skipped(&group.id, reason)));
                continue;
            }

            let result = Self::run_group(run.clone(), group.index).await;
            if result.status == TransactionStatus::RolledBack && run.executor.config.skip_after_failure {
                halted_by = Some(group.id.clone());
            }
            results.push((group.index, result));
        }

        results
    }

    /// Every group as its own task; cross-group dependencies wait inside `run_group`
    async fn run_groups_parallel(run: &Arc<RequestRun<P>>) -> Vec<(usize, TransactionResult)> {
        let mut tasks = JoinSet::new();
        for group in &run.graph.groups {
            let task_run = run.clone();
            let index = group.index;
            tasks.spawn(async move { (index, Self::run_group(task_run, index).await) });
        }

        let mut results = Vec::with_capacity(run.graph.groups.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!("transaction task failed: {}", err);
                    run.executor
                        .event_tx
                        .send_event(ExecutionEvent::error(format!("transaction task failed: {}", err), None));
                }
            }
        }

        // A lost task still gets reported
        for group in &run.graph.groups {
            if !results.iter().any(|(index, _)| *index == group.index) {
                run.store.set_group_state(&group.id, GroupState::RolledBack);
                results.push((
                    group.index,
                    TransactionResult::rolled_back(&group.id, Vec::new(), "transaction task aborted"),
                ));
            }
        }

        results
    }

    async fn run_group(run: Arc<RequestRun<P>>, group_index: usize) -> TransactionResult {
        let node = &run.graph.groups[group_index];
        let events = &run.executor.event_tx;

        for dependency in &node.dependencies {
            run.store.wait_for_group(dependency).await;
        }
        let _permit = acquire(&run.group_permits).await;

        let start = Instant::now();
        run.store.set_group_state(&node.id, GroupState::Running);
        events.send_event(ExecutionEvent::group_started(
            &node.id,
            node.execution_mode,
            node.operations.len(),
        ));
        tracing::debug!(tx_id = %node.id, mode = %node.execution_mode, "transaction started");

        let session = match run.executor.persistence.begin().await {
            Ok(session) => Arc::new(Mutex::new(session)),
            Err(err) => {
                let error = OperationError::new(ErrorKind::Persistence, err.to_string());
                let operations = node
                    .operations
                    .iter()
                    .map(|&index| {
                        let key = &run.graph.operations[index].key;
                        run.store.record(key, Err(error.clone()));
                        OperationResult::failed(&run.operations[index], error.clone())
                    })
                    .collect();
                return Self::finish_rolled_back(&run, group_index, operations, err.to_string(), start);
            }
        };

        let mut results = match node.execution_mode {
            ExecutionMode::Serial => {
                let mut results = Vec::with_capacity(node.operations.len());
                for op in run.graph.operation_order(node) {
                    results.push((op.index, Self::run_operation(&run, &session, op).await));
                }
                results
            }
            ExecutionMode::Parallel => Self::run_operations_parallel(&run, &session, group_index).await,
        };
        results.sort_by_key(|(index, _)| *index);
        let operations: Vec<OperationResult> = results.into_iter().map(|(_, r)| r).collect();

        let failure = operations
            .iter()
            .find(|op| op.status == OperationStatus::Failed)
            .map(|op| match &op.error {
                Some(error) => format!("operation '{}' failed: {}", op.id, error),
                None => format!("operation '{}' failed", op.id),
            });

        let mut session = session.lock().await;
        if let Some(reason) = failure {
            if let Err(err) = session.rollback().await {
                tracing::warn!(tx_id = %node.id, "rollback failed: {}", err);
                events.send_event(ExecutionEvent::warning(
                    format!("rollback failed: {}", err),
                    Some(node.id.clone()),
                ));
            }
            return Self::finish_rolled_back(&run, group_index, operations, reason, start);
        }

        match session.commit().await {
            Ok(()) => {
                let duration = start.elapsed();
                run.store.set_group_state(&node.id, GroupState::Committed);
                events.send_event(ExecutionEvent::group_committed(&node.id, duration));
                tracing::debug!(tx_id = %node.id, elapsed_ms = duration.as_millis() as u64, "transaction committed");
                TransactionResult::committed(&node.id, operations)
            }
            Err(err) => {
                events.send_event(ExecutionEvent::error(
                    format!("commit failed: {}", err),
                    Some(node.id.clone()),
                ));
                if let Err(rollback_err) = session.rollback().await {
                    tracing::warn!(tx_id = %node.id, "rollback after failed commit failed: {}", rollback_err);
                }
                Self::finish_rolled_back(&run, group_index, operations, err.to_string(), start)
            }
        }
    }

    /// Revoke the group's successes and report every one of them as rolled back
    fn finish_rolled_back(
        run: &RequestRun<P>,
        group_index: usize,
        operations: Vec<OperationResult>,
        reason: String,
        start: Instant,
    ) -> TransactionResult {
        let node = &run.graph.groups[group_index];
        run.store
            .revoke(node.operations.iter().map(|&index| &run.graph.operations[index].key));

        let rollback_note = format!("rolled back: {}", reason);
        let operations = operations
            .into_iter()
            .map(|op| op.into_rolled_back(&rollback_note))
            .collect();

        let duration = start.elapsed();
        run.store.set_group_state(&node.id, GroupState::RolledBack);
        run.executor
            .event_tx
            .send_event(ExecutionEvent::group_rolled_back(&node.id, &reason, duration));
        tracing::info!(tx_id = %node.id, "transaction rolled back: {}", reason);

        TransactionResult::rolled_back(&node.id, operations, reason)
    }

    /// All operations spawned at once; each waits for its own dependencies
    async fn run_operations_parallel(
        run: &Arc<RequestRun<P>>,
        session: &Arc<Mutex<P::Session>>,
        group_index: usize,
    ) -> Vec<(usize, OperationResult)> {
        let node = &run.graph.groups[group_index];
        let mut tasks = JoinSet::new();

        for op in run.graph.operation_order(node) {
            let task_run = run.clone();
            let task_session = session.clone();
            let index = op.index;
            tasks.spawn(async move {
                let op = &task_run.graph.operations[index];
                (index, Self::run_operation(&task_run, &task_session, op).await)
            });
        }

        let mut results = Vec::with_capacity(node.operations.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(tx_id = %node.id, "operation task failed: {}", err),
            }
        }

        for &index in &node.operations {
            if !results.iter().any(|(done, _)| *done == index) {
                let error = OperationError::new(ErrorKind::Internal, "operation task aborted");
                run.store.record(&run.graph.operations[index].key, Err(error.clone()));
                results.push((index, OperationResult::failed(&run.operations[index], error)));
            }
        }

        results
    }

    /// Wait for dependencies, dispatch, and record the outcome
    async fn run_operation(
        run: &RequestRun<P>,
        session: &Mutex<P::Session>,
        node: &OperationNode,
    ) -> OperationResult {
        let start = Instant::now();
        let operation = &run.operations[node.index];
        let key = &node.key;

        let outcome = match Self::await_dependencies(run, node).await {
            Err(error) => Err(error),
            Ok(()) => {
                let _permit = acquire(&run.operation_permits).await;
                run.store.mark_running(key);
                run.executor.event_tx.send_event(ExecutionEvent::operation_started(
                    &key.tx_id,
                    &key.op_id,
                    operation.verb,
                    &operation.domain_object,
                ));
                Self::dispatch(run, session, node, operation).await
            }
        };

        run.store.record(key, outcome.clone());

        let duration = start.elapsed();
        let result = match outcome {
            Ok(data) => OperationResult::success(operation, data),
            Err(error) => {
                tracing::debug!(op = %key, kind = %error.kind, "operation failed: {}", error.message);
                OperationResult::failed(operation, error)
            }
        };

        run.executor.event_tx.send_event(ExecutionEvent::operation_completed(
            &key.tx_id,
            &key.op_id,
            result.status,
            result.error.as_ref().map(ToString::to_string),
            duration,
        ));

        result
    }

    /// Same-group dependencies are awaited; other groups are already terminal here
    async fn await_dependencies(run: &RequestRun<P>, node: &OperationNode) -> Result<(), OperationError> {
        for dependency in &node.dependencies {
            let state = if dependency.tx_id == node.key.tx_id {
                run.store.wait_for(dependency).await
            } else {
                run.store.state(dependency)
            };

            match state {
                Some(OperationState::Succeeded(_)) => {}
                Some(other) => {
                    return Err(OperationError::new(
                        ErrorKind::DependencyNotSatisfied,
                        format!("dependency '{}' is {}", dependency, other.label()),
                    ))
                }
                None => {
                    return Err(OperationError::new(
                        ErrorKind::UnresolvedReference,
                        format!("dependency '{}' is not part of this request", dependency),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn dispatch(
        run: &RequestRun<P>,
        session: &Mutex<P::Session>,
        node: &OperationNode,
        operation: &Operation,
    ) -> Result<Value, OperationError> {
        let (descriptor, handler) = run
            .executor
            .registry
            .lookup(&operation.domain_object, operation.verb)?;

        let resolver = ReferenceResolver::new(&run.store, &node.key.tx_id);
        let params = ParameterBuilder::resolve(&operation.params, &resolver)
            .map_err(|err| OperationError::new(err.kind(), err.to_string()))?;

        let params = OperationParams::from_value(operation.verb, params)
            .and_then(|params| descriptor.domain_object.prepare(params))
            .map_err(|message| OperationError::new(ErrorKind::Validation, message))?;

        let ctx = HandlerContext::new(
            &run.context,
            node.key.clone(),
            descriptor.domain_object,
            operation.verb,
        );

        // One handler at a time per unit of work
        let mut session = session.lock().await;
        let call = AssertUnwindSafe(handler.call(params, &ctx, &mut *session)).catch_unwind();

        let outcome = match run.executor.config.operation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(OperationError::new(
                        ErrorKind::Timeout,
                        format!("operation timed out after {}ms", limit.as_millis()),
                    ))
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(result) => result.map_err(OperationError::from),
            Err(panic) => Err(OperationError::new(
                ErrorKind::Internal,
                format!("handler panicked: {}", panic_message(&*panic)),
            )),
        }
    }
}

fn semaphore(limit: usize) -> Option<Arc<Semaphore>> {
    (limit > 0).then(|| Arc::new(Semaphore::new(limit)))
}

async fn acquire(permits: &Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match permits {
        Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
        None => None,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DomainError, DomainObject, OperationHandler, PersistenceError};
    use crate::request::models::{ResponseStatus, Verb};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Session recording applied writes; commit publishes them
    struct Journal {
        pending: Vec<String>,
        committed: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl UnitOfWork for Journal {
        async fn commit(&mut self) -> Result<(), PersistenceError> {
            self.committed.lock().append(&mut self.pending);
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), PersistenceError> {
            self.pending.clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct JournalStore {
        committed: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Persistence for JournalStore {
        type Session = Journal;

        async fn begin(&self) -> Result<Journal, PersistenceError> {
            Ok(Journal {
                pending: Vec::new(),
                committed: self.committed.clone(),
            })
        }
    }

    /// Echoes `params.data` back with an id; fails when `data.fail` is set
    struct Recorder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl OperationHandler<Journal> for Recorder {
        async fn call(
            &self,
            params: OperationParams,
            ctx: &HandlerContext,
            session: &mut Journal,
        ) -> Result<Value, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let OperationParams::Create(create) = params else {
                return Ok(json!({"op": ctx.key.op_id}));
            };
            if create.data.get("meta").and_then(|m| m.get("fail")).is_some() {
                return Err(DomainError::NotFound("team not found".into()));
            }
            if create.data.get("meta").and_then(|m| m.get("panic")).is_some() {
                panic!("boom");
            }
            session.pending.push(ctx.key.to_string());
            Ok(json!({"id": ctx.key.to_string(), "data": create.data}))
        }
    }

    const ORG: &str = "0b5a1f7e-0000-4000-8000-000000000001";

    fn executor(calls: Arc<AtomicUsize>) -> (TransactionExecutor<JournalStore>, Arc<parking_lot::Mutex<Vec<String>>>) {
        let store = JournalStore::default();
        let committed = store.committed.clone();
        let registry: OperationRegistry<Journal> = OperationRegistry::new()
            .with_handler(DomainObject::Doc, Verb::Create, Recorder { calls: calls.clone() })
            .with_handler(DomainObject::Doc, Verb::Get, Recorder { calls });
        (TransactionExecutor::new(Arc::new(store), registry), committed)
    }

    fn doc(id: &str, meta: Value) -> Operation {
        Operation::new(
            id,
            Verb::Create,
            "doc",
            json!({"data": {"org_id": ORG, "name": id, "content": "x", "meta": meta}}),
        )
    }

    fn context() -> RequestContext {
        RequestContext::new(uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let (executor, committed) = executor(Arc::new(AtomicUsize::new(0)));
        let request = TransactionsRequest::new(ExecutionMode::Serial).with_group(
            TransactionGroup::new("tx", ExecutionMode::Serial)
                .with_operation(doc("a", json!({})))
                .with_operation(doc("b", json!({"from": "{{a.result.id}}"}))),
        );

        let response = executor.execute_transactions(request, context()).await;

        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(*committed.lock(), vec!["tx.a".to_string(), "tx.b".to_string()]);
        let b = response.transactions[0].operation("b").unwrap();
        assert_eq!(b.result.as_ref().unwrap()["data"]["meta"]["from"], json!("tx.a"));
    }

    #[tokio::test]
    async fn test_failure_rolls_back_group() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, committed) = executor(calls.clone());
        let request = TransactionsRequest::new(ExecutionMode::Serial).with_group(
            TransactionGroup::new("tx", ExecutionMode::Serial)
                .with_operation(doc("a", json!({})))
                .with_operation(doc("b", json!({"fail": true})))
                .with_operation(doc("c", json!({"after": "{{b.result.id}}"}))),
        );

        let response = executor.execute_transactions(request, context()).await;
        let tx = &response.transactions[0];

        assert_eq!(response.status, ResponseStatus::Failed);
        assert_eq!(tx.status, TransactionStatus::RolledBack);
        assert_eq!(tx.operation("a").unwrap().status, OperationStatus::RolledBack);
        assert_eq!(tx.operation("b").unwrap().error.as_ref().unwrap().kind, ErrorKind::NotFound);
        assert_eq!(
            tx.operation("c").unwrap().error.as_ref().unwrap().kind,
            ErrorKind::DependencyNotSatisfied
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(committed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let (executor, _) = executor(Arc::new(AtomicUsize::new(0)));
        let result = executor
            .execute_operation("tx", doc("a", json!({"panic": true})), context())
            .await;

        assert_eq!(result.status, OperationStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Internal);
        assert!(error.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_unsupported_and_invalid_params() {
        let (executor, _) = executor(Arc::new(AtomicUsize::new(0)));

        let result = executor
            .execute_operation("tx", Operation::new("a", Verb::Delete, "doc", json!({"id": ORG, "org_id": ORG})), context())
            .await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::UnsupportedOperation);

        let result = executor
            .execute_operation("tx", Operation::new("a", Verb::Get, "doc", json!({"id": "not-a-uuid", "org_id": ORG})), context())
            .await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _) = executor(calls.clone());
        let group = TransactionGroup::new("tx", ExecutionMode::Parallel)
            .with_operation(doc("a", json!({"x": "{{b.result.id}}"})))
            .with_operation(doc("b", json!({"x": "{{a.result.id}}"})));

        let result = executor.execute_transaction_group(group, context()).await;

        assert_eq!(result.status, TransactionStatus::Skipped);
        assert!(result.error.unwrap().contains("circular dependency"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    /// Handler that sleeps while holding the session
    struct Slow;

    #[async_trait::async_trait]
    impl OperationHandler<Journal> for Slow {
        async fn call(&self, _: OperationParams, _: &HandlerContext, _: &mut Journal) -> Result<Value, DomainError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let registry: OperationRegistry<Journal> =
            OperationRegistry::new().with_handler(DomainObject::Doc, Verb::Get, Slow);
        let executor = TransactionExecutor::new(Arc::new(JournalStore::default()), registry).with_config(
            ExecutorConfig {
                operation_timeout_ms: Some(20),
                ..ExecutorConfig::default()
            },
        );

        let result = executor
            .execute_operation("tx", Operation::new("a", Verb::Get, "doc", json!({"id": ORG, "org_id": ORG})), context())
            .await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::Timeout);
    }

    /// Persistence whose commits can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        fail: Arc<AtomicBool>,
    }

    struct FlakySession {
        fail: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl UnitOfWork for FlakySession {
        async fn commit(&mut self) -> Result<(), PersistenceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PersistenceError::new("disk full"));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Persistence for FlakyStore {
        type Session = FlakySession;

        async fn begin(&self) -> Result<FlakySession, PersistenceError> {
            Ok(FlakySession { fail: self.fail.clone() })
        }
    }

    struct Ok200;

    #[async_trait::async_trait]
    impl OperationHandler<FlakySession> for Ok200 {
        async fn call(&self, _: OperationParams, _: &HandlerContext, _: &mut FlakySession) -> Result<Value, DomainError> {
            Ok(json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let store = FlakyStore::default();
        store.fail.store(true, Ordering::SeqCst);
        let registry: OperationRegistry<FlakySession> =
            OperationRegistry::new().with_handler(DomainObject::Doc, Verb::Get, Ok200);
        let executor = TransactionExecutor::new(Arc::new(store), registry);

        let group = TransactionGroup::new("tx", ExecutionMode::Serial)
            .with_operation(Operation::new("a", Verb::Get, "doc", json!({"id": ORG, "org_id": ORG})));
        let result = executor.execute_transaction_group(group, context()).await;

        assert_eq!(result.status, TransactionStatus::RolledBack);
        assert_eq!(result.error.as_deref(), Some("persistence error: disk full"));
        let op = &result.operations[0];
        assert_eq!(op.status, OperationStatus::RolledBack);
        assert_eq!(op.error.as_ref().unwrap().kind, ErrorKind::RolledBack);
    }

    #[tokio::test]
    async fn test_skip_after_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (executor, _) = executor(calls);
        let executor = executor.with_config(ExecutorConfig {
            skip_after_failure: true,
            ..ExecutorConfig::default()
        });

        let request = TransactionsRequest::new(ExecutionMode::Serial)
            .with_group(TransactionGroup::new("t1", ExecutionMode::Serial).with_operation(doc("a", json!({}))))
            .with_group(TransactionGroup::new("t2", ExecutionMode::Serial).with_operation(doc("a", json!({"fail": 1}))))
            .with_group(TransactionGroup::new("t3", ExecutionMode::Serial).with_operation(doc("a", json!({}))));

        let response = executor.execute_transactions(request, context()).await;
        let statuses: Vec<TransactionStatus> = response.transactions.iter().map(|tx| tx.status).collect();

        assert_eq!(
            statuses,
            vec![TransactionStatus::Committed, TransactionStatus::RolledBack, TransactionStatus::Skipped]
        );
        assert_eq!(response.status, ResponseStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let (executor, _) = executor(Arc::new(AtomicUsize::new(0)));
        let (tx, mut rx) = crate::execution::events::progress_channel();
        let executor = executor.with_progress(tx);

        let request = TransactionsRequest::new(ExecutionMode::Parallel)
            .with_group(TransactionGroup::new("t1", ExecutionMode::Parallel).with_operation(doc("a", json!({}))));
        executor.execute_transactions(request, context()).await;
        drop(executor);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                ExecutionEvent::RequestStarted { .. } => "request_started",
                ExecutionEvent::GroupStarted { .. } => "group_started",
                ExecutionEvent::OperationStarted { .. } => "operation_started",
                ExecutionEvent::OperationCompleted { .. } => "operation_completed",
                ExecutionEvent::GroupCommitted { .. } => "group_committed",
                ExecutionEvent::RequestCompleted { .. } => "request_completed",
                _ => "other",
            });
        }

        assert_eq!(
            kinds,
            vec![
                "request_started",
                "group_started",
                "operation_started",
                "operation_completed",
                "group_committed",
                "request_completed",
            ]
        );
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: ExecutorConfig = serde_yaml::from_str("max_parallel_groups: 4").unwrap();
        assert_eq!(config.max_parallel_groups, 4);
        assert_eq!(config.max_parallel_operations, 0);
        assert_eq!(config.operation_timeout(), None);
        assert!(!config.skip_after_failure);
    }
}
