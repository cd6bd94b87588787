// Request and response models for batch transaction execution
// Wire shapes for TransactionsRequest / TransactionsResponse and their parts

use crate::request::error::{RequestError, RequestResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

// =============================================================================
// Request Types
// =============================================================================

/// How the members of a collection are scheduled relative to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Serial,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Serial => write!(f, "serial"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Create,
    Get,
    List,
    Update,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 5] = [
        Verb::Create,
        Verb::Get,
        Verb::List,
        Verb::Update,
        Verb::Delete,
    ];

    /// Whether the verb changes persisted state and therefore needs rollback
    pub fn is_mutating(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single CRUD action against a named domain object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,

    #[serde(alias = "operation")]
    pub verb: Verb,

    /// Kept as a free string so an unknown object fails only this operation
    pub domain_object: String,

    #[serde(default)]
    pub params: Value,

    /// Explicit dependencies, written `op-id` or `tx-id.op-id`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Operation {
    pub fn new(id: impl Into<String>, verb: Verb, domain_object: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            verb,
            domain_object: domain_object.into(),
            params,
            depends_on: Vec::new(),
        }
    }

    pub fn with_depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

/// An atomic batch of operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionGroup {
    pub id: String,

    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl TransactionGroup {
    pub fn new(id: impl Into<String>, execution_mode: ExecutionMode) -> Self {
        Self {
            id: id.into(),
            execution_mode,
            operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operation(&self, op_id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == op_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionsRequest {
    #[serde(default)]
    pub execution_mode: ExecutionMode,

    #[serde(alias = "txs", default)]
    pub transactions: Vec<TransactionGroup>,
}

impl TransactionsRequest {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            transactions: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: TransactionGroup) -> Self {
        self.transactions.push(group);
        self
    }

    pub fn from_json(content: &str) -> RequestResult<Self> {
        serde_json::from_str(content).map_err(RequestError::from)
    }

    pub fn from_yaml(content: &str) -> RequestResult<Self> {
        serde_yaml::from_str(content).map_err(RequestError::from)
    }

    /// Load a request file; `.yaml`/`.yml` are read as YAML, anything else as JSON
    pub fn from_file(path: impl AsRef<Path>) -> RequestResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RequestError::Io {
            path: path.display().to_string(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn group(&self, tx_id: &str) -> Option<&TransactionGroup> {
        self.transactions.iter().find(|group| group.id == tx_id)
    }

    pub fn operation(&self, key: &OpKey) -> Option<&Operation> {
        self.group(&key.tx_id)?.operation(&key.op_id)
    }

    pub fn operation_count(&self) -> usize {
        self.transactions.iter().map(|g| g.operations.len()).sum()
    }
}

/// Identity of an operation within one request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpKey {
    pub tx_id: String,
    pub op_id: String,
}

impl OpKey {
    pub fn new(tx_id: impl Into<String>, op_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            op_id: op_id.into(),
        }
    }

    /// Parse an explicit dependency written `op-id` or `tx-id.op-id`
    pub fn parse_dependency(dependency: &str, current_tx: &str) -> Option<Self> {
        match dependency.split_once('.') {
            Some((tx_id, op_id)) if is_valid_id(tx_id) && is_valid_id(op_id) => {
                Some(Self::new(tx_id, op_id))
            }
            None if is_valid_id(dependency) => Some(Self::new(current_tx, dependency)),
            _ => None,
        }
    }
}

impl fmt::Display for OpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tx_id, self.op_id)
    }
}

/// Group and operation ids are ASCII alphanumerics, `_` and `-`
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Committed,
    RolledBack,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Structured error kind reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Unauthorized,
    Validation,
    UnsupportedOperation,
    UnresolvedReference,
    DependencyNotSatisfied,
    InvalidReferencePath,
    Timeout,
    Persistence,
    RolledBack,
    Internal,
    InvalidRequest,
    DuplicateId,
    UnknownDependency,
    CyclicDependency,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub id: String,
    pub verb: Verb,
    pub domain_object: String,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl OperationResult {
    pub fn success(operation: &Operation, data: Value) -> Self {
        Self {
            id: operation.id.clone(),
            verb: operation.verb,
            domain_object: operation.domain_object.clone(),
            status: OperationStatus::Success,
            result: Some(data),
            error: None,
        }
    }

    pub fn failed(operation: &Operation, error: OperationError) -> Self {
        Self {
            id: operation.id.clone(),
            verb: operation.verb,
            domain_object: operation.domain_object.clone(),
            status: OperationStatus::Failed,
            result: None,
            error: Some(error),
        }
    }

    /// Demote a successful result after its group rolled back
    pub fn into_rolled_back(self, reason: &str) -> Self {
        if self.status != OperationStatus::Success {
            return self;
        }
        Self {
            status: OperationStatus::RolledBack,
            result: None,
            error: Some(OperationError::new(ErrorKind::RolledBack, reason)),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub id: String,
    pub status: TransactionStatus,
    pub operations: Vec<OperationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransactionResult {
    pub fn committed(id: impl Into<String>, operations: Vec<OperationResult>) -> Self {
        Self {
            id: id.into(),
            status: TransactionStatus::Committed,
            operations,
            error: None,
        }
    }

    pub fn rolled_back(
        id: impl Into<String>,
        operations: Vec<OperationResult>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: TransactionStatus::RolledBack,
            operations,
            error: Some(error.into()),
        }
    }

    /// A group that never ran; its operations are absent from the result
    pub fn skipped(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TransactionStatus::Skipped,
            operations: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn operation(&self, op_id: &str) -> Option<&OperationResult> {
        self.operations.iter().find(|op| op.id == op_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub status: ResponseStatus,
    pub transactions: Vec<TransactionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl TransactionsResponse {
    /// Assemble a response; status is derived from how many groups committed
    pub fn from_results(transactions: Vec<TransactionResult>) -> Self {
        let committed = transactions
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Committed)
            .count();

        let status = if committed == transactions.len() && committed > 0 {
            ResponseStatus::Success
        } else if committed == 0 {
            ResponseStatus::Failed
        } else {
            ResponseStatus::PartialFailure
        };

        Self {
            status,
            transactions,
            error: None,
        }
    }

    /// A request rejected before execution; every group is reported skipped
    pub fn rejected(request: &TransactionsRequest, error: OperationError) -> Self {
        let transactions = request
            .transactions
            .iter()
            .map(|group| TransactionResult::skipped(&group.id, "request rejected before execution"))
            .collect();

        Self {
            status: ResponseStatus::Failed,
            transactions,
            error: Some(error),
        }
    }

    pub fn transaction(&self, tx_id: &str) -> Option<&TransactionResult> {
        self.transactions.iter().find(|tx| tx.id == tx_id)
    }
}
