// Operation Registry
// Dispatch table from (domain object, verb) to handlers, plus the persistence contract

pub mod domain;
pub mod memory;

pub use domain::{ChildKey, DomainObject, PayloadKind, ScopeKey};
pub use memory::{memory_registry, MemoryPersistence, MemorySession};

use crate::execution::context::HandlerContext;
use crate::request::models::{ErrorKind, OperationError, Verb};
use crate::request::params::OperationParams;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// The closed set of failures a handler may report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
            DomainError::Validation(_) => ErrorKind::Validation,
        }
    }
}

impl From<DomainError> for OperationError {
    fn from(err: DomainError) -> Self {
        OperationError::new(err.kind(), err.to_string())
    }
}

/// Infrastructure failure while beginning, committing or rolling back
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("persistence error: {message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One transaction group's persistence session
#[async_trait::async_trait]
pub trait UnitOfWork: Send + 'static {
    async fn commit(&mut self) -> Result<(), PersistenceError>;
    async fn rollback(&mut self) -> Result<(), PersistenceError>;
}

/// Source of units of work, one per transaction group
#[async_trait::async_trait]
pub trait Persistence: Send + Sync + 'static {
    type Session: UnitOfWork;

    async fn begin(&self) -> Result<Self::Session, PersistenceError>;
}

/// A CRUD handler for one (domain object, verb) pair
#[async_trait::async_trait]
pub trait OperationHandler<S: Send>: Send + Sync {
    async fn call(
        &self,
        params: OperationParams,
        ctx: &HandlerContext,
        session: &mut S,
    ) -> Result<Value, DomainError>;
}

/// Static description of a registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerDescriptor {
    pub domain_object: DomainObject,
    pub verb: Verb,
    pub scope_key: ScopeKey,
    pub mutating: bool,
}

impl HandlerDescriptor {
    pub fn new(domain_object: DomainObject, verb: Verb) -> Self {
        Self {
            domain_object,
            verb,
            scope_key: domain_object.scope_key(),
            mutating: verb.is_mutating(),
        }
    }
}

struct Registration<S: Send> {
    descriptor: HandlerDescriptor,
    handler: Arc<dyn OperationHandler<S>>,
}

/// Registry of handlers; built at startup, read-only afterwards
pub struct OperationRegistry<S: Send> {
    handlers: HashMap<(DomainObject, Verb), Registration<S>>,
}

impl<S: Send + 'static> OperationRegistry<S> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register (or replace) the handler for a pair
    pub fn register(
        &mut self,
        domain_object: DomainObject,
        verb: Verb,
        handler: impl OperationHandler<S> + 'static,
    ) -> &mut Self {
        self.handlers.insert(
            (domain_object, verb),
            Registration {
                descriptor: HandlerDescriptor::new(domain_object, verb),
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// Builder-style registration
    pub fn with_handler(
        mut self,
        domain_object: DomainObject,
        verb: Verb,
        handler: impl OperationHandler<S> + 'static,
    ) -> Self {
        self.register(domain_object, verb, handler);
        self
    }

    /// Find the handler for a request's free-form domain object name
    pub fn lookup(
        &self,
        domain_object: &str,
        verb: Verb,
    ) -> Result<(HandlerDescriptor, Arc<dyn OperationHandler<S>>), OperationError> {
        let unsupported = || {
            OperationError::new(
                ErrorKind::UnsupportedOperation,
                format!("unsupported operation: {} on '{}'", verb, domain_object),
            )
        };

        let domain: DomainObject = domain_object.parse().map_err(|_| unsupported())?;
        self.handlers
            .get(&(domain, verb))
            .map(|registration| (registration.descriptor, registration.handler.clone()))
            .ok_or_else(unsupported)
    }

    pub fn supports(&self, domain_object: &str, verb: Verb) -> bool {
        domain_object
            .parse::<DomainObject>()
            .map(|domain| self.handlers.contains_key(&(domain, verb)))
            .unwrap_or(false)
    }

    /// All registered pairs, sorted by domain object then verb
    pub fn descriptors(&self) -> Vec<HandlerDescriptor> {
        let mut descriptors: Vec<HandlerDescriptor> = self
            .handlers
            .values()
            .map(|registration| registration.descriptor)
            .collect();
        descriptors.sort_by_key(|d| (d.domain_object, d.verb));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S: Send + 'static> Default for OperationRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
