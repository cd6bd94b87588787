// Execution Context
// Caller identity for one request and the per-operation context handed to handlers

use crate::registry::domain::DomainObject;
use crate::request::models::{OpKey, Verb};

use uuid::Uuid;

/// Request-level context supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Identity established by the surrounding authentication layer
    pub acting_user: Uuid,

    /// Correlates log lines and events for one request
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(acting_user: Uuid) -> Self {
        Self {
            acting_user,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// What a handler learns about the operation it is serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerContext {
    pub acting_user: Uuid,
    pub request_id: Uuid,
    pub key: OpKey,
    pub domain_object: DomainObject,
    pub verb: Verb,
}

impl HandlerContext {
    pub fn new(context: &RequestContext, key: OpKey, domain_object: DomainObject, verb: Verb) -> Self {
        Self {
            acting_user: context.acting_user,
            request_id: context.request_id,
            key,
            domain_object,
            verb,
        }
    }
}
