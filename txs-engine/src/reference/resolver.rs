// Reference Resolver
// Substitutes placeholders with values taken from completed operation results

use crate::reference::lexer::{Lexer, PathSegment, Reference, Segment};
use crate::request::models::{ErrorKind, OpKey};

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("{reference} points to unknown operation '{target}'")]
    Unresolved { reference: String, target: String },

    #[error("{reference} depends on operation '{target}' which is {state}")]
    DependencyNotSatisfied {
        reference: String,
        target: String,
        state: String,
    },

    #[error("{reference}: path '{path}' does not exist in the result of '{target}'")]
    InvalidPath {
        reference: String,
        target: String,
        path: String,
    },
}

impl ReferenceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReferenceError::Unresolved { .. } => ErrorKind::UnresolvedReference,
            ReferenceError::DependencyNotSatisfied { .. } => ErrorKind::DependencyNotSatisfied,
            ReferenceError::InvalidPath { .. } => ErrorKind::InvalidReferencePath,
        }
    }
}

/// What a result source knows about one operation
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// No such operation in this request
    Unknown,
    /// Known, but without a usable result; carries a state label
    NotSatisfied(&'static str),
    Ready(Value),
}

/// Anything the resolver can read completed results from
pub trait ResultSource {
    fn lookup(&self, key: &OpKey) -> Lookup;
}

impl ResultSource for HashMap<OpKey, Value> {
    fn lookup(&self, key: &OpKey) -> Lookup {
        match self.get(key) {
            Some(value) => Lookup::Ready(value.clone()),
            None => Lookup::Unknown,
        }
    }
}

pub struct ReferenceResolver<'a, S: ResultSource + ?Sized> {
    source: &'a S,
    current_tx: &'a str,
}

impl<'a, S: ResultSource + ?Sized> ReferenceResolver<'a, S> {
    /// `current_tx` anchors short-form references
    pub fn new(source: &'a S, current_tx: &'a str) -> Self {
        Self { source, current_tx }
    }

    /// Resolve every placeholder in one string value.
    ///
    /// A string that is exactly one placeholder takes the referenced value's
    /// native type; otherwise placeholders are rendered into the text.
    pub fn resolve_str(&self, input: &str) -> Result<Value, ReferenceError> {
        let segments = Lexer::new(input).tokenize();

        if let [Segment::Placeholder(reference)] = segments.as_slice() {
            return self.resolve_reference(reference);
        }
        if !segments
            .iter()
            .any(|segment| matches!(segment, Segment::Placeholder(_)))
        {
            return Ok(Value::String(input.to_string()));
        }

        let mut out = String::with_capacity(input.len());
        for segment in &segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(reference) => {
                    out.push_str(&render(&self.resolve_reference(reference)?))
                }
            }
        }
        Ok(Value::String(out))
    }

    pub fn resolve_reference(&self, reference: &Reference) -> Result<Value, ReferenceError> {
        let target = reference.target(self.current_tx);
        let data = match self.source.lookup(&target) {
            Lookup::Ready(data) => data,
            Lookup::NotSatisfied(state) => {
                return Err(ReferenceError::DependencyNotSatisfied {
                    reference: reference.to_string(),
                    target: target.to_string(),
                    state: state.to_string(),
                })
            }
            Lookup::Unknown => {
                return Err(ReferenceError::Unresolved {
                    reference: reference.to_string(),
                    target: target.to_string(),
                })
            }
        };

        walk_path(&data, &reference.path)
            .cloned()
            .ok_or_else(|| ReferenceError::InvalidPath {
                reference: reference.to_string(),
                target: target.to_string(),
                path: reference.path_string(),
            })
    }
}

/// Follow `path` into `value`; numeric field names index into arrays
pub fn walk_path<'v>(value: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| match (segment, current) {
        (PathSegment::Field(name), Value::Object(map)) => map.get(name),
        (PathSegment::Field(name), Value::Array(items)) => {
            name.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
        _ => None,
    })
}

/// Text form used for placeholders embedded in a larger string
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
