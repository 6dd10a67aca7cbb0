//! Request-scoped context and the execution context handed to factories.
//!
//! [`Context`] holds at most one value per type.

use async_graphql_parser::types::{
    DocumentOperations, ExecutableDocument, OperationDefinition, OperationType,
};
use async_graphql_parser::Positioned;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::request::Request;

/// Values produced by the context factory, one per type.
///
/// ```
/// use gqlx_core::context::Context;
///
/// struct Viewer(&'static str);
///
/// let ctx = Context::new().with(Viewer("ada"));
/// assert_eq!(ctx.get::<Viewer>().map(|viewer| viewer.0), Some("ada"));
/// assert!(ctx.get::<String>().is_none());
/// ```
#[derive(Default)]
pub struct Context {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing an earlier value of the same type.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("values", &self.values.len()).finish_non_exhaustive()
    }
}

/// The kind of a GraphQL operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl From<OperationType> for OperationKind {
    fn from(ty: OperationType) -> Self {
        match ty {
            OperationType::Query => Self::Query,
            OperationType::Mutation => Self::Mutation,
            OperationType::Subscription => Self::Subscription,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        })
    }
}

/// The operation of a document chosen for execution.
#[derive(Debug, Clone)]
pub struct SelectedOperation {
    /// Name of the operation, `None` for an anonymous one.
    pub name: Option<String>,
    pub kind: OperationKind,
    pub definition: Positioned<OperationDefinition>,
}

/// Resolves the operation to execute.
///
/// With a name, the operation of that name is returned; an anonymous
/// operation never matches a name. Without one, the document must hold
/// exactly one operation.
pub fn select_operation(
    document: &ExecutableDocument,
    operation_name: Option<&str>,
) -> Option<SelectedOperation> {
    let (name, definition) = match (&document.operations, operation_name) {
        (DocumentOperations::Single(definition), None) => (None, definition),
        (DocumentOperations::Single(_), Some(_)) => return None,
        (DocumentOperations::Multiple(operations), Some(name)) => {
            let (name, definition) = operations.get_key_value(name)?;
            (Some(name.to_string()), definition)
        }
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => {
            let (name, definition) = operations.iter().next()?;
            (Some(name.to_string()), definition)
        }
        (DocumentOperations::Multiple(_), None) => return None,
    };

    Some(SelectedOperation {
        name,
        kind: definition.node.ty.into(),
        definition: definition.clone(),
    })
}

/// Everything known about a request once its operation is selected.
///
/// Handed by value to context and root value factories; cloning is cheap.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request: Arc<Request>,
    pub document: Arc<ExecutableDocument>,
    pub operation: Arc<SelectedOperation>,
    pub variables: Option<Arc<Map<String, Value>>>,
}
