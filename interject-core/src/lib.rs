//! Core runtime for the Interject reactive subject framework.
//!
//! Subjects are user objects whose property reads, writes, and method
//! invocations flow through configurable interceptor chains. This crate
//! holds the pieces everything else builds on: the dynamic [`Value`] model,
//! the subject contract, the hierarchical [`SubjectContext`] service
//! container, the pipeline machinery, origin tokens, and transactions.
//!
//! Graph tracking, validation, updates, and connectors live in the sibling
//! crates layered on top.

pub mod context;
pub mod error;
pub mod ordering;
pub mod origin;
pub mod pipeline;
pub mod subject;
pub mod transaction;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{LifecycleInterceptor, SubjectContext};
pub use error::{ConfigurationError, SourceError, SubjectError, ValidationFailure};
pub use ordering::Placement;
pub use origin::{current_origin, OriginScope, OriginToken};
pub use pipeline::{
    invoke_method, read_property, write_property, MethodContext, MethodInterceptor, MethodNext,
    ReadContext, ReadInterceptor, ReadNext, WriteContext, WriteInterceptor, WriteNext,
};
pub use subject::{
    DataKey, Getter, InterceptorCollection, InterceptorSubject, PropertyAttribute,
    PropertyMetadata, PropertyReference, Setter, SubjectDescriptor, SubjectHandle, SubjectState,
};
pub use transaction::{ConflictBehavior, SubjectTransaction, TransactionMode};
pub use value::{PropertyKind, Value};
