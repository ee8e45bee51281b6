//! Interject — an in-process reactive subject framework.
//!
//! Subjects expose intercepted properties whose reads, writes, and method
//! invocations flow through configurable middleware chains. Their
//! composition into a dynamic object graph is tracked so that external
//! sources (wire protocols, validators, mirrors) can synchronize state in
//! both directions without losing updates across reconnects.
//!
//! This facade crate re-exports the sub-crates through a single dependency:
//!
//! ```ignore
//! use interject::prelude::*;
//!
//! let context = interject::full_tracking_context();
//! let person = Person::create();
//! person.set_context(Some(&context));
//! write_property(&person, "FirstName", "Rico")?;
//! ```

pub extern crate interject_core;
pub extern crate interject_sources;
pub extern crate interject_tracking;
pub extern crate interject_updates;
pub extern crate interject_validation;

use std::sync::Arc;

use interject_core::context::SubjectContext;
use interject_core::ordering::Placement;
use interject_core::pipeline::WriteInterceptor;
use interject_validation::ValidationInterceptor;

/// A context with the full default interceptor chain installed:
/// equality short-circuit, lifecycle graph maintenance, parent tracking,
/// change observable, derived-dependency tracking, and — after any user
/// interceptors — validation.
pub fn full_tracking_context() -> SubjectContext {
    let context = interject_tracking::tracking_context();
    context.with_service_placed::<dyn WriteInterceptor>(
        Placement::last().tagged::<ValidationInterceptor>(),
        |_| Arc::new(ValidationInterceptor),
    );
    context
}

/// Initialise the global `tracing` subscriber from `RUST_LOG`, defaulting to
/// `info`. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub mod prelude {
    //! Re-exports of the most commonly used types.

    pub use interject_core::{
        invoke_method, read_property, write_property, ConfigurationError, ConflictBehavior,
        InterceptorSubject, LifecycleInterceptor, MethodContext, MethodInterceptor, OriginToken,
        Placement, PropertyAttribute, PropertyKind, PropertyMetadata, PropertyReference,
        ReadContext, ReadInterceptor, SourceError, SubjectContext, SubjectDescriptor,
        SubjectError, SubjectHandle, SubjectState, TransactionMode, ValidationFailure, Value,
        WriteContext, WriteInterceptor,
    };
    pub use interject_sources::{
        ConnectorOptions, ConnectorStatus, PathUpdate, Source, SourceConnector,
    };
    pub use interject_tracking::{
        property_changes, ChangeObserver, ChangeStream, DerivedTracker, Index, LifecycleEvent,
        LifecycleObserver, ParentTracker, PropertyChange, SubjectParent, SubjectRegistry,
    };
    pub use interject_updates::{
        apply_update, build_update, subject_id, PathProvider, SegmentedPathProvider,
        SubjectFactory, SubjectPropertyUpdate, SubjectUpdate, SubjectUpdateProcessor, WsEnvelope,
    };
    pub use interject_validation::{PropertyValidator, ValidationInterceptor};

    pub use crate::{full_tracking_context, init_tracing};
}
