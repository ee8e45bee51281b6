//! Object graph tracking for Interject subjects.
//!
//! Layers on `interject-core`: the reference-counted registry and lifecycle
//! engine, parent tracking, the change observable with buffered streams,
//! derived-property dependency tracking, and the preset that wires them all
//! into a context.

pub mod changes;
pub mod derived;
pub mod interceptors;
pub mod parents;
pub mod preset;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use changes::{
    property_changes, BufferedChanges, ChangeObserver, ChangeStream, PropertyChange,
    DEFAULT_CHANGE_CAPACITY,
};
pub use derived::{DerivedTracker, RecordingScope};
pub use interceptors::{EqualityShortCircuit, GraphMaintenance};
pub use parents::ParentTracker;
pub use preset::{install_tracking, tracking_context};
pub use registry::{
    collect_subject_refs, dispatch_events, Index, LifecycleEvent, LifecycleObserver,
    RegisteredSubject, SubjectParent, SubjectRegistry,
};
