//! `SubjectUpdate` tree-diffs, path resolution, and the wire envelope codec.
//!
//! This crate is the marshaling layer between the tracked subject graph and
//! external sources: building update trees from change batches, applying
//! inbound trees through the normal write pipeline, mapping property
//! references to segmented paths, and framing updates for the WebSocket
//! envelope format.

pub mod apply;
pub mod builder;
pub mod paths;
pub mod processor;
pub mod update;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use apply::{apply_update, received_attributes, SubjectFactory};
pub use builder::{build_update, shallow_update, subject_id};
pub use paths::{PathProvider, SegmentedPathProvider};
pub use processor::{CamelCasePropertyNames, ExcludeProperties, SubjectUpdateProcessor};
pub use update::{AttributeUpdates, SubjectPropertyUpdate, SubjectStateUpdate, SubjectUpdate};
pub use ws::{decode, encode, ErrorCode, WireFailure, WsCodecError, WsEnvelope};
