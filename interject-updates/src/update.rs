//! The wire-format-neutral tree-diff model exchanged with sources.
//!
//! A [`SubjectUpdate`] describes a subset of the subject graph: a root
//! identifier plus, per subject, the properties that changed (or the full
//! state for newly included subjects). Identifiers are only meaningful
//! within one update tree and the session exchanging it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute updates for one property, keyed by attribute name.
pub type AttributeUpdates = BTreeMap<String, serde_json::Value>;

/// Update payload for one property.
///
/// Serialized with a `kind` tag:
/// `{"kind":"value"|"ref"|"list"|"dict"|"attrs", ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubjectPropertyUpdate {
    /// A scalar JSON-like value.
    Value {
        value: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeUpdates>,
    },
    /// A reference to another subject in the same update; `None` clears it.
    Ref {
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeUpdates>,
    },
    /// An ordered collection of subject references.
    List {
        ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeUpdates>,
    },
    /// A string-keyed dictionary of subject references.
    Dict {
        entries: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeUpdates>,
    },
    /// Attribute updates only; the property value is untouched.
    Attrs { attributes: AttributeUpdates },
}

impl SubjectPropertyUpdate {
    pub fn value(value: serde_json::Value) -> Self {
        SubjectPropertyUpdate::Value {
            value,
            attributes: None,
        }
    }

    pub fn reference(id: Option<String>) -> Self {
        SubjectPropertyUpdate::Ref {
            id,
            attributes: None,
        }
    }
}

/// All property updates for one subject.
pub type SubjectStateUpdate = BTreeMap<String, SubjectPropertyUpdate>;

/// A tree of subject updates rooted at `root`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectUpdate {
    pub root: String,
    pub subjects: BTreeMap<String, SubjectStateUpdate>,
}

impl SubjectUpdate {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            subjects: BTreeMap::new(),
        }
    }

    /// The property entries recorded for one subject identifier.
    pub fn subject(&self, id: &str) -> Option<&SubjectStateUpdate> {
        self.subjects.get(id)
    }

    pub fn insert(
        &mut self,
        id: impl Into<String>,
        property: impl Into<String>,
        update: SubjectPropertyUpdate,
    ) -> &mut Self {
        self.subjects
            .entry(id.into())
            .or_default()
            .insert(property.into(), update);
        self
    }
}
