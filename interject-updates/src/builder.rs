//! Building `SubjectUpdate` trees from change batches.
//!
//! Changes are grouped by subject identity; subject-valued properties carry
//! identifiers, and every subject newly referenced by the batch is embedded
//! with its full state (depth-first, visited set). Identifiers are uuids
//! assigned once per subject and stored in the subject's scratch map so they
//! stay stable across updates.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use interject_core::subject::{DataKey, PropertyMetadata, PropertyReference, SubjectHandle};
use interject_core::value::{PropertyKind, Value};
use interject_tracking::{collect_subject_refs, PropertyChange};

use crate::processor::SubjectUpdateProcessor;
use crate::update::{SubjectPropertyUpdate, SubjectUpdate};

const UPDATE_ID_KEY: DataKey = (None, "update.id");

/// The stable update identifier of a subject, assigned on first use.
pub fn subject_id(subject: &SubjectHandle) -> String {
    subject
        .state()
        .update_data::<String>(UPDATE_ID_KEY, |previous| {
            previous.unwrap_or_else(|| Arc::new(Uuid::new_v4().to_string()))
        });
    subject
        .state()
        .get_data::<String>(UPDATE_ID_KEY)
        .map(|id| (*id).clone())
        .expect("subject id just assigned")
}

/// Bind a subject to an identifier chosen by the far side.
pub(crate) fn assign_subject_id(subject: &SubjectHandle, id: &str) {
    subject
        .state()
        .set_data(UPDATE_ID_KEY, Arc::new(id.to_string()));
}

/// Translate one property value into its update payload without recursing
/// into referenced subjects.
pub fn shallow_update(meta: Option<&PropertyMetadata>, value: &Value) -> SubjectPropertyUpdate {
    match value {
        Value::Subject(subject) => SubjectPropertyUpdate::reference(Some(subject_id(subject))),
        Value::Null if meta.map(|m| m.kind) == Some(PropertyKind::Subject) => {
            SubjectPropertyUpdate::reference(None)
        }
        Value::List(items) if !items.is_empty() && items.iter().all(|i| i.as_subject().is_some()) => {
            SubjectPropertyUpdate::List {
                ids: items
                    .iter()
                    .filter_map(|i| i.as_subject().map(subject_id))
                    .collect(),
                attributes: None,
            }
        }
        Value::Map(entries)
            if !entries.is_empty() && entries.values().all(|v| v.as_subject().is_some()) =>
        {
            SubjectPropertyUpdate::Dict {
                entries: entries
                    .iter()
                    .filter_map(|(k, v)| v.as_subject().map(|s| (k.clone(), subject_id(s))))
                    .collect(),
                attributes: None,
            }
        }
        other => SubjectPropertyUpdate::value(other.to_json().unwrap_or(serde_json::Value::Null)),
    }
}

/// Build an update tree from a change batch.
pub fn build_update(
    root: &SubjectHandle,
    changes: &[PropertyChange],
    processors: &[Arc<dyn SubjectUpdateProcessor>],
) -> SubjectUpdate {
    let mut update = SubjectUpdate::new(subject_id(root));
    let mut visited: HashSet<SubjectHandle> = HashSet::new();
    // Subjects already mentioned in the batch do not need their full state.
    for change in changes {
        visited.insert(change.reference.subject.clone());
    }

    for change in changes {
        if !processors.iter().all(|p| p.is_included(&change.reference)) {
            continue;
        }
        let payload = shallow_update(change.reference.metadata(), &change.new_value);
        update.insert(
            subject_id(&change.reference.subject),
            change.reference.name,
            payload,
        );
        include_value_subjects(&change.new_value, &mut update, &mut visited, processors);
    }

    for processor in processors {
        update = processor.transform(update);
    }
    update
}

/// Embed the full state of every subject reachable through `value` that has
/// not been embedded yet.
fn include_value_subjects(
    value: &Value,
    update: &mut SubjectUpdate,
    visited: &mut HashSet<SubjectHandle>,
    processors: &[Arc<dyn SubjectUpdateProcessor>],
) {
    for (_, subject) in collect_subject_refs(value) {
        include_subject(&subject, update, visited, processors);
    }
}

fn include_subject(
    subject: &SubjectHandle,
    update: &mut SubjectUpdate,
    visited: &mut HashSet<SubjectHandle>,
    processors: &[Arc<dyn SubjectUpdateProcessor>],
) {
    if !visited.insert(subject.clone()) {
        return;
    }
    let id = subject_id(subject);
    let properties: Vec<(&'static str, Value)> = subject
        .descriptor()
        .properties()
        .filter_map(|meta| {
            let getter = meta.get.as_ref()?;
            match getter(subject) {
                Ok(value) => Some((meta.name, value)),
                Err(err) => {
                    tracing::warn!(subject = ?subject, property = meta.name, error = %err, "getter failed while embedding subject state");
                    None
                }
            }
        })
        .collect();

    for (name, value) in properties {
        let reference = PropertyReference::new(subject.clone(), name);
        if !processors.iter().all(|p| p.is_included(&reference)) {
            continue;
        }
        let payload = shallow_update(subject.descriptor().property(name), &value);
        update.insert(id.clone(), name, payload);
        include_value_subjects(&value, update, visited, processors);
    }
}
