//! Applying `SubjectUpdate` trees to the local subject graph.
//!
//! Writes flow through the normal interceptor pipeline, so tracking,
//! validation, and change events all see inbound updates. Per-property
//! failures are collected as wire failures instead of aborting the whole
//! update; the caller decides whether to report them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use interject_core::context::SubjectContext;
use interject_core::pipeline::write_property;
use interject_core::subject::{PropertyMetadata, SubjectHandle};
use interject_core::value::Value;
use interject_tracking::collect_subject_refs;

use crate::builder::{assign_subject_id, subject_id};
use crate::update::{SubjectPropertyUpdate, SubjectUpdate};
use crate::ws::{ErrorCode, WireFailure};

/// Creates subject instances for inbound references that do not resolve to
/// an existing subject. Registered as a context service.
pub trait SubjectFactory: Send + Sync + 'static {
    /// A fresh, detached subject suitable for the given property, or `None`
    /// when the property's type is not constructible.
    fn create(&self, property: &PropertyMetadata) -> Option<SubjectHandle>;
}

const ATTRIBUTES_KEY_NAME: &str = "source.attributes";

/// Attribute updates last received for a property, if any.
pub fn received_attributes(
    subject: &SubjectHandle,
    property: &'static str,
) -> Option<Arc<BTreeMap<String, serde_json::Value>>> {
    subject
        .state()
        .get_data::<BTreeMap<String, serde_json::Value>>((Some(property), ATTRIBUTES_KEY_NAME))
}

/// Apply an update tree to the graph rooted at `root`.
pub fn apply_update(
    context: &SubjectContext,
    root: &SubjectHandle,
    update: &SubjectUpdate,
) -> Vec<WireFailure> {
    let factory = context.try_get_service::<dyn SubjectFactory>();
    let mut failures = Vec::new();
    let mut id_map: HashMap<String, SubjectHandle> = HashMap::new();
    id_map.insert(update.root.clone(), root.clone());
    let mut applied: HashSet<String> = HashSet::new();

    apply_subject(
        update,
        &update.root,
        &mut id_map,
        factory.as_deref(),
        &mut failures,
        &mut applied,
    );
    failures
}

fn failure(path: &str, code: ErrorCode, message: impl Into<String>) -> WireFailure {
    WireFailure {
        path: path.to_string(),
        code,
        message: message.into(),
    }
}

fn apply_subject(
    update: &SubjectUpdate,
    id: &str,
    id_map: &mut HashMap<String, SubjectHandle>,
    factory: Option<&dyn SubjectFactory>,
    failures: &mut Vec<WireFailure>,
    applied: &mut HashSet<String>,
) {
    if !applied.insert(id.to_string()) {
        return;
    }
    let Some(subject) = id_map.get(id).cloned() else {
        failures.push(failure(
            id,
            ErrorCode::SubjectNotFound,
            "identifier does not resolve to a subject",
        ));
        return;
    };
    let Some(properties) = update.subject(id) else {
        return;
    };

    for (name, property_update) in properties {
        let Some(meta) = subject.descriptor().property(name) else {
            failures.push(failure(
                name,
                ErrorCode::PropertyNotFound,
                format!("{} has no property '{name}'", subject.type_name()),
            ));
            continue;
        };
        let meta = meta.clone();

        match property_update {
            SubjectPropertyUpdate::Value { value, .. } => {
                if let Err(err) = write_property(&subject, meta.name, Value::from_json(value)) {
                    failures.push(failure(
                        name,
                        ErrorCode::from_subject_error(&err),
                        err.to_string(),
                    ));
                }
            }
            SubjectPropertyUpdate::Ref {
                id: child_id, ..
            } => match child_id {
                None => {
                    if let Err(err) = write_property(&subject, meta.name, Value::Null) {
                        failures.push(failure(
                            name,
                            ErrorCode::from_subject_error(&err),
                            err.to_string(),
                        ));
                    }
                }
                Some(child_id) => {
                    let Some(child) = resolve_child(&subject, &meta, child_id, id_map, factory)
                    else {
                        failures.push(failure(
                            name,
                            ErrorCode::SubjectNotFound,
                            format!("no subject for identifier '{child_id}'"),
                        ));
                        continue;
                    };
                    match write_property(&subject, meta.name, Value::Subject(child)) {
                        Ok(()) => apply_subject(update, child_id, id_map, factory, failures, applied),
                        Err(err) => failures.push(failure(
                            name,
                            ErrorCode::from_subject_error(&err),
                            err.to_string(),
                        )),
                    }
                }
            },
            SubjectPropertyUpdate::List { ids, .. } => {
                let mut items = Vec::with_capacity(ids.len());
                let mut resolved = true;
                for child_id in ids {
                    match resolve_child(&subject, &meta, child_id, id_map, factory) {
                        Some(child) => items.push(Value::Subject(child)),
                        None => {
                            failures.push(failure(
                                name,
                                ErrorCode::SubjectNotFound,
                                format!("no subject for identifier '{child_id}'"),
                            ));
                            resolved = false;
                        }
                    }
                }
                if !resolved {
                    continue;
                }
                match write_property(&subject, meta.name, Value::List(items)) {
                    Ok(()) => {
                        for child_id in ids {
                            apply_subject(update, child_id, id_map, factory, failures, applied);
                        }
                    }
                    Err(err) => failures.push(failure(
                        name,
                        ErrorCode::from_subject_error(&err),
                        err.to_string(),
                    )),
                }
            }
            SubjectPropertyUpdate::Dict { entries, .. } => {
                let mut map = BTreeMap::new();
                let mut resolved = true;
                for (key, child_id) in entries {
                    match resolve_child(&subject, &meta, child_id, id_map, factory) {
                        Some(child) => {
                            map.insert(key.clone(), Value::Subject(child));
                        }
                        None => {
                            failures.push(failure(
                                name,
                                ErrorCode::SubjectNotFound,
                                format!("no subject for identifier '{child_id}'"),
                            ));
                            resolved = false;
                        }
                    }
                }
                if !resolved {
                    continue;
                }
                match write_property(&subject, meta.name, Value::Map(map)) {
                    Ok(()) => {
                        for child_id in entries.values() {
                            apply_subject(update, child_id, id_map, factory, failures, applied);
                        }
                    }
                    Err(err) => failures.push(failure(
                        name,
                        ErrorCode::from_subject_error(&err),
                        err.to_string(),
                    )),
                }
            }
            SubjectPropertyUpdate::Attrs { attributes } => {
                subject.state().set_data(
                    (Some(meta.name), ATTRIBUTES_KEY_NAME),
                    Arc::new(attributes.clone()),
                );
            }
        }
    }
}

/// Resolve a child identifier: previously seen in this update, already bound
/// to a subject in the current property value, or freshly created through
/// the [`SubjectFactory`].
fn resolve_child(
    parent: &SubjectHandle,
    meta: &PropertyMetadata,
    child_id: &str,
    id_map: &mut HashMap<String, SubjectHandle>,
    factory: Option<&dyn SubjectFactory>,
) -> Option<SubjectHandle> {
    if let Some(existing) = id_map.get(child_id) {
        return Some(existing.clone());
    }
    if let Some(getter) = &meta.get {
        if let Ok(value) = getter(parent) {
            for (_, candidate) in collect_subject_refs(&value) {
                if subject_id(&candidate) == child_id {
                    id_map.insert(child_id.to_string(), candidate.clone());
                    return Some(candidate);
                }
            }
        }
    }
    if let Some(factory) = factory {
        if let Some(created) = factory.create(meta) {
            assign_subject_id(&created, child_id);
            id_map.insert(child_id.to_string(), created.clone());
            return Some(created);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Machine;
    use interject_core::pipeline::read_property;

    struct MachineFactory;

    impl SubjectFactory for MachineFactory {
        fn create(&self, _property: &PropertyMetadata) -> Option<SubjectHandle> {
            Some(Machine::create(""))
        }
    }

    fn context_with_factory() -> SubjectContext {
        let context = SubjectContext::new();
        context.with_service::<dyn SubjectFactory>(|_| Arc::new(MachineFactory));
        context
    }

    #[test]
    fn scalar_updates_write_through_the_pipeline() {
        let context = context_with_factory();
        let root = Machine::create("m");
        root.set_context(Some(&context));

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("press")),
        );

        let failures = apply_update(&context, &root, &update);
        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(read_property(&root, "Label").unwrap(), Value::from("press"));
    }

    #[test]
    fn unknown_identifiers_create_subjects_via_the_factory() {
        let context = context_with_factory();
        let root = Machine::create("m");
        root.set_context(Some(&context));

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Head",
            SubjectPropertyUpdate::reference(Some("h1".into())),
        );
        update.insert(
            "h1",
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("drill-head")),
        );

        let failures = apply_update(&context, &root, &update);
        assert!(failures.is_empty(), "{failures:?}");

        let head = read_property(&root, "Head").unwrap();
        let head = head.as_subject().unwrap();
        assert_eq!(subject_id(head), "h1");
        assert_eq!(
            read_property(head, "Label").unwrap(),
            Value::from("drill-head")
        );
    }

    #[test]
    fn existing_subjects_are_reused_by_identifier() {
        let context = context_with_factory();
        let root = Machine::create("m");
        let head = Machine::create("head");
        root.set_context(Some(&context));
        write_property(&root, "Head", Value::Subject(head.clone())).unwrap();

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Head",
            SubjectPropertyUpdate::reference(Some(subject_id(&head))),
        );
        update.insert(
            subject_id(&head),
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("renamed")),
        );

        let failures = apply_update(&context, &root, &update);
        assert!(failures.is_empty(), "{failures:?}");
        // The existing instance was updated, not replaced.
        let current = read_property(&root, "Head").unwrap();
        assert_eq!(current.as_subject().unwrap(), &head);
        assert_eq!(read_property(&head, "Label").unwrap(), Value::from("renamed"));
    }

    #[test]
    fn unknown_properties_collect_failures_and_continue() {
        let context = context_with_factory();
        let root = Machine::create("m");
        root.set_context(Some(&context));

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Bogus",
            SubjectPropertyUpdate::value(serde_json::json!(1)),
        );
        update.insert(
            subject_id(&root),
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("still applied")),
        );

        let failures = apply_update(&context, &root, &update);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].code, ErrorCode::PropertyNotFound);
        assert_eq!(
            read_property(&root, "Label").unwrap(),
            Value::from("still applied")
        );
    }

    #[test]
    fn attribute_updates_are_stored_on_the_subject() {
        let context = context_with_factory();
        let root = Machine::create("m");
        root.set_context(Some(&context));

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Speed",
            SubjectPropertyUpdate::Attrs {
                attributes: BTreeMap::from([("unit".to_string(), serde_json::json!("m/s"))]),
            },
        );

        let failures = apply_update(&context, &root, &update);
        assert!(failures.is_empty(), "{failures:?}");
        let attributes = received_attributes(&root, "Speed").unwrap();
        assert_eq!(attributes.get("unit"), Some(&serde_json::json!("m/s")));
    }

    #[test]
    fn subject_lists_resolve_and_recurse() {
        let context = context_with_factory();
        let root = Machine::create("m");
        root.set_context(Some(&context));

        let mut update = SubjectUpdate::new(subject_id(&root));
        update.insert(
            subject_id(&root),
            "Parts",
            SubjectPropertyUpdate::List {
                ids: vec!["p1".into(), "p2".into()],
                attributes: None,
            },
        );
        update.insert(
            "p1",
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("first")),
        );
        update.insert(
            "p2",
            "Label",
            SubjectPropertyUpdate::value(serde_json::json!("second")),
        );

        let failures = apply_update(&context, &root, &update);
        assert!(failures.is_empty(), "{failures:?}");

        let parts = read_property(&root, "Parts").unwrap();
        let Value::List(items) = parts else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(
            read_property(items[0].as_subject().unwrap(), "Label").unwrap(),
            Value::from("first")
        );
        assert_eq!(
            read_property(items[1].as_subject().unwrap(), "Label").unwrap(),
            Value::from("second")
        );
    }
}
