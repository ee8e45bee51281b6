//! The object graph registry and lifecycle engine.
//!
//! The registry records every subject reachable from a context root through
//! property edges (scalar references, list elements, dictionary values),
//! maintains per-subject reference counts, and emits lifecycle events with
//! the ordering guarantees consumers rely on: within one write, all attaches
//! precede all detaches; attaches are depth-first pre-order, detaches
//! post-order. Internal cycles that lose their last external reference stay
//! attached — a documented limitation of pure reference counting.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use interject_core::context::{LifecycleInterceptor, SubjectContext};
use interject_core::subject::{PropertyReference, SubjectHandle};
use interject_core::value::Value;

/// Position of a subject reference inside a collection-valued property.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Index {
    Position(usize),
    Key(String),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Position(i) => write!(f, "[{i}]"),
            Index::Key(k) => write!(f, "[{k}]"),
        }
    }
}

/// One incoming reference: which parent property (and collection slot)
/// points at a subject.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectParent {
    pub reference: PropertyReference,
    pub index: Option<Index>,
}

/// Events emitted by the registry as the graph changes.
#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    /// A subject became reachable (ref-count 0 -> 1).
    Attached {
        subject: SubjectHandle,
        via: Option<SubjectParent>,
    },
    /// A subject became unreachable (ref-count reached 0).
    Detached {
        subject: SubjectHandle,
        via: Option<SubjectParent>,
    },
    /// An additional reference to an already-attached subject appeared.
    ReferenceAdded {
        subject: SubjectHandle,
        via: SubjectParent,
    },
    /// A reference to a still-attached subject disappeared.
    ReferenceRemoved {
        subject: SubjectHandle,
        via: SubjectParent,
    },
    /// A subject moved within a collection-valued property.
    IndexChanged {
        subject: SubjectHandle,
        property: PropertyReference,
        old_index: Option<Index>,
        new_index: Option<Index>,
    },
}

/// Consumer of registry lifecycle events. Registered as a context service;
/// handlers run synchronously after the registry tables are updated, and
/// must log their own failures rather than panic.
pub trait LifecycleObserver: Send + Sync + 'static {
    fn on_event(&self, event: &LifecycleEvent);
}

#[derive(Clone, Debug)]
struct Edge {
    property: &'static str,
    index: Option<Index>,
    child: SubjectHandle,
}

#[derive(Default)]
struct Entry {
    ref_count: usize,
    is_root: bool,
    children: Vec<Edge>,
    parents: Vec<SubjectParent>,
}

/// Read-only snapshot of one registry entry.
#[derive(Clone, Debug)]
pub struct RegisteredSubject {
    pub subject: SubjectHandle,
    pub ref_count: usize,
    pub is_root: bool,
    pub parents: Vec<SubjectParent>,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<SubjectHandle, Entry>,
}

/// The registry: a single lock over the graph tables. Event dispatch happens
/// after the lock is released, so handlers may re-enter the registry.
pub struct SubjectRegistry {
    tables: Mutex<Tables>,
}

impl SubjectRegistry {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Attach a subject as a direct context root and walk its property graph.
    pub fn attach_root(&self, subject: &SubjectHandle) -> Vec<LifecycleEvent> {
        let mut tables = self.tables.lock().expect("registry lock poisoned");
        let mut events = Vec::new();
        let mut visited = HashSet::new();

        let ref_count = {
            let entry = tables.entries.entry(subject.clone()).or_default();
            if entry.is_root {
                return events;
            }
            entry.is_root = true;
            entry.ref_count += 1;
            entry.ref_count
        };
        if ref_count == 1 {
            events.push(LifecycleEvent::Attached {
                subject: subject.clone(),
                via: None,
            });
            visited.insert(subject.clone());
            discover_children(&mut tables, subject, &mut events, &mut visited);
        }
        events
    }

    /// Force-detach a direct root: its ref-count drops to zero regardless of
    /// remaining incoming edges, and all downstream references unwind.
    pub fn detach_root(&self, subject: &SubjectHandle) -> Vec<LifecycleEvent> {
        let mut tables = self.tables.lock().expect("registry lock poisoned");
        let mut events = Vec::new();
        let mut detaching = HashSet::new();

        {
            let Some(entry) = tables.entries.get_mut(subject) else {
                return events;
            };
            if !entry.is_root {
                return events;
            }
            entry.is_root = false;
        }
        force_detach(&mut tables, subject, None, &mut events, &mut detaching);
        events
    }

    /// Reconcile the registry after a committed write replacing `old` with
    /// `new` on `reference`. Emits attaches, then index changes, then
    /// detaches.
    pub fn apply_write(
        &self,
        reference: &PropertyReference,
        old: &Value,
        new: &Value,
    ) -> Vec<LifecycleEvent> {
        let mut tables = self.tables.lock().expect("registry lock poisoned");
        let mut events = Vec::new();

        if !tables.entries.contains_key(&reference.subject) {
            // Writes on unregistered subjects are not tracked.
            return events;
        }

        let old_refs = collect_subject_refs(old);
        let new_refs = collect_subject_refs(new);

        let old_index_of = |subject: &SubjectHandle| {
            old_refs
                .iter()
                .find(|(_, s)| s == subject)
                .map(|(i, _)| i.clone())
        };
        let in_new = |subject: &SubjectHandle| new_refs.iter().any(|(_, s)| s == subject);

        // Phase 1: attaches, in the order the new value lists them.
        let mut visited = HashSet::new();
        for (index, child) in &new_refs {
            match old_index_of(child) {
                None => attach_edge(
                    &mut tables,
                    &reference.subject,
                    reference.name,
                    index.clone(),
                    child,
                    &mut events,
                    &mut visited,
                ),
                Some(_) => {}
            }
        }

        // Phase 2: index moves within the collection.
        for (new_index, child) in &new_refs {
            if let Some(old_index) = old_index_of(child) {
                if old_index != *new_index {
                    move_edge(
                        &mut tables,
                        reference,
                        child,
                        &old_index,
                        new_index,
                        &mut events,
                    );
                }
            }
        }

        // Phase 3: detaches, in the order the old value listed them.
        let mut detaching = HashSet::new();
        for (index, child) in &old_refs {
            if !in_new(child) {
                detach_edge(
                    &mut tables,
                    &reference.subject,
                    reference.name,
                    index,
                    child,
                    &mut events,
                    &mut detaching,
                );
            }
        }

        events
    }

    pub fn is_registered(&self, subject: &SubjectHandle) -> bool {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .contains_key(subject)
    }

    pub fn ref_count(&self, subject: &SubjectHandle) -> usize {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .get(subject)
            .map(|e| e.ref_count)
            .unwrap_or(0)
    }

    /// Incoming edges of a subject, as recorded in the registry.
    pub fn parents(&self, subject: &SubjectHandle) -> Vec<SubjectParent> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .get(subject)
            .map(|e| e.parents.clone())
            .unwrap_or_default()
    }

    /// Outgoing edges of a subject: `(property, index, child)` triples.
    pub fn children(
        &self,
        subject: &SubjectHandle,
    ) -> Vec<(&'static str, Option<Index>, SubjectHandle)> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .get(subject)
            .map(|e| {
                e.children
                    .iter()
                    .map(|edge| (edge.property, edge.index.clone(), edge.child.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct context roots.
    pub fn roots(&self) -> Vec<SubjectHandle> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .iter()
            .filter(|(_, e)| e.is_root)
            .map(|(s, _)| s.clone())
            .collect()
    }

    pub fn snapshot(&self, subject: &SubjectHandle) -> Option<RegisteredSubject> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .entries
            .get(subject)
            .map(|e| RegisteredSubject {
                subject: subject.clone(),
                ref_count: e.ref_count,
                is_root: e.is_root,
                parents: e.parents.clone(),
            })
    }
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver registry events to every [`LifecycleObserver`] on the context.
pub fn dispatch_events(context: &SubjectContext, events: &[LifecycleEvent]) {
    if events.is_empty() {
        return;
    }
    match context.get_services::<dyn LifecycleObserver>() {
        Ok(observers) => {
            for event in events {
                for observer in &observers {
                    observer.on_event(event);
                }
            }
        }
        Err(err) => tracing::error!(error = %err, "lifecycle observer resolution failed"),
    }
}

impl LifecycleInterceptor for SubjectRegistry {
    fn attach_to(&self, subject: &SubjectHandle, context: &SubjectContext) {
        let events = self.attach_root(subject);
        dispatch_events(context, &events);
    }

    fn detach_from(&self, subject: &SubjectHandle, context: &SubjectContext) {
        let events = self.detach_root(subject);
        dispatch_events(context, &events);
    }
}

/// Subjects reachable through one property value, with their collection
/// slots. Scalar references have no index; list elements and dictionary
/// values carry positions and keys.
pub fn collect_subject_refs(value: &Value) -> Vec<(Option<Index>, SubjectHandle)> {
    match value {
        Value::Subject(subject) => vec![(None, subject.clone())],
        Value::List(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                item.as_subject()
                    .map(|s| (Some(Index::Position(i)), s.clone()))
            })
            .collect(),
        Value::Map(entries) => entries
            .iter()
            .filter_map(|(key, item)| {
                item.as_subject()
                    .map(|s| (Some(Index::Key(key.clone())), s.clone()))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn discover_children(
    tables: &mut Tables,
    subject: &SubjectHandle,
    events: &mut Vec<LifecycleEvent>,
    visited: &mut HashSet<SubjectHandle>,
) {
    // Derived getters are skipped: they compute over other properties and do
    // not own references.
    let properties: Vec<_> = subject
        .descriptor()
        .properties()
        .filter(|p| p.get.is_some() && !p.derived)
        .map(|p| (p.name, p.get.clone().expect("filtered on get")))
        .collect();
    for (name, getter) in properties {
        let value = match getter(subject) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(subject = ?subject, property = name, error = %err, "getter failed during graph walk");
                continue;
            }
        };
        for (index, child) in collect_subject_refs(&value) {
            attach_edge(tables, subject, name, index, &child, events, visited);
        }
    }
}

fn attach_edge(
    tables: &mut Tables,
    parent: &SubjectHandle,
    property: &'static str,
    index: Option<Index>,
    child: &SubjectHandle,
    events: &mut Vec<LifecycleEvent>,
    visited: &mut HashSet<SubjectHandle>,
) {
    let via = SubjectParent {
        reference: PropertyReference::new(parent.clone(), property),
        index: index.clone(),
    };

    tables
        .entries
        .entry(parent.clone())
        .or_default()
        .children
        .push(Edge {
            property,
            index,
            child: child.clone(),
        });

    let ref_count = {
        let entry = tables.entries.entry(child.clone()).or_default();
        entry.parents.push(via.clone());
        entry.ref_count += 1;
        entry.ref_count
    };

    if ref_count == 1 {
        events.push(LifecycleEvent::Attached {
            subject: child.clone(),
            via: Some(via),
        });
        if visited.insert(child.clone()) {
            discover_children(tables, child, events, visited);
        }
    } else {
        events.push(LifecycleEvent::ReferenceAdded {
            subject: child.clone(),
            via,
        });
    }
}

fn detach_edge(
    tables: &mut Tables,
    parent: &SubjectHandle,
    property: &'static str,
    index: &Option<Index>,
    child: &SubjectHandle,
    events: &mut Vec<LifecycleEvent>,
    detaching: &mut HashSet<SubjectHandle>,
) {
    let via = SubjectParent {
        reference: PropertyReference::new(parent.clone(), property),
        index: index.clone(),
    };

    if let Some(parent_entry) = tables.entries.get_mut(parent) {
        if let Some(position) = parent_entry.children.iter().position(|edge| {
            edge.property == property && edge.index == *index && edge.child == *child
        }) {
            parent_entry.children.remove(position);
        }
    }

    let ref_count = {
        let Some(entry) = tables.entries.get_mut(child) else {
            return;
        };
        if let Some(position) = entry
            .parents
            .iter()
            .position(|p| p.reference == via.reference && p.index == via.index)
        {
            entry.parents.remove(position);
        }
        if entry.ref_count == 0 {
            // Back-edge into a subject already unwinding.
            return;
        }
        entry.ref_count -= 1;
        entry.ref_count
    };

    if ref_count == 0 {
        unwind_children(tables, child, events, detaching);
        events.push(LifecycleEvent::Detached {
            subject: child.clone(),
            via: Some(via),
        });
        tables.entries.remove(child);
    } else {
        events.push(LifecycleEvent::ReferenceRemoved {
            subject: child.clone(),
            via,
        });
    }
}

/// Detach every outgoing edge of a subject whose ref-count reached zero.
/// Children are processed before the subject's own detach event (post-order).
fn unwind_children(
    tables: &mut Tables,
    subject: &SubjectHandle,
    events: &mut Vec<LifecycleEvent>,
    detaching: &mut HashSet<SubjectHandle>,
) {
    if !detaching.insert(subject.clone()) {
        return;
    }
    let children: Vec<Edge> = tables
        .entries
        .get(subject)
        .map(|e| e.children.clone())
        .unwrap_or_default();
    for edge in children {
        detach_edge(
            tables,
            subject,
            edge.property,
            &edge.index,
            &edge.child,
            events,
            detaching,
        );
    }
}

fn force_detach(
    tables: &mut Tables,
    subject: &SubjectHandle,
    via: Option<SubjectParent>,
    events: &mut Vec<LifecycleEvent>,
    detaching: &mut HashSet<SubjectHandle>,
) {
    let Some(entry) = tables.entries.get_mut(subject) else {
        return;
    };
    entry.ref_count = 0;
    let parents = std::mem::take(&mut entry.parents);

    // Remove incoming edges so parents do not keep dangling children.
    for parent in &parents {
        if let Some(parent_entry) = tables.entries.get_mut(&parent.reference.subject) {
            parent_entry.children.retain(|edge| {
                !(edge.child == *subject
                    && edge.property == parent.reference.name
                    && edge.index == parent.index)
            });
        }
    }

    unwind_children(tables, subject, events, detaching);
    events.push(LifecycleEvent::Detached {
        subject: subject.clone(),
        via,
    });
    tables.entries.remove(subject);
}

fn move_edge(
    tables: &mut Tables,
    reference: &PropertyReference,
    child: &SubjectHandle,
    old_index: &Option<Index>,
    new_index: &Option<Index>,
    events: &mut Vec<LifecycleEvent>,
) {
    if let Some(parent_entry) = tables.entries.get_mut(&reference.subject) {
        if let Some(edge) = parent_entry.children.iter_mut().find(|edge| {
            edge.property == reference.name && edge.index == *old_index && edge.child == *child
        }) {
            edge.index = new_index.clone();
        }
    }
    if let Some(entry) = tables.entries.get_mut(child) {
        if let Some(parent) = entry
            .parents
            .iter_mut()
            .find(|p| p.reference == *reference && p.index == *old_index)
        {
            parent.index = new_index.clone();
        }
    }
    events.push(LifecycleEvent::IndexChanged {
        subject: child.clone(),
        property: reference.clone(),
        old_index: old_index.clone(),
        new_index: new_index.clone(),
    });
}
