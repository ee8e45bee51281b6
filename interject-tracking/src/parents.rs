//! Parent tracking: per-subject immutable snapshots of incoming references.
//!
//! The tracker is a lifecycle observer fed by the registry. Snapshots live
//! in the subject's scratch data map so enumeration never takes a lock.

use std::sync::Arc;

use interject_core::subject::{DataKey, SubjectHandle};

use crate::registry::{LifecycleEvent, LifecycleObserver, SubjectParent};

const PARENTS_KEY: DataKey = (None, "parents");

/// Maintains the set of `(parent-subject, property, index)` references
/// pointing at each subject.
pub struct ParentTracker;

impl ParentTracker {
    pub fn new() -> Self {
        Self
    }

    /// Ordered snapshot of the subject's incoming references.
    pub fn parents(subject: &SubjectHandle) -> Arc<Vec<SubjectParent>> {
        subject
            .state()
            .get_data::<Vec<SubjectParent>>(PARENTS_KEY)
            .unwrap_or_default()
    }

    /// Every root-to-subject path. Finite: cycles are broken at repeated
    /// subjects. Each path lists the parent references from the root down to
    /// the subject itself.
    pub fn for_all_paths(subject: &SubjectHandle) -> Vec<Vec<SubjectParent>> {
        let mut paths = Vec::new();
        let mut trail = Vec::new();
        let mut visiting = vec![subject.clone()];
        collect_paths(subject, &mut trail, &mut visiting, &mut paths);
        paths
    }

    fn add(subject: &SubjectHandle, parent: SubjectParent) {
        subject
            .state()
            .update_data::<Vec<SubjectParent>>(PARENTS_KEY, |previous| {
                let mut parents = previous.map(|p| (*p).clone()).unwrap_or_default();
                parents.push(parent);
                Arc::new(parents)
            });
    }

    fn remove(subject: &SubjectHandle, parent: &SubjectParent) {
        subject
            .state()
            .update_data::<Vec<SubjectParent>>(PARENTS_KEY, |previous| {
                let mut parents = previous.map(|p| (*p).clone()).unwrap_or_default();
                if let Some(position) = parents.iter().position(|p| p == parent) {
                    parents.remove(position);
                }
                Arc::new(parents)
            });
    }
}

impl Default for ParentTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_paths(
    subject: &SubjectHandle,
    trail: &mut Vec<SubjectParent>,
    visiting: &mut Vec<SubjectHandle>,
    paths: &mut Vec<Vec<SubjectParent>>,
) {
    let parents = ParentTracker::parents(subject);
    if parents.is_empty() {
        let mut path: Vec<SubjectParent> = trail.clone();
        path.reverse();
        paths.push(path);
        return;
    }
    for parent in parents.iter() {
        let parent_subject = parent.reference.subject.clone();
        if visiting.contains(&parent_subject) {
            continue;
        }
        trail.push(parent.clone());
        visiting.push(parent_subject.clone());
        collect_paths(&parent_subject, trail, visiting, paths);
        visiting.pop();
        trail.pop();
    }
}

impl LifecycleObserver for ParentTracker {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Attached {
                subject,
                via: Some(via),
            } => Self::add(subject, via.clone()),
            LifecycleEvent::ReferenceAdded { subject, via } => Self::add(subject, via.clone()),
            LifecycleEvent::ReferenceRemoved { subject, via } => Self::remove(subject, via),
            LifecycleEvent::Detached { subject, .. } => {
                subject.state().remove_data(PARENTS_KEY);
            }
            LifecycleEvent::IndexChanged {
                subject,
                property,
                old_index,
                new_index,
            } => {
                subject
                    .state()
                    .update_data::<Vec<SubjectParent>>(PARENTS_KEY, |previous| {
                        let mut parents = previous.map(|p| (*p).clone()).unwrap_or_default();
                        if let Some(entry) = parents
                            .iter_mut()
                            .find(|p| p.reference == *property && p.index == *old_index)
                        {
                            entry.index = new_index.clone();
                        }
                        Arc::new(parents)
                    });
            }
            LifecycleEvent::Attached { via: None, .. } => {}
        }
    }
}
