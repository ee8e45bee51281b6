//! Derived-property dependency tracking.
//!
//! A derived property is getter-only and computes over other properties.
//! When a subject attaches, each derived getter runs inside a thread-local
//! recording scope; every property read during the evaluation becomes a
//! dependency. Writes then consult the reverse "used-by" index, re-evaluate
//! affected derived properties, and publish synthetic changes when the
//! cached value moved.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use interject_core::error::SubjectError;
use interject_core::pipeline::{
    read_property, ReadContext, ReadInterceptor, ReadNext, WriteContext, WriteInterceptor,
    WriteNext,
};
use interject_core::subject::{DataKey, PropertyReference, SubjectHandle};
use interject_core::value::Value;

use crate::changes::{ChangeObserver, PropertyChange};
use crate::registry::{LifecycleEvent, LifecycleObserver};

const CACHE_KEY_NAME: &str = "derived.value";

thread_local! {
    static SCOPES: RefCell<Vec<Rc<RefCell<HashSet<PropertyReference>>>>> =
        const { RefCell::new(Vec::new()) };
}

/// A thread-local recording scope. Reads performed while the scope is alive
/// are recorded into it (and into every enclosing scope on the stack).
pub struct RecordingScope {
    set: Rc<RefCell<HashSet<PropertyReference>>>,
}

impl RecordingScope {
    pub fn enter() -> Self {
        let set = Rc::new(RefCell::new(HashSet::new()));
        SCOPES.with(|stack| stack.borrow_mut().push(set.clone()));
        Self { set }
    }

    /// Stop recording and return the collected references.
    pub fn finish(self) -> HashSet<PropertyReference> {
        self.set.borrow().clone()
    }
}

impl Drop for RecordingScope {
    fn drop(&mut self) {
        SCOPES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Record a read into all scopes active on the current thread.
pub(crate) fn record_read(reference: &PropertyReference) {
    SCOPES.with(|stack| {
        for scope in stack.borrow().iter() {
            scope.borrow_mut().insert(reference.clone());
        }
    });
}

#[derive(Default)]
struct DependencyTables {
    /// derived property -> properties its getter touched
    dependencies: HashMap<PropertyReference, HashSet<PropertyReference>>,
    /// property -> derived properties whose getters touched it
    used_by: HashMap<PropertyReference, HashSet<PropertyReference>>,
}

impl DependencyTables {
    fn replace(&mut self, derived: &PropertyReference, deps: HashSet<PropertyReference>) {
        if let Some(previous) = self.dependencies.remove(derived) {
            for dep in previous {
                if let Some(users) = self.used_by.get_mut(&dep) {
                    users.remove(derived);
                    if users.is_empty() {
                        self.used_by.remove(&dep);
                    }
                }
            }
        }
        for dep in &deps {
            self.used_by
                .entry(dep.clone())
                .or_default()
                .insert(derived.clone());
        }
        self.dependencies.insert(derived.clone(), deps);
    }

    fn forget_subject(&mut self, subject: &SubjectHandle) {
        let derived_of_subject: Vec<PropertyReference> = self
            .dependencies
            .keys()
            .filter(|d| d.subject == *subject)
            .cloned()
            .collect();
        for derived in derived_of_subject {
            self.replace(&derived, HashSet::new());
            self.dependencies.remove(&derived);
        }
        self.used_by.retain(|dep, _| dep.subject != *subject);
    }
}

/// Tracks derived-property dependencies and refreshes derived values on
/// writes. Registered as read interceptor, write interceptor, and lifecycle
/// observer by the tracking preset.
pub struct DerivedTracker {
    tables: Mutex<DependencyTables>,
}

impl DerivedTracker {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(DependencyTables::default()),
        }
    }

    /// The dependency set recorded for a derived property.
    pub fn dependencies(&self, derived: &PropertyReference) -> HashSet<PropertyReference> {
        self.tables
            .lock()
            .expect("dependency lock poisoned")
            .dependencies
            .get(derived)
            .cloned()
            .unwrap_or_default()
    }

    /// The derived properties whose getters touched `property`.
    pub fn used_by(&self, property: &PropertyReference) -> HashSet<PropertyReference> {
        self.tables
            .lock()
            .expect("dependency lock poisoned")
            .used_by
            .get(property)
            .cloned()
            .unwrap_or_default()
    }

    fn cache_key(derived: &PropertyReference) -> DataKey {
        (Some(derived.name), CACHE_KEY_NAME)
    }

    /// Evaluate one derived property inside a recording scope, store its
    /// cached value and refreshed dependency set, and return
    /// `(old, new)` when the value changed.
    fn evaluate(&self, derived: &PropertyReference) -> Option<(Value, Value)> {
        let scope = RecordingScope::enter();
        let value = match read_property(&derived.subject, derived.name) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(property = %derived, error = %err, "derived getter failed");
                drop(scope);
                return None;
            }
        };
        let mut deps = scope.finish();
        deps.remove(derived);

        self.tables
            .lock()
            .expect("dependency lock poisoned")
            .replace(derived, deps);

        let key = Self::cache_key(derived);
        let previous = derived.subject.state().get_data::<Value>(key);
        derived
            .subject
            .state()
            .set_data(key, Arc::new(value.clone()));

        let old = previous.map(|v| (*v).clone()).unwrap_or(Value::Null);
        if old == value {
            None
        } else {
            Some((old, value))
        }
    }

    fn seed_subject(&self, subject: &SubjectHandle) {
        let derived: Vec<&'static str> = subject
            .descriptor()
            .properties()
            .filter(|p| p.derived)
            .map(|p| p.name)
            .collect();
        for name in derived {
            let reference = PropertyReference::new(subject.clone(), name);
            self.evaluate(&reference);
        }
    }

    /// Re-evaluate every derived property depending on `written`, publishing
    /// one synthetic change per dependent whose value moved. Transitive
    /// dependents (derived-over-derived) refresh through the worklist; a
    /// visited set keeps each dependent to at most one refresh per write.
    fn refresh_dependents(&self, written: &PropertyReference, ctx: &WriteContext) {
        let observer = written
            .subject
            .context()
            .and_then(|c| c.try_get_service::<ChangeObserver>());

        let mut queue: Vec<PropertyReference> = self.used_by(written).into_iter().collect();
        let mut refreshed: HashSet<PropertyReference> = HashSet::new();

        while let Some(derived) = queue.pop() {
            if !refreshed.insert(derived.clone()) {
                continue;
            }
            let Some((old_value, new_value)) = self.evaluate(&derived) else {
                continue;
            };
            if let Some(observer) = &observer {
                observer.publish(PropertyChange {
                    reference: derived.clone(),
                    old_value,
                    new_value,
                    timestamp: chrono::Utc::now(),
                    origin: ctx.origin.clone(),
                });
            }
            queue.extend(self.used_by(&derived));
        }
    }
}

impl Default for DerivedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadInterceptor for DerivedTracker {
    fn read(&self, ctx: &ReadContext, next: &mut ReadNext<'_>) -> Result<Value, SubjectError> {
        record_read(&ctx.reference);
        next(ctx)
    }
}

impl WriteInterceptor for DerivedTracker {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
        next(ctx)?;
        let written = ctx.reference.clone();
        self.refresh_dependents(&written, ctx);
        Ok(())
    }
}

impl LifecycleObserver for DerivedTracker {
    fn on_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Attached { subject, .. } => self.seed_subject(subject),
            LifecycleEvent::Detached { subject, .. } => {
                let mut tables = self.tables.lock().expect("dependency lock poisoned");
                tables.forget_subject(subject);
            }
            _ => {}
        }
    }
}
