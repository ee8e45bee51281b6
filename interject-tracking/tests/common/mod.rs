//! Shared fixtures for the tracking integration tests.

use std::sync::{Arc, Mutex, OnceLock, RwLock};

use interject_core::context::SubjectContext;
use interject_core::pipeline::read_property;
use interject_core::subject::{
    InterceptorSubject, PropertyMetadata, SubjectDescriptor, SubjectHandle, SubjectState,
};
use interject_core::value::{PropertyKind, Value};
use interject_tracking::{LifecycleEvent, LifecycleObserver};

/// A person-shaped subject: scalar names, a derived full name, subject
/// references, a list of children, and a dictionary.
pub struct Person {
    first_name: RwLock<Value>,
    last_name: RwLock<Value>,
    partner: RwLock<Value>,
    father: RwLock<Value>,
    mother: RwLock<Value>,
    children: RwLock<Value>,
    state: SubjectState,
}

impl Person {
    pub fn create() -> SubjectHandle {
        SubjectHandle::from_subject(Person {
            first_name: RwLock::new(Value::Null),
            last_name: RwLock::new(Value::Null),
            partner: RwLock::new(Value::Null),
            father: RwLock::new(Value::Null),
            mother: RwLock::new(Value::Null),
            children: RwLock::new(Value::List(Vec::new())),
            state: SubjectState::new(),
        })
    }

    pub fn named(first: &str) -> SubjectHandle {
        let person = Self::create();
        *person
            .downcast_ref::<Person>()
            .unwrap()
            .first_name
            .write()
            .unwrap() = Value::from(first);
        person
    }
}

fn field(
    handle: &SubjectHandle,
    pick: impl Fn(&Person) -> &RwLock<Value>,
) -> &RwLock<Value> {
    pick(handle
        .downcast_ref::<Person>()
        .expect("trampoline invoked on a different subject type"))
}

fn scalar(
    name: &'static str,
    kind: PropertyKind,
    pick: impl Fn(&Person) -> &RwLock<Value> + Copy + Send + Sync + 'static,
) -> PropertyMetadata {
    PropertyMetadata::new(name, kind)
        .with_get(move |h| Ok(field(h, pick).read().unwrap().clone()))
        .with_set(move |h, v| {
            *field(h, pick).write().unwrap() = v;
            Ok(())
        })
}

fn descriptor() -> &'static SubjectDescriptor {
    static DESCRIPTOR: OnceLock<SubjectDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| {
        SubjectDescriptor::new(
            "Person",
            vec![
                scalar("FirstName", PropertyKind::String, |p| &p.first_name),
                scalar("LastName", PropertyKind::String, |p| &p.last_name),
                PropertyMetadata::new("FullName", PropertyKind::String)
                    .with_get(|h| {
                        let first = read_property(h, "FirstName")?;
                        let last = read_property(h, "LastName")?;
                        Ok(Value::String(format!(
                            "{} {}",
                            first.as_str().unwrap_or_default(),
                            last.as_str().unwrap_or_default()
                        )))
                    })
                    .derived(),
                scalar("Partner", PropertyKind::Subject, |p| &p.partner),
                scalar("Father", PropertyKind::Subject, |p| &p.father),
                scalar("Mother", PropertyKind::Subject, |p| &p.mother),
                scalar("Children", PropertyKind::List, |p| &p.children),
            ],
        )
    })
}

impl InterceptorSubject for Person {
    fn descriptor(&self) -> &SubjectDescriptor {
        descriptor()
    }

    fn state(&self) -> &SubjectState {
        &self.state
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Records every lifecycle event dispatched on a context.
pub struct EventLog {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl EventLog {
    pub fn install(context: &SubjectContext) -> Arc<EventLog> {
        let log = Arc::new(EventLog {
            events: Mutex::new(Vec::new()),
        });
        let for_registration = log.clone();
        context.with_service::<dyn LifecycleObserver>(move |_| {
            let service: Arc<dyn LifecycleObserver> = for_registration;
            service
        });
        log
    }

    pub fn take(&self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }
}

impl LifecycleObserver for EventLog {
    fn on_event(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
