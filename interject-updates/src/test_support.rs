//! Hand-wired subject fixture used by the crate's own tests.

use std::sync::{OnceLock, RwLock};

use interject_core::subject::{
    InterceptorSubject, PropertyMetadata, SubjectDescriptor, SubjectHandle, SubjectState,
};
use interject_core::value::{PropertyKind, Value};

/// A machine-shaped subject: label, speed, one subject reference, and a
/// list of parts.
pub(crate) struct Machine {
    label: RwLock<Value>,
    speed: RwLock<Value>,
    head: RwLock<Value>,
    parts: RwLock<Value>,
    state: SubjectState,
}

impl Machine {
    pub fn create(label: &str) -> SubjectHandle {
        SubjectHandle::from_subject(Machine {
            label: RwLock::new(Value::from(label)),
            speed: RwLock::new(Value::Float(0.0)),
            head: RwLock::new(Value::Null),
            parts: RwLock::new(Value::List(Vec::new())),
            state: SubjectState::new(),
        })
    }
}

fn field(
    handle: &SubjectHandle,
    pick: impl Fn(&Machine) -> &RwLock<Value>,
) -> &RwLock<Value> {
    pick(handle
        .downcast_ref::<Machine>()
        .expect("trampoline invoked on a different subject type"))
}

fn scalar(
    name: &'static str,
    kind: PropertyKind,
    pick: impl Fn(&Machine) -> &RwLock<Value> + Copy + Send + Sync + 'static,
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
            "Machine",
            vec![
                scalar("Label", PropertyKind::String, |m| &m.label),
                scalar("Speed", PropertyKind::Float, |m| &m.speed),
                scalar("Head", PropertyKind::Subject, |m| &m.head),
                scalar("Parts", PropertyKind::List, |m| &m.parts),
            ],
        )
    })
}

impl InterceptorSubject for Machine {
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
