//! Hand-wired subject fixture used by the crate's own tests.

use std::sync::{OnceLock, RwLock};

use crate::subject::{
    InterceptorSubject, PropertyMetadata, SubjectDescriptor, SubjectHandle, SubjectState,
};
use crate::value::{PropertyKind, Value};

/// A small subject with one property of each shape: scalar, subject
/// reference, list, and dictionary.
pub(crate) struct TestNode {
    name: RwLock<Value>,
    child: RwLock<Value>,
    children: RwLock<Value>,
    entries: RwLock<Value>,
    state: SubjectState,
}

impl TestNode {
    pub fn create(name: &str) -> SubjectHandle {
        SubjectHandle::from_subject(TestNode {
            name: RwLock::new(Value::from(name)),
            child: RwLock::new(Value::Null),
            children: RwLock::new(Value::List(Vec::new())),
            entries: RwLock::new(Value::Map(Default::default())),
            state: SubjectState::new(),
        })
    }
}

fn field(
    handle: &SubjectHandle,
    pick: impl Fn(&TestNode) -> &RwLock<Value>,
) -> &RwLock<Value> {
    pick(handle
        .downcast_ref::<TestNode>()
        .expect("trampoline invoked on a different subject type"))
}

fn descriptor() -> &'static SubjectDescriptor {
    static DESCRIPTOR: OnceLock<SubjectDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| {
        SubjectDescriptor::new(
            "TestNode",
            vec![
                PropertyMetadata::new("Name", PropertyKind::String)
                    .with_get(|h| Ok(field(h, |n| &n.name).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.name).write().unwrap() = v;
                        Ok(())
                    }),
                PropertyMetadata::new("Child", PropertyKind::Subject)
                    .with_get(|h| Ok(field(h, |n| &n.child).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.child).write().unwrap() = v;
                        Ok(())
                    }),
                PropertyMetadata::new("Children", PropertyKind::List)
                    .with_get(|h| Ok(field(h, |n| &n.children).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.children).write().unwrap() = v;
                        Ok(())
                    }),
                PropertyMetadata::new("Entries", PropertyKind::Dict)
                    .with_get(|h| Ok(field(h, |n| &n.entries).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.entries).write().unwrap() = v;
                        Ok(())
                    }),
            ],
        )
    })
}

impl InterceptorSubject for TestNode {
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
