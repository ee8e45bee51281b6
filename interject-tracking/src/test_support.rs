//! Hand-wired subject fixture used by the crate's own tests.

use std::sync::{OnceLock, RwLock};

use interject_core::pipeline::read_property;
use interject_core::subject::{
    InterceptorSubject, PropertyMetadata, SubjectDescriptor, SubjectHandle, SubjectState,
};
use interject_core::value::{PropertyKind, Value};

/// A graph-shaped subject: scalar name, two subject references, a list, a
/// dictionary, and a derived display property computed from `Name`.
pub(crate) struct GraphNode {
    name: RwLock<Value>,
    partner: RwLock<Value>,
    child: RwLock<Value>,
    children: RwLock<Value>,
    entries: RwLock<Value>,
    state: SubjectState,
}

impl GraphNode {
    pub fn create(name: &str) -> SubjectHandle {
        SubjectHandle::from_subject(GraphNode {
            name: RwLock::new(Value::from(name)),
            partner: RwLock::new(Value::Null),
            child: RwLock::new(Value::Null),
            children: RwLock::new(Value::List(Vec::new())),
            entries: RwLock::new(Value::Map(Default::default())),
            state: SubjectState::new(),
        })
    }
}

fn field(
    handle: &SubjectHandle,
    pick: impl Fn(&GraphNode) -> &RwLock<Value>,
) -> &RwLock<Value> {
    pick(handle
        .downcast_ref::<GraphNode>()
        .expect("trampoline invoked on a different subject type"))
}

fn descriptor() -> &'static SubjectDescriptor {
    static DESCRIPTOR: OnceLock<SubjectDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| {
        SubjectDescriptor::new(
            "GraphNode",
            vec![
                PropertyMetadata::new("Name", PropertyKind::String)
                    .with_get(|h| Ok(field(h, |n| &n.name).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.name).write().unwrap() = v;
                        Ok(())
                    }),
                PropertyMetadata::new("Partner", PropertyKind::Subject)
                    .with_get(|h| Ok(field(h, |n| &n.partner).read().unwrap().clone()))
                    .with_set(|h, v| {
                        *field(h, |n| &n.partner).write().unwrap() = v;
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
                PropertyMetadata::new("Display", PropertyKind::String)
                    .with_get(|h| {
                        let name = read_property(h, "Name")?;
                        Ok(Value::String(format!(
                            "<{}>",
                            name.as_str().unwrap_or_default()
                        )))
                    })
                    .derived(),
            ],
        )
    })
}

impl InterceptorSubject for GraphNode {
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
