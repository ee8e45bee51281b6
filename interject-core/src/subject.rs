//! The subject contract: what every tracked object exposes to the runtime.
//!
//! A subject is an ordinary user struct that hands the framework three
//! things: a static [`SubjectDescriptor`] (its property table), a
//! [`SubjectState`] (context slot, scratch data map, per-instance
//! interceptors), and `Any` access for downcasting inside property
//! trampolines. Code generation for the trampolines is out of scope; the
//! closures in [`PropertyMetadata`] are wired by hand or by a build step.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::context::SubjectContext;
use crate::error::SubjectError;
use crate::pipeline::{MethodInterceptor, ReadInterceptor, WriteInterceptor};
use crate::value::{PropertyKind, Value};

/// Raw backing-field read: the terminal step of the read pipeline.
pub type Getter = Arc<dyn Fn(&SubjectHandle) -> Result<Value, SubjectError> + Send + Sync>;

/// Raw backing-field write: the terminal step of the write pipeline.
pub type Setter = Arc<dyn Fn(&SubjectHandle, Value) -> Result<(), SubjectError> + Send + Sync>;

/// An opaque named attribute attached to a property, consumed by connectors
/// (unit hints, browse names, documentation, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyAttribute {
    pub name: &'static str,
    pub value: Value,
}

/// Static description of one intercepted property.
#[derive(Clone)]
pub struct PropertyMetadata {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub attributes: Vec<PropertyAttribute>,
    pub get: Option<Getter>,
    pub set: Option<Setter>,
    /// True iff `get` is present, `set` is absent, and the getter is a pure
    /// function of other properties.
    pub derived: bool,
}

impl PropertyMetadata {
    pub fn new(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            attributes: Vec::new(),
            get: None,
            set: None,
            derived: false,
        }
    }

    pub fn with_get(
        mut self,
        get: impl Fn(&SubjectHandle) -> Result<Value, SubjectError> + Send + Sync + 'static,
    ) -> Self {
        self.get = Some(Arc::new(get));
        self
    }

    pub fn with_set(
        mut self,
        set: impl Fn(&SubjectHandle, Value) -> Result<(), SubjectError> + Send + Sync + 'static,
    ) -> Self {
        self.set = Some(Arc::new(set));
        self
    }

    pub fn with_attribute(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.attributes.push(PropertyAttribute {
            name,
            value: value.into(),
        });
        self
    }

    /// Mark the property as derived. Requires a getter and no setter.
    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    pub fn is_readable(&self) -> bool {
        self.get.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }
}

impl fmt::Debug for PropertyMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("readable", &self.get.is_some())
            .field("writable", &self.set.is_some())
            .field("derived", &self.derived)
            .finish()
    }
}

/// Ordered property table for one concrete subject type.
///
/// Built once per type (typically in a `OnceLock`) so steady-state access
/// needs no reflection.
pub struct SubjectDescriptor {
    type_name: &'static str,
    properties: Vec<PropertyMetadata>,
    index: HashMap<&'static str, usize>,
}

impl SubjectDescriptor {
    pub fn new(type_name: &'static str, properties: Vec<PropertyMetadata>) -> Self {
        let index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name, i))
            .collect();
        Self {
            type_name,
            properties,
            index,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyMetadata> {
        self.properties.iter()
    }
}

impl fmt::Debug for SubjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectDescriptor")
            .field("type_name", &self.type_name)
            .field("property_count", &self.properties.len())
            .finish()
    }
}

/// The contract every tracked object satisfies.
pub trait InterceptorSubject: Send + Sync + 'static {
    fn descriptor(&self) -> &SubjectDescriptor;
    fn state(&self) -> &SubjectState;
    fn as_any(&self) -> &dyn Any;
}

/// Key into the per-subject scratch data map: `(property-name-or-null, key)`.
pub type DataKey = (Option<&'static str>, &'static str);

/// Per-instance runtime state shared by every subject.
pub struct SubjectState {
    context: RwLock<Option<SubjectContext>>,
    data: DashMap<DataKey, Arc<dyn Any + Send + Sync>>,
    interceptors: InterceptorCollection,
}

impl SubjectState {
    pub fn new() -> Self {
        Self {
            context: RwLock::new(None),
            data: DashMap::new(),
            interceptors: InterceptorCollection::new(),
        }
    }

    pub fn context(&self) -> Option<SubjectContext> {
        self.context.read().expect("context lock poisoned").clone()
    }

    pub(crate) fn replace_context(&self, context: Option<SubjectContext>) -> Option<SubjectContext> {
        let mut slot = self.context.write().expect("context lock poisoned");
        std::mem::replace(&mut *slot, context)
    }

    /// Typed read from the scratch map.
    pub fn get_data<T: Send + Sync + 'static>(&self, key: DataKey) -> Option<Arc<T>> {
        self.data
            .get(&key)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn set_data<T: Send + Sync + 'static>(&self, key: DataKey, value: Arc<T>) {
        self.data.insert(key, value);
    }

    pub fn remove_data(&self, key: DataKey) {
        self.data.remove(&key);
    }

    /// Atomically replace the value under `key` with `f(previous)`.
    pub fn update_data<T: Send + Sync + 'static>(
        &self,
        key: DataKey,
        f: impl FnOnce(Option<Arc<T>>) -> Arc<T>,
    ) {
        let mut entry = self.data.entry(key).or_insert_with(|| {
            Arc::new(()) as Arc<dyn Any + Send + Sync>
        });
        let previous = entry.value().clone().downcast::<T>().ok();
        *entry.value_mut() = f(previous);
    }

    pub fn interceptors(&self) -> &InterceptorCollection {
        &self.interceptors
    }
}

impl Default for SubjectState {
    fn default() -> Self {
        Self::new()
    }
}

/// The subject's per-instance interceptor lists, chained under the context's
/// services (context services run first).
pub struct InterceptorCollection {
    readers: RwLock<Vec<Arc<dyn ReadInterceptor>>>,
    writers: RwLock<Vec<Arc<dyn WriteInterceptor>>>,
    methods: RwLock<Vec<Arc<dyn MethodInterceptor>>>,
}

impl InterceptorCollection {
    fn new() -> Self {
        Self {
            readers: RwLock::new(Vec::new()),
            writers: RwLock::new(Vec::new()),
            methods: RwLock::new(Vec::new()),
        }
    }

    pub fn add_reader(&self, interceptor: Arc<dyn ReadInterceptor>) {
        self.readers
            .write()
            .expect("interceptor lock poisoned")
            .push(interceptor);
    }

    pub fn add_writer(&self, interceptor: Arc<dyn WriteInterceptor>) {
        self.writers
            .write()
            .expect("interceptor lock poisoned")
            .push(interceptor);
    }

    pub fn add_method(&self, interceptor: Arc<dyn MethodInterceptor>) {
        self.methods
            .write()
            .expect("interceptor lock poisoned")
            .push(interceptor);
    }

    pub fn readers(&self) -> Vec<Arc<dyn ReadInterceptor>> {
        self.readers
            .read()
            .expect("interceptor lock poisoned")
            .clone()
    }

    pub fn writers(&self) -> Vec<Arc<dyn WriteInterceptor>> {
        self.writers
            .read()
            .expect("interceptor lock poisoned")
            .clone()
    }

    pub fn methods(&self) -> Vec<Arc<dyn MethodInterceptor>> {
        self.methods
            .read()
            .expect("interceptor lock poisoned")
            .clone()
    }
}

/// Shared handle to a subject with pointer-identity equality and hashing.
///
/// All registry, parent, and dependency tables key by `SubjectHandle`; two
/// handles are equal iff they point at the same subject instance.
#[derive(Clone)]
pub struct SubjectHandle {
    inner: Arc<dyn InterceptorSubject>,
}

impl SubjectHandle {
    pub fn new(subject: Arc<dyn InterceptorSubject>) -> Self {
        Self { inner: subject }
    }

    pub fn from_subject<T: InterceptorSubject>(subject: T) -> Self {
        Self {
            inner: Arc::new(subject),
        }
    }

    pub fn descriptor(&self) -> &SubjectDescriptor {
        self.inner.descriptor()
    }

    pub fn state(&self) -> &SubjectState {
        self.inner.state()
    }

    pub fn context(&self) -> Option<SubjectContext> {
        self.inner.state().context()
    }

    pub fn type_name(&self) -> &'static str {
        self.inner.descriptor().type_name()
    }

    /// Downcast to the concrete subject type, for use in property trampolines.
    pub fn downcast_ref<T: InterceptorSubject>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Stable identity of the underlying instance, for logging and keying.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn as_arc(&self) -> &Arc<dyn InterceptorSubject> {
        &self.inner
    }
}

impl PartialEq for SubjectHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SubjectHandle {}

impl Hash for SubjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for SubjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.type_name(), self.id())
    }
}

/// The pair `(subject, property-name)`.
///
/// Equality is subject identity plus name equality.
#[derive(Clone)]
pub struct PropertyReference {
    pub subject: SubjectHandle,
    pub name: &'static str,
}

impl PropertyReference {
    pub fn new(subject: SubjectHandle, name: &'static str) -> Self {
        Self { subject, name }
    }

    pub fn metadata(&self) -> Option<&PropertyMetadata> {
        self.subject.descriptor().property(self.name)
    }
}

impl PartialEq for PropertyReference {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject && self.name == other.name
    }
}

impl Eq for PropertyReference {}

impl Hash for PropertyReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subject.type_name(), self.name)
    }
}

impl fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subject.type_name(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestNode;

    #[test]
    fn handle_equality_is_identity() {
        let a = TestNode::create("a");
        let b = TestNode::create("b");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn property_reference_equality() {
        let a = TestNode::create("a");
        let b = TestNode::create("b");
        assert_eq!(
            PropertyReference::new(a.clone(), "Name"),
            PropertyReference::new(a.clone(), "Name")
        );
        assert_ne!(
            PropertyReference::new(a.clone(), "Name"),
            PropertyReference::new(a.clone(), "Child")
        );
        assert_ne!(
            PropertyReference::new(a, "Name"),
            PropertyReference::new(b, "Name")
        );
    }

    #[test]
    fn descriptor_lookup_is_ordered() {
        let node = TestNode::create("a");
        let names: Vec<_> = node.descriptor().properties().map(|p| p.name).collect();
        assert_eq!(names, vec!["Name", "Child", "Children", "Entries"]);
        assert!(node.descriptor().property("Name").is_some());
        assert!(node.descriptor().property("Missing").is_none());
    }

    #[test]
    fn data_map_round_trips_typed_values() {
        let node = TestNode::create("a");
        let state = node.state();
        state.set_data((None, "counter"), Arc::new(41u64));
        assert_eq!(state.get_data::<u64>((None, "counter")).as_deref(), Some(&41));
        state.remove_data((None, "counter"));
        assert!(state.get_data::<u64>((None, "counter")).is_none());
    }
}
