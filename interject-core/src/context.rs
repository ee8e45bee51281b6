//! The context: a keyed service container shared by a subject graph.
//!
//! Services are registered under a kind (usually a `dyn Trait` type) with a
//! lazy factory that runs at most once. Resolution returns local
//! registrations first, then each fallback context in order, deduplicated by
//! instance identity, and finally reordered by the registered
//! [`Placement`](crate::ordering::Placement) constraints.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use crate::error::ConfigurationError;
use crate::ordering::{sort_placements, Placement};
use crate::subject::SubjectHandle;

/// Lifecycle hook invoked when a subject is bound to or unbound from a
/// context (directly, or transitively through fallback chaining).
pub trait LifecycleInterceptor: Send + Sync + 'static {
    fn attach_to(&self, subject: &SubjectHandle, context: &SubjectContext);
    fn detach_from(&self, subject: &SubjectHandle, context: &SubjectContext);
}

type ErasedService = Box<dyn Any + Send + Sync>;
type ServiceFactory = Box<dyn FnOnce(&SubjectContext) -> ErasedService + Send>;

struct ServiceEntry {
    kind: TypeId,
    placement: Placement,
    cell: OnceLock<ErasedService>,
    factory: Mutex<Option<ServiceFactory>>,
}

impl ServiceEntry {
    /// Force the factory (at most once) and clone out the typed `Arc`.
    fn resolve<S: ?Sized + Send + Sync + 'static>(&self, context: &SubjectContext) -> Arc<S> {
        let erased = self.cell.get_or_init(|| {
            let factory = self
                .factory
                .lock()
                .expect("service factory lock poisoned")
                .take()
                .expect("service factory already consumed");
            factory(context)
        });
        erased
            .downcast_ref::<Arc<S>>()
            .expect("service entry type mismatch")
            .clone()
    }
}

/// A hierarchical service container scoped to one subject graph.
///
/// Cloning is cheap and shares the same container; contexts compare by
/// identity.
#[derive(Clone)]
pub struct SubjectContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    services: RwLock<Vec<Arc<ServiceEntry>>>,
    fallbacks: RwLock<Vec<SubjectContext>>,
    subjects: RwLock<Vec<SubjectHandle>>,
    transaction_gate: Arc<tokio::sync::Mutex<()>>,
}

impl SubjectContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                services: RwLock::new(Vec::new()),
                fallbacks: RwLock::new(Vec::new()),
                subjects: RwLock::new(Vec::new()),
                transaction_gate: Arc::new(tokio::sync::Mutex::new(())),
            }),
        }
    }

    /// Register a service of kind `S` with an unconstrained placement.
    ///
    /// The factory runs lazily on first resolution, at most once. A factory
    /// may resolve other services of the same context, but not its own kind.
    pub fn with_service<S: ?Sized + Send + Sync + 'static>(
        &self,
        factory: impl FnOnce(&SubjectContext) -> Arc<S> + Send + 'static,
    ) -> &Self {
        self.with_service_placed(Placement::new(), factory)
    }

    /// Register a service of kind `S` with explicit placement constraints.
    pub fn with_service_placed<S: ?Sized + Send + Sync + 'static>(
        &self,
        placement: Placement,
        factory: impl FnOnce(&SubjectContext) -> Arc<S> + Send + 'static,
    ) -> &Self {
        let entry = ServiceEntry {
            kind: TypeId::of::<S>(),
            placement,
            cell: OnceLock::new(),
            factory: Mutex::new(Some(Box::new(move |ctx| {
                Box::new(factory(ctx)) as ErasedService
            }))),
        };
        self.inner
            .services
            .write()
            .expect("service table lock poisoned")
            .push(Arc::new(entry));
        self
    }

    /// All services of kind `S`: local registrations first, then fallbacks in
    /// order, deduplicated by identity and reordered by placement.
    pub fn get_services<S: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Vec<Arc<S>>, ConfigurationError> {
        let mut resolved: Vec<(Arc<S>, Placement)> = Vec::new();
        let mut seen: Vec<*const ()> = Vec::new();
        self.collect_services(&mut resolved, &mut seen);

        let placements: Vec<Placement> = resolved.iter().map(|(_, p)| p.clone()).collect();
        let order = sort_placements(&placements)?;
        Ok(order.into_iter().map(|i| resolved[i].0.clone()).collect())
    }

    fn collect_services<S: ?Sized + Send + Sync + 'static>(
        &self,
        out: &mut Vec<(Arc<S>, Placement)>,
        seen: &mut Vec<*const ()>,
    ) {
        let kind = TypeId::of::<S>();
        let entries: Vec<Arc<ServiceEntry>> = self
            .inner
            .services
            .read()
            .expect("service table lock poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        for entry in entries {
            let service = entry.resolve::<S>(self);
            let identity = Arc::as_ptr(&service) as *const ();
            if !seen.contains(&identity) {
                seen.push(identity);
                out.push((service, entry.placement.clone()));
            }
        }

        let fallbacks: Vec<SubjectContext> = self
            .inner
            .fallbacks
            .read()
            .expect("fallback lock poisoned")
            .clone();
        for fallback in fallbacks {
            fallback.collect_services(out, seen);
        }
    }

    /// The single service of kind `S`. Fails with [`ConfigurationError`] when
    /// zero or more than one service matches.
    pub fn get_service<S: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Arc<S>, ConfigurationError> {
        let mut services = self.get_services::<S>()?;
        match services.len() {
            0 => Err(ConfigurationError::MissingService {
                kind: type_name::<S>(),
            }),
            1 => Ok(services.remove(0)),
            count => Err(ConfigurationError::AmbiguousService {
                kind: type_name::<S>(),
                count,
            }),
        }
    }

    /// First service of kind `S`, or `None` when nothing is registered.
    pub fn try_get_service<S: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<S>> {
        self.get_services::<S>().ok()?.into_iter().next()
    }

    /// Push a parent context. Identity equality; adding the same parent twice
    /// is a no-op. The parent's [`LifecycleInterceptor`]s run `attach_to` for
    /// every subject already bound to this context.
    pub fn add_fallback(&self, parent: &SubjectContext) {
        {
            let mut fallbacks = self
                .inner
                .fallbacks
                .write()
                .expect("fallback lock poisoned");
            if fallbacks.iter().any(|f| f == parent) {
                return;
            }
            fallbacks.push(parent.clone());
        }
        for subject in self.subjects() {
            for interceptor in parent.own_lifecycle_interceptors() {
                interceptor.attach_to(&subject, self);
            }
        }
    }

    /// Pop a parent context, running the symmetric `detach_from` for every
    /// subject bound to this context. Unknown parents are a no-op.
    pub fn remove_fallback(&self, parent: &SubjectContext) {
        {
            let mut fallbacks = self
                .inner
                .fallbacks
                .write()
                .expect("fallback lock poisoned");
            let Some(position) = fallbacks.iter().position(|f| f == parent) else {
                return;
            };
            fallbacks.remove(position);
        }
        for subject in self.subjects() {
            for interceptor in parent.own_lifecycle_interceptors().into_iter().rev() {
                interceptor.detach_from(&subject, self);
            }
        }
    }

    /// Lifecycle interceptors registered directly on this context (no
    /// fallback traversal) — used by fallback add/remove, which must only run
    /// the hooks the changed parent contributes.
    fn own_lifecycle_interceptors(&self) -> Vec<Arc<dyn LifecycleInterceptor>> {
        let kind = TypeId::of::<dyn LifecycleInterceptor>();
        let entries: Vec<Arc<ServiceEntry>> = self
            .inner
            .services
            .read()
            .expect("service table lock poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect();
        entries
            .into_iter()
            .map(|e| e.resolve::<dyn LifecycleInterceptor>(self))
            .collect()
    }

    /// Bind a subject to this context. Rebinding to the same context is a
    /// no-op; a subject bound elsewhere is detached there first.
    pub fn attach_subject(&self, subject: &SubjectHandle) {
        if let Some(existing) = subject.context() {
            if existing == *self {
                return;
            }
            existing.detach_subject(subject);
        }
        subject.state().replace_context(Some(self.clone()));
        {
            let mut subjects = self
                .inner
                .subjects
                .write()
                .expect("subject list lock poisoned");
            if !subjects.iter().any(|s| s == subject) {
                subjects.push(subject.clone());
            }
        }
        match self.get_services::<dyn LifecycleInterceptor>() {
            Ok(interceptors) => {
                for interceptor in interceptors {
                    interceptor.attach_to(subject, self);
                }
            }
            Err(err) => tracing::error!(error = %err, "lifecycle resolution failed on attach"),
        }
    }

    /// Unbind a subject from this context, running `detach_from` hooks in
    /// reverse registration order.
    pub fn detach_subject(&self, subject: &SubjectHandle) {
        let was_bound = {
            let mut subjects = self
                .inner
                .subjects
                .write()
                .expect("subject list lock poisoned");
            match subjects.iter().position(|s| s == subject) {
                Some(position) => {
                    subjects.remove(position);
                    true
                }
                None => false,
            }
        };
        if !was_bound {
            return;
        }
        match self.get_services::<dyn LifecycleInterceptor>() {
            Ok(interceptors) => {
                for interceptor in interceptors.into_iter().rev() {
                    interceptor.detach_from(subject, self);
                }
            }
            Err(err) => tracing::error!(error = %err, "lifecycle resolution failed on detach"),
        }
        if subject.context().as_ref() == Some(self) {
            subject.state().replace_context(None);
        }
    }

    /// Subjects currently bound to this context (direct roots).
    pub fn subjects(&self) -> Vec<SubjectHandle> {
        self.inner
            .subjects
            .read()
            .expect("subject list lock poisoned")
            .clone()
    }

    pub(crate) fn transaction_gate(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.transaction_gate.clone()
    }
}

impl Default for SubjectContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SubjectContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SubjectContext {}

impl fmt::Debug for SubjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectContext")
            .field("id", &(Arc::as_ptr(&self.inner) as usize))
            .finish()
    }
}

impl SubjectHandle {
    /// Settable root binding: `Some` attaches the subject to the context,
    /// `None` force-detaches it.
    pub fn set_context(&self, context: Option<&SubjectContext>) {
        match context {
            Some(context) => context.attach_subject(self),
            None => {
                if let Some(existing) = self.context() {
                    existing.detach_subject(self);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestNode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync + 'static {
        fn hello(&self) -> &'static str;
    }

    struct English;
    impl Greeter for English {
        fn hello(&self) -> &'static str {
            "hello"
        }
    }

    struct French;
    impl Greeter for French {
        fn hello(&self) -> &'static str {
            "bonjour"
        }
    }

    #[test]
    fn services_resolve_in_registration_order() {
        let context = SubjectContext::new();
        context.with_service::<dyn Greeter>(|_| Arc::new(English));
        context.with_service::<dyn Greeter>(|_| Arc::new(French));

        let greetings: Vec<_> = context
            .get_services::<dyn Greeter>()
            .unwrap()
            .iter()
            .map(|g| g.hello())
            .collect();
        assert_eq!(greetings, vec!["hello", "bonjour"]);
    }

    #[test]
    fn get_service_requires_exactly_one() {
        let context = SubjectContext::new();
        assert!(matches!(
            context.get_service::<dyn Greeter>(),
            Err(ConfigurationError::MissingService { .. })
        ));

        context.with_service::<dyn Greeter>(|_| Arc::new(English));
        assert_eq!(context.get_service::<dyn Greeter>().unwrap().hello(), "hello");

        context.with_service::<dyn Greeter>(|_| Arc::new(French));
        assert!(matches!(
            context.get_service::<dyn Greeter>(),
            Err(ConfigurationError::AmbiguousService { count: 2, .. })
        ));
    }

    #[test]
    fn factories_run_lazily_and_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);
        let context = SubjectContext::new();
        context.with_service::<dyn Greeter>(|_| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            Arc::new(English)
        });
        assert_eq!(BUILDS.load(Ordering::SeqCst), 0);

        context.get_services::<dyn Greeter>().unwrap();
        context.get_services::<dyn Greeter>().unwrap();
        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fallback_services_come_after_local_and_dedupe() {
        let parent = SubjectContext::new();
        let shared: Arc<dyn Greeter> = Arc::new(French);
        let shared_for_parent = shared.clone();
        parent.with_service::<dyn Greeter>(move |_| shared_for_parent);

        let child = SubjectContext::new();
        child.with_service::<dyn Greeter>(|_| Arc::new(English));
        let shared_for_child = shared.clone();
        child.with_service::<dyn Greeter>(move |_| shared_for_child);
        child.add_fallback(&parent);

        let services = child.get_services::<dyn Greeter>().unwrap();
        // French registered on both is deduplicated by identity.
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].hello(), "hello");
        assert_eq!(services[1].hello(), "bonjour");
    }

    #[test]
    fn adding_same_fallback_twice_is_noop() {
        let parent = SubjectContext::new();
        parent.with_service::<dyn Greeter>(|_| Arc::new(French));
        let child = SubjectContext::new();
        child.add_fallback(&parent);
        child.add_fallback(&parent);
        assert_eq!(child.get_services::<dyn Greeter>().unwrap().len(), 1);
    }

    struct CountingLifecycle {
        attaches: AtomicUsize,
        detaches: AtomicUsize,
    }

    impl LifecycleInterceptor for CountingLifecycle {
        fn attach_to(&self, _subject: &SubjectHandle, _context: &SubjectContext) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }
        fn detach_from(&self, _subject: &SubjectHandle, _context: &SubjectContext) {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn attach_detach_runs_lifecycle_hooks() {
        let lifecycle = Arc::new(CountingLifecycle {
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
        });
        let context = SubjectContext::new();
        let for_registration = lifecycle.clone();
        context.with_service::<dyn LifecycleInterceptor>(move |_| for_registration);

        let node = TestNode::create("a");
        node.set_context(Some(&context));
        assert_eq!(lifecycle.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(node.context(), Some(context.clone()));

        // Rebinding to the same context is a no-op.
        node.set_context(Some(&context));
        assert_eq!(lifecycle.attaches.load(Ordering::SeqCst), 1);

        node.set_context(None);
        assert_eq!(lifecycle.detaches.load(Ordering::SeqCst), 1);
        assert!(node.context().is_none());
    }

    #[test]
    fn fallback_add_runs_parent_hooks_for_bound_subjects() {
        let lifecycle = Arc::new(CountingLifecycle {
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
        });
        let parent = SubjectContext::new();
        let for_registration = lifecycle.clone();
        parent.with_service::<dyn LifecycleInterceptor>(move |_| for_registration);

        let child = SubjectContext::new();
        let node = TestNode::create("a");
        node.set_context(Some(&child));
        assert_eq!(lifecycle.attaches.load(Ordering::SeqCst), 0);

        child.add_fallback(&parent);
        assert_eq!(lifecycle.attaches.load(Ordering::SeqCst), 1);

        child.remove_fallback(&parent);
        assert_eq!(lifecycle.detaches.load(Ordering::SeqCst), 1);
    }
}
