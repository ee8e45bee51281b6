//! The full-tracking context preset.
//!
//! Wires the default write chain — equality short-circuit, graph
//! maintenance, change observable, derived-dependency tracking — plus the
//! registry lifecycle binding and the parent tracker. User interceptors
//! registered afterwards run between the tracking chain and any validator
//! placed last.

use std::sync::Arc;

use interject_core::context::{LifecycleInterceptor, SubjectContext};
use interject_core::ordering::Placement;
use interject_core::pipeline::{ReadInterceptor, WriteInterceptor};

use crate::changes::{ChangeObserver, DEFAULT_CHANGE_CAPACITY};
use crate::derived::DerivedTracker;
use crate::interceptors::{EqualityShortCircuit, GraphMaintenance};
use crate::parents::ParentTracker;
use crate::registry::{LifecycleObserver, SubjectRegistry};

/// Install the tracking services on an existing context.
pub fn install_tracking(context: &SubjectContext) {
    let registry = Arc::new(SubjectRegistry::new());
    let observer = Arc::new(ChangeObserver::new(DEFAULT_CHANGE_CAPACITY));
    let derived = Arc::new(DerivedTracker::new());
    let parents = Arc::new(ParentTracker::new());

    // Concrete-typed lookups for consumers (connectors, derived refresh).
    {
        let registry = registry.clone();
        context.with_service::<SubjectRegistry>(move |_| registry);
    }
    {
        let observer = observer.clone();
        context.with_service::<ChangeObserver>(move |_| observer);
    }
    {
        let derived = derived.clone();
        context.with_service::<DerivedTracker>(move |_| derived);
    }
    {
        let parents = parents.clone();
        context.with_service::<ParentTracker>(move |_| parents);
    }

    // Root attach/detach walks the graph.
    {
        let registry = registry.clone();
        context.with_service::<dyn LifecycleInterceptor>(move |_| {
            let service: Arc<dyn LifecycleInterceptor> = registry;
            service
        });
    }

    // Observers run after the registry tables are updated; parent snapshots
    // refresh before derived seeding reads them.
    {
        let parents = parents.clone();
        context.with_service::<dyn LifecycleObserver>(move |_| {
            let service: Arc<dyn LifecycleObserver> = parents;
            service
        });
    }
    {
        let derived = derived.clone();
        context.with_service::<dyn LifecycleObserver>(move |_| {
            let service: Arc<dyn LifecycleObserver> = derived;
            service
        });
    }

    // Write chain, outermost first.
    context.with_service_placed::<dyn WriteInterceptor>(
        Placement::first().tagged::<EqualityShortCircuit>(),
        |_| Arc::new(EqualityShortCircuit),
    );
    {
        let registry = registry.clone();
        context.with_service_placed::<dyn WriteInterceptor>(
            Placement::new()
                .tagged::<GraphMaintenance>()
                .after::<EqualityShortCircuit>(),
            move |_| Arc::new(GraphMaintenance::new(registry)),
        );
    }
    {
        let observer = observer.clone();
        context.with_service_placed::<dyn WriteInterceptor>(
            Placement::new()
                .tagged::<ChangeObserver>()
                .after::<GraphMaintenance>(),
            move |_| {
                let service: Arc<dyn WriteInterceptor> = observer;
                service
            },
        );
    }
    {
        let derived = derived.clone();
        context.with_service_placed::<dyn WriteInterceptor>(
            Placement::new()
                .tagged::<DerivedTracker>()
                .after::<ChangeObserver>(),
            move |_| {
                let service: Arc<dyn WriteInterceptor> = derived;
                service
            },
        );
    }

    // Reads feed the recording scopes.
    {
        let derived = derived.clone();
        context.with_service::<dyn ReadInterceptor>(move |_| {
            let service: Arc<dyn ReadInterceptor> = derived;
            service
        });
    }
}

/// A fresh context with the full tracking chain installed.
pub fn tracking_context() -> SubjectContext {
    let context = SubjectContext::new();
    install_tracking(&context);
    context
}
