//! Write interceptors wired by the tracking preset.

use std::sync::Arc;

use interject_core::error::SubjectError;
use interject_core::pipeline::{WriteContext, WriteInterceptor, WriteNext};

use crate::registry::{dispatch_events, SubjectRegistry};

/// Suppresses writes whose new value equals the current value.
///
/// Collection and dictionary values always pass through: two structurally
/// equal collections may still be semantically new references.
pub struct EqualityShortCircuit;

impl WriteInterceptor for EqualityShortCircuit {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
        if !ctx.current.is_collection()
            && !ctx.new_value.is_collection()
            && ctx.current == ctx.new_value
        {
            return Ok(());
        }
        next(ctx)
    }
}

/// Keeps the registry in sync with reference-typed writes.
///
/// After the terminal step commits, the old and new values are diffed for
/// reachable subjects and the registry emits attach / index-change / detach
/// events, which are then dispatched to the context's lifecycle observers.
pub struct GraphMaintenance {
    registry: Arc<SubjectRegistry>,
}

impl GraphMaintenance {
    pub fn new(registry: Arc<SubjectRegistry>) -> Self {
        Self { registry }
    }
}

impl WriteInterceptor for GraphMaintenance {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
        let old = ctx.current.clone();
        next(ctx)?;

        if !old.contains_subjects() && !ctx.new_value.contains_subjects() {
            return Ok(());
        }
        let Some(context) = ctx.reference.subject.context() else {
            return Ok(());
        };
        let events = self
            .registry
            .apply_write(&ctx.reference, &old, &ctx.new_value);
        dispatch_events(&context, &events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interject_core::origin::current_origin;
    use interject_core::subject::PropertyReference;
    use interject_core::value::Value;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNext(AtomicUsize);

    impl CountingNext {
        fn run(
            &self,
            current: Value,
            new_value: Value,
            subject: interject_core::subject::SubjectHandle,
        ) -> Result<(), SubjectError> {
            let mut ctx = WriteContext {
                reference: PropertyReference::new(subject, "Value"),
                current,
                new_value,
                origin: current_origin(),
            };
            EqualityShortCircuit.write(&mut ctx, &mut |_| {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[test]
    fn equal_scalars_short_circuit() {
        let subject = crate::test_support::GraphNode::create("n");
        let next = CountingNext(AtomicUsize::new(0));
        next.run(Value::from("a"), Value::from("a"), subject.clone())
            .unwrap();
        assert_eq!(next.0.load(Ordering::SeqCst), 0);

        next.run(Value::from("a"), Value::from("b"), subject)
            .unwrap();
        assert_eq!(next.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collections_always_pass_through() {
        let subject = crate::test_support::GraphNode::create("n");
        let next = CountingNext(AtomicUsize::new(0));
        let list = Value::List(vec![Value::Int(1)]);
        next.run(list.clone(), list, subject.clone()).unwrap();
        assert_eq!(next.0.load(Ordering::SeqCst), 1);

        let map = Value::Map(BTreeMap::new());
        next.run(map.clone(), map, subject).unwrap();
        assert_eq!(next.0.load(Ordering::SeqCst), 2);
    }
}
