//! Typed read / write / method interceptor chains.
//!
//! A chain is built per invocation from the subject's context services
//! followed by its per-instance interceptors, and executes synchronously on
//! the caller's thread. Every step receives a `next` continuation; skipping
//! `next` short-circuits, and only the terminal step touches the backing
//! field — an error anywhere leaves the subject unchanged.

use crate::context::SubjectContext;
use crate::error::SubjectError;
use crate::origin::{current_origin, OriginToken};
use crate::subject::{PropertyReference, SubjectHandle};
use crate::value::Value;

/// Context handed to every read interceptor.
pub struct ReadContext {
    pub reference: PropertyReference,
}

/// Context handed to every write interceptor.
///
/// `current` is read once on pipeline entry; `new_value` may be rewritten by
/// interceptors before the terminal step assigns it.
pub struct WriteContext {
    pub reference: PropertyReference,
    pub current: Value,
    pub new_value: Value,
    pub origin: Option<OriginToken>,
}

/// Context handed to every method interceptor.
pub struct MethodContext {
    pub subject: SubjectHandle,
    pub method: &'static str,
    pub args: Vec<Value>,
}

pub type ReadNext<'a> = dyn FnMut(&ReadContext) -> Result<Value, SubjectError> + 'a;
pub type WriteNext<'a> = dyn FnMut(&mut WriteContext) -> Result<(), SubjectError> + 'a;
pub type MethodNext<'a> = dyn FnMut(&mut MethodContext) -> Result<Value, SubjectError> + 'a;

/// Middleware on property reads.
pub trait ReadInterceptor: Send + Sync + 'static {
    fn read(&self, ctx: &ReadContext, next: &mut ReadNext<'_>) -> Result<Value, SubjectError>;
}

/// Middleware on property writes.
pub trait WriteInterceptor: Send + Sync + 'static {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError>;
}

/// Middleware on method invocations.
pub trait MethodInterceptor: Send + Sync + 'static {
    fn invoke(&self, ctx: &mut MethodContext, next: &mut MethodNext<'_>)
        -> Result<Value, SubjectError>;
}

fn run_read_chain(
    chain: &[std::sync::Arc<dyn ReadInterceptor>],
    ctx: &ReadContext,
    terminal: &mut ReadNext<'_>,
) -> Result<Value, SubjectError> {
    match chain.split_first() {
        None => terminal(ctx),
        Some((head, rest)) => head.read(ctx, &mut |c| run_read_chain(rest, c, terminal)),
    }
}

fn run_write_chain(
    chain: &[std::sync::Arc<dyn WriteInterceptor>],
    ctx: &mut WriteContext,
    terminal: &mut WriteNext<'_>,
) -> Result<(), SubjectError> {
    match chain.split_first() {
        None => terminal(ctx),
        Some((head, rest)) => head.write(ctx, &mut |c| run_write_chain(rest, c, terminal)),
    }
}

fn run_method_chain(
    chain: &[std::sync::Arc<dyn MethodInterceptor>],
    ctx: &mut MethodContext,
    terminal: &mut MethodNext<'_>,
) -> Result<Value, SubjectError> {
    match chain.split_first() {
        None => terminal(ctx),
        Some((head, rest)) => head.invoke(ctx, &mut |c| run_method_chain(rest, c, terminal)),
    }
}

fn context_of(subject: &SubjectHandle) -> Option<SubjectContext> {
    subject.context()
}

/// Intercepted property read: the generated getter trampoline.
pub fn read_property(subject: &SubjectHandle, name: &str) -> Result<Value, SubjectError> {
    let meta = subject
        .descriptor()
        .property(name)
        .ok_or_else(|| SubjectError::PropertyNotFound(name.to_string()))?;
    let getter = meta
        .get
        .clone()
        .ok_or_else(|| SubjectError::WriteOnly(name.to_string()))?;

    let ctx = ReadContext {
        reference: PropertyReference::new(subject.clone(), meta.name),
    };

    let mut chain = match context_of(subject) {
        Some(context) => context.get_services::<dyn ReadInterceptor>()?,
        None => Vec::new(),
    };
    chain.extend(subject.state().interceptors().readers());

    let subject = subject.clone();
    let mut terminal = move |_: &ReadContext| getter(&subject);
    run_read_chain(&chain, &ctx, &mut terminal)
}

/// Intercepted property write: the generated setter trampoline.
pub fn write_property(
    subject: &SubjectHandle,
    name: &str,
    value: impl Into<Value>,
) -> Result<(), SubjectError> {
    let meta = subject
        .descriptor()
        .property(name)
        .ok_or_else(|| SubjectError::PropertyNotFound(name.to_string()))?;
    let Some(setter) = meta.set.clone() else {
        return Err(SubjectError::ReadOnly(name.to_string()));
    };
    let current = match &meta.get {
        Some(getter) => getter(subject)?,
        None => Value::Null,
    };

    let mut ctx = WriteContext {
        reference: PropertyReference::new(subject.clone(), meta.name),
        current,
        new_value: value.into(),
        origin: current_origin(),
    };

    let mut chain = match context_of(subject) {
        Some(context) => context.get_services::<dyn WriteInterceptor>()?,
        None => Vec::new(),
    };
    chain.extend(subject.state().interceptors().writers());

    let subject = subject.clone();
    let mut terminal =
        move |c: &mut WriteContext| setter(&subject, c.new_value.clone());
    run_write_chain(&chain, &mut ctx, &mut terminal)
}

/// Intercepted method invocation: the generated method trampoline. The
/// concrete subject supplies the terminal step performing the real call.
pub fn invoke_method(
    subject: &SubjectHandle,
    method: &'static str,
    args: Vec<Value>,
    terminal: impl FnMut(&mut MethodContext) -> Result<Value, SubjectError>,
) -> Result<Value, SubjectError> {
    let mut ctx = MethodContext {
        subject: subject.clone(),
        method,
        args,
    };

    let mut chain = match context_of(subject) {
        Some(context) => context.get_services::<dyn MethodInterceptor>()?,
        None => Vec::new(),
    };
    chain.extend(subject.state().interceptors().methods());

    let mut terminal = terminal;
    run_method_chain(&chain, &mut ctx, &mut terminal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestNode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ReadInterceptor for Recorder {
        fn read(&self, ctx: &ReadContext, next: &mut ReadNext<'_>) -> Result<Value, SubjectError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:enter", self.label));
            let result = next(ctx);
            self.log.lock().unwrap().push(format!("{}:exit", self.label));
            result
        }
    }

    impl WriteInterceptor for Recorder {
        fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:enter", self.label));
            let result = next(ctx);
            self.log.lock().unwrap().push(format!("{}:exit", self.label));
            result
        }
    }

    #[test]
    fn read_chain_nests_context_then_instance() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = crate::context::SubjectContext::new();
        let outer = Arc::new(Recorder {
            label: "ctx",
            log: log.clone(),
        });
        context.with_service::<dyn ReadInterceptor>(move |_| outer);

        let node = TestNode::create("a");
        node.set_context(Some(&context));
        node.state().interceptors().add_reader(Arc::new(Recorder {
            label: "inst",
            log: log.clone(),
        }));

        let value = read_property(&node, "Name").unwrap();
        assert_eq!(value, Value::from("a"));
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["ctx:enter", "inst:enter", "inst:exit", "ctx:exit"]
        );
    }

    struct Uppercase;

    impl WriteInterceptor for Uppercase {
        fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
            if let Value::String(s) = &ctx.new_value {
                ctx.new_value = Value::String(s.to_uppercase());
            }
            next(ctx)
        }
    }

    #[test]
    fn write_interceptor_can_rewrite_new_value() {
        let context = crate::context::SubjectContext::new();
        context.with_service::<dyn WriteInterceptor>(|_| Arc::new(Uppercase));

        let node = TestNode::create("a");
        node.set_context(Some(&context));
        write_property(&node, "Name", "rico").unwrap();
        assert_eq!(read_property(&node, "Name").unwrap(), Value::from("RICO"));
    }

    struct Suppress;

    impl WriteInterceptor for Suppress {
        fn write(&self, _ctx: &mut WriteContext, _next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
            Ok(())
        }
    }

    #[test]
    fn skipping_next_suppresses_the_write() {
        let context = crate::context::SubjectContext::new();
        context.with_service::<dyn WriteInterceptor>(|_| Arc::new(Suppress));

        let node = TestNode::create("a");
        node.set_context(Some(&context));
        write_property(&node, "Name", "changed").unwrap();
        assert_eq!(read_property(&node, "Name").unwrap(), Value::from("a"));
    }

    struct Reject;

    impl WriteInterceptor for Reject {
        fn write(&self, ctx: &mut WriteContext, _next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
            Err(SubjectError::Internal(format!(
                "rejected {}",
                ctx.reference.name
            )))
        }
    }

    #[test]
    fn error_aborts_without_touching_the_field() {
        let context = crate::context::SubjectContext::new();
        context.with_service::<dyn WriteInterceptor>(|_| Arc::new(Reject));

        let node = TestNode::create("a");
        node.set_context(Some(&context));
        let err = write_property(&node, "Name", "changed").unwrap_err();
        assert!(err.to_string().contains("rejected Name"));
        assert_eq!(read_property(&node, "Name").unwrap(), Value::from("a"));
    }

    #[test]
    fn unknown_property_and_readonly_writes_fail() {
        let node = TestNode::create("a");
        assert!(matches!(
            read_property(&node, "Nope"),
            Err(SubjectError::PropertyNotFound(_))
        ));
        assert!(matches!(
            write_property(&node, "Nope", 1i64),
            Err(SubjectError::PropertyNotFound(_))
        ));
    }

    #[test]
    fn detached_subject_still_reads_and_writes() {
        let node = TestNode::create("a");
        write_property(&node, "Name", "b").unwrap();
        assert_eq!(read_property(&node, "Name").unwrap(), Value::from("b"));
    }

    struct DoubleArgs;

    impl MethodInterceptor for DoubleArgs {
        fn invoke(
            &self,
            ctx: &mut MethodContext,
            next: &mut MethodNext<'_>,
        ) -> Result<Value, SubjectError> {
            for arg in ctx.args.iter_mut() {
                if let Value::Int(i) = arg {
                    *i *= 2;
                }
            }
            next(ctx)
        }
    }

    #[test]
    fn method_interceptors_can_rewrite_args() {
        let node = TestNode::create("a");
        node.state()
            .interceptors()
            .add_method(Arc::new(DoubleArgs));

        let calls = AtomicUsize::new(0);
        let result = invoke_method(&node, "Sum", vec![Value::Int(1), Value::Int(2)], |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            let total = ctx
                .args
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    _ => 0,
                })
                .sum();
            Ok(Value::Int(total))
        })
        .unwrap();
        assert_eq!(result, Value::Int(6));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
