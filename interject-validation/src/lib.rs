//! Pluggable property validation for Interject write pipelines.
//!
//! The [`ValidationInterceptor`] sits at the end of the write chain (placed
//! last by the full-tracking preset) and asks every registered
//! [`PropertyValidator`] about the pending value. Any failure rejects the
//! write before the terminal step runs, so the backing field never changes.

use std::sync::Arc;

use interject_core::context::SubjectContext;
use interject_core::error::{SubjectError, ValidationFailure};
use interject_core::pipeline::{WriteContext, WriteInterceptor, WriteNext};
use interject_core::subject::PropertyReference;
use interject_core::value::Value;

/// A validator consulted for every pending write.
///
/// Returning an empty list accepts the value; any entries reject the write
/// with [`SubjectError::Validation`].
pub trait PropertyValidator: Send + Sync + 'static {
    fn validate(&self, reference: &PropertyReference, value: &Value) -> Vec<ValidationFailure>;
}

/// Write interceptor that runs all registered validators before `next`.
pub struct ValidationInterceptor;

impl WriteInterceptor for ValidationInterceptor {
    fn write(&self, ctx: &mut WriteContext, next: &mut WriteNext<'_>) -> Result<(), SubjectError> {
        let validators = match ctx.reference.subject.context() {
            Some(context) => context.get_services::<dyn PropertyValidator>()?,
            None => Vec::new(),
        };
        let mut failures = Vec::new();
        for validator in validators {
            failures.extend(validator.validate(&ctx.reference, &ctx.new_value));
        }
        if !failures.is_empty() {
            return Err(SubjectError::Validation(failures));
        }
        next(ctx)
    }
}

/// Register a validator on a context.
pub fn add_validator(context: &SubjectContext, validator: Arc<dyn PropertyValidator>) {
    context.with_service::<dyn PropertyValidator>(move |_| validator);
}

/// Rejects string values longer than `limit` characters.
///
/// Scoped to one property name, or to every string property when built with
/// [`MaxLength::any`].
pub struct MaxLength {
    property: Option<&'static str>,
    limit: usize,
}

impl MaxLength {
    pub fn new(property: &'static str, limit: usize) -> Self {
        Self {
            property: Some(property),
            limit,
        }
    }

    pub fn any(limit: usize) -> Self {
        Self {
            property: None,
            limit,
        }
    }
}

impl PropertyValidator for MaxLength {
    fn validate(&self, reference: &PropertyReference, value: &Value) -> Vec<ValidationFailure> {
        if let Some(property) = self.property {
            if property != reference.name {
                return Vec::new();
            }
        }
        match value {
            Value::String(s) if s.chars().count() > self.limit => {
                vec![ValidationFailure::new(
                    reference.name,
                    format!("must be at most {} characters", self.limit),
                )
                .with_code("max_length")]
            }
            _ => Vec::new(),
        }
    }
}

/// Rejects null values for one property.
pub struct Required {
    property: &'static str,
}

impl Required {
    pub fn new(property: &'static str) -> Self {
        Self { property }
    }
}

impl PropertyValidator for Required {
    fn validate(&self, reference: &PropertyReference, value: &Value) -> Vec<ValidationFailure> {
        if reference.name == self.property && *value == Value::Null {
            vec![ValidationFailure::new(reference.name, "is required").with_code("required")]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interject_core::pipeline::{read_property, write_property};
    use interject_core::subject::{
        InterceptorSubject, PropertyMetadata, SubjectDescriptor, SubjectHandle, SubjectState,
    };
    use interject_core::value::PropertyKind;
    use std::sync::{OnceLock, RwLock};

    struct Person {
        first_name: RwLock<Value>,
        state: SubjectState,
    }

    impl Person {
        fn create() -> SubjectHandle {
            SubjectHandle::from_subject(Person {
                first_name: RwLock::new(Value::Null),
                state: SubjectState::new(),
            })
        }
    }

    fn descriptor() -> &'static SubjectDescriptor {
        static DESCRIPTOR: OnceLock<SubjectDescriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            SubjectDescriptor::new(
                "Person",
                vec![PropertyMetadata::new("FirstName", PropertyKind::String)
                    .with_get(|h| {
                        Ok(h.downcast_ref::<Person>()
                            .expect("person")
                            .first_name
                            .read()
                            .unwrap()
                            .clone())
                    })
                    .with_set(|h, v| {
                        *h.downcast_ref::<Person>()
                            .expect("person")
                            .first_name
                            .write()
                            .unwrap() = v;
                        Ok(())
                    })],
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

    fn validating_context() -> SubjectContext {
        let context = SubjectContext::new();
        context.with_service::<dyn WriteInterceptor>(|_| Arc::new(ValidationInterceptor));
        context
    }

    #[test]
    fn write_within_limit_succeeds_and_over_limit_fails() {
        let context = validating_context();
        add_validator(&context, Arc::new(MaxLength::new("FirstName", 4)));

        let person = Person::create();
        person.set_context(Some(&context));

        write_property(&person, "FirstName", "Rico").unwrap();
        assert_eq!(
            read_property(&person, "FirstName").unwrap(),
            Value::from("Rico")
        );

        let err = write_property(&person, "FirstName", "Richard").unwrap_err();
        match err {
            SubjectError::Validation(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].code, "max_length");
            }
            other => panic!("expected validation error, got {other}"),
        }
        // The rejected write left the previous value in place.
        assert_eq!(
            read_property(&person, "FirstName").unwrap(),
            Value::from("Rico")
        );
    }

    #[test]
    fn all_validators_contribute_failures() {
        let context = validating_context();
        add_validator(&context, Arc::new(MaxLength::any(3)));
        add_validator(&context, Arc::new(MaxLength::new("FirstName", 2)));

        let person = Person::create();
        person.set_context(Some(&context));

        let err = write_property(&person, "FirstName", "Rico").unwrap_err();
        match err {
            SubjectError::Validation(failures) => assert_eq!(failures.len(), 2),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn required_rejects_null() {
        let context = validating_context();
        add_validator(&context, Arc::new(Required::new("FirstName")));

        let person = Person::create();
        person.set_context(Some(&context));
        write_property(&person, "FirstName", "Rico").unwrap();

        let err = write_property(&person, "FirstName", Value::Null).unwrap_err();
        assert!(matches!(err, SubjectError::Validation(_)));
    }

    #[test]
    fn unrelated_property_is_not_validated() {
        let context = validating_context();
        add_validator(&context, Arc::new(MaxLength::new("LastName", 1)));

        let person = Person::create();
        person.set_context(Some(&context));
        write_property(&person, "FirstName", "Rico").unwrap();
    }
}
