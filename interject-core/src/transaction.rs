//! Optional serialization boundary for grouped writes.
//!
//! At most one transaction is active per context; `begin_transaction` awaits
//! the gate. Writes inside the transaction flow through the normal pipeline
//! immediately; the transaction records pre-images so `Rollback` mode can
//! restore them, and compares expected values at commit to detect writes
//! that raced in from outside the transaction.

use std::sync::Mutex;

use crate::context::SubjectContext;
use crate::error::SubjectError;
use crate::pipeline::write_property;
use crate::subject::{PropertyReference, SubjectHandle};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    /// Undo this transaction's writes unless `commit` is called.
    Rollback,
    /// Keep writes even when the transaction is dropped without commit.
    Commit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictBehavior {
    /// `commit` fails when a touched property was modified outside the
    /// transaction after the transaction last wrote it.
    FailOnConflict,
    /// `commit` re-applies the transaction's value over outside writes.
    OverwriteOnConflict,
}

struct TransactionEntry {
    reference: PropertyReference,
    pre_image: Value,
    expected: Value,
}

/// An active transaction. Obtained from
/// [`SubjectContext::begin_transaction`]; holding it blocks other
/// transactions on the same context.
pub struct SubjectTransaction {
    _gate: tokio::sync::OwnedMutexGuard<()>,
    mode: TransactionMode,
    conflict: ConflictBehavior,
    entries: Mutex<Vec<TransactionEntry>>,
    committed: bool,
}

impl SubjectContext {
    /// Open a transaction on this context. Awaits while another transaction
    /// is active.
    pub async fn begin_transaction(
        &self,
        mode: TransactionMode,
        conflict: ConflictBehavior,
    ) -> SubjectTransaction {
        let gate = self.transaction_gate().lock_owned().await;
        SubjectTransaction {
            _gate: gate,
            mode,
            conflict,
            entries: Mutex::new(Vec::new()),
            committed: false,
        }
    }
}

fn raw_read(reference: &PropertyReference) -> Result<Value, SubjectError> {
    let meta = reference
        .metadata()
        .ok_or_else(|| SubjectError::PropertyNotFound(reference.name.to_string()))?;
    match &meta.get {
        Some(getter) => getter(&reference.subject),
        None => Ok(Value::Null),
    }
}

impl SubjectTransaction {
    /// Write a property inside the transaction. The write goes through the
    /// full interceptor pipeline immediately; the pre-image is captured on
    /// the first touch of each property.
    pub fn write(
        &self,
        subject: &SubjectHandle,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), SubjectError> {
        let value = value.into();
        let meta = subject
            .descriptor()
            .property(name)
            .ok_or_else(|| SubjectError::PropertyNotFound(name.to_string()))?;
        let reference = PropertyReference::new(subject.clone(), meta.name);
        let pre_image = raw_read(&reference)?;

        write_property(subject, name, value.clone())?;

        let mut entries = self.entries.lock().expect("transaction lock poisoned");
        match entries.iter_mut().find(|e| e.reference == reference) {
            Some(entry) => entry.expected = value,
            None => entries.push(TransactionEntry {
                reference,
                pre_image,
                expected: value,
            }),
        }
        Ok(())
    }

    /// Commit the transaction, applying the configured conflict behavior.
    pub fn commit(mut self) -> Result<(), SubjectError> {
        self.committed = true;
        let entries = std::mem::take(
            &mut *self.entries.lock().expect("transaction lock poisoned"),
        );
        for entry in &entries {
            let current = raw_read(&entry.reference)?;
            if current == entry.expected {
                continue;
            }
            match self.conflict {
                ConflictBehavior::FailOnConflict => {
                    return Err(SubjectError::Conflict(format!(
                        "{} was modified outside the transaction",
                        entry.reference
                    )));
                }
                ConflictBehavior::OverwriteOnConflict => {
                    write_property(
                        &entry.reference.subject,
                        entry.reference.name,
                        entry.expected.clone(),
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for SubjectTransaction {
    fn drop(&mut self) {
        if self.committed || self.mode != TransactionMode::Rollback {
            return;
        }
        let entries = std::mem::take(
            &mut *self.entries.lock().expect("transaction lock poisoned"),
        );
        for entry in entries.iter().rev() {
            if let Err(err) = write_property(
                &entry.reference.subject,
                entry.reference.name,
                entry.pre_image.clone(),
            ) {
                tracing::warn!(
                    property = %entry.reference,
                    error = %err,
                    "transaction rollback write failed"
                );
            }
        }
    }
}
