//! Update processors: filter and transform updates before emission.

use std::collections::BTreeMap;

use interject_core::subject::PropertyReference;

use crate::update::{SubjectStateUpdate, SubjectUpdate};

/// A pluggable step in the update emission pipeline.
pub trait SubjectUpdateProcessor: Send + Sync + 'static {
    /// Whether changes to `reference` should appear in updates at all.
    fn is_included(&self, reference: &PropertyReference) -> bool {
        let _ = reference;
        true
    }

    /// Transform a built update before it is handed to the source.
    fn transform(&self, update: SubjectUpdate) -> SubjectUpdate {
        update
    }
}

/// Renames every property to lower-camel-case on the wire.
pub struct CamelCasePropertyNames;

fn camel_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

impl SubjectUpdateProcessor for CamelCasePropertyNames {
    fn transform(&self, update: SubjectUpdate) -> SubjectUpdate {
        SubjectUpdate {
            root: update.root,
            subjects: update
                .subjects
                .into_iter()
                .map(|(id, properties)| {
                    let renamed: SubjectStateUpdate = properties
                        .into_iter()
                        .map(|(name, property)| (camel_case(&name), property))
                        .collect::<BTreeMap<_, _>>();
                    (id, renamed)
                })
                .collect(),
        }
    }
}

/// Drops properties by exact name.
pub struct ExcludeProperties {
    names: Vec<&'static str>,
}

impl ExcludeProperties {
    pub fn new(names: Vec<&'static str>) -> Self {
        Self { names }
    }
}

impl SubjectUpdateProcessor for ExcludeProperties {
    fn is_included(&self, reference: &PropertyReference) -> bool {
        !self.names.contains(&reference.name)
    }
}
