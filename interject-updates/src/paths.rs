//! Path providers: mapping property references to segmented path strings
//! and back.
//!
//! Paths are composed from ancestor property segments joined by a configured
//! delimiter; collection slots render as `[index]` or `[key]`. Paths that do
//! not start with the provider's prefix belong to another source and are
//! ignored.

use interject_core::context::SubjectContext;
use interject_core::error::SubjectError;
use interject_core::subject::{PropertyReference, SubjectHandle};
use interject_core::value::Value;
use interject_tracking::{Index, ParentTracker, SubjectRegistry};

/// Maps property references to paths for one named source.
pub trait PathProvider: Send + Sync + 'static {
    fn source_name(&self) -> &str;

    /// The path of a property reference, or `None` when the reference is
    /// outside this provider's scope.
    fn path_of(&self, reference: &PropertyReference) -> Option<String>;

    /// Resolve a path back to a property reference, walking from the
    /// registry roots.
    fn resolve(
        &self,
        context: &SubjectContext,
        path: &str,
    ) -> Result<PropertyReference, SubjectError>;
}

/// Default provider: ancestor property names joined by a delimiter under a
/// fixed prefix.
pub struct SegmentedPathProvider {
    source_name: String,
    delimiter: String,
    prefix: String,
}

impl SegmentedPathProvider {
    pub fn new(
        source_name: impl Into<String>,
        delimiter: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            delimiter: delimiter.into(),
            prefix: prefix.into(),
        }
    }

    fn render_segment(name: &str, index: Option<&Index>) -> String {
        match index {
            Some(index) => format!("{name}{index}"),
            None => name.to_string(),
        }
    }
}

/// One parsed path segment: a property name plus an optional collection slot.
fn parse_segment(segment: &str) -> Result<(&str, Option<Index>), SubjectError> {
    let Some(open) = segment.find('[') else {
        return Ok((segment, None));
    };
    if !segment.ends_with(']') {
        return Err(SubjectError::PropertyNotFound(segment.to_string()));
    }
    let name = &segment[..open];
    let inner = &segment[open + 1..segment.len() - 1];
    let index = match inner.parse::<usize>() {
        Ok(position) => Index::Position(position),
        Err(_) => Index::Key(inner.to_string()),
    };
    Ok((name, Some(index)))
}

fn raw_read(subject: &SubjectHandle, name: &str) -> Result<Value, SubjectError> {
    let meta = subject
        .descriptor()
        .property(name)
        .ok_or_else(|| SubjectError::PropertyNotFound(name.to_string()))?;
    match &meta.get {
        Some(getter) => getter(subject),
        None => Ok(Value::Null),
    }
}

fn step_into(value: &Value, index: Option<&Index>) -> Option<SubjectHandle> {
    match (value, index) {
        (Value::Subject(subject), None) => Some(subject.clone()),
        (Value::List(items), Some(Index::Position(position))) => {
            items.get(*position).and_then(|v| v.as_subject()).cloned()
        }
        (Value::Map(entries), Some(Index::Key(key))) => {
            entries.get(key).and_then(|v| v.as_subject()).cloned()
        }
        _ => None,
    }
}

impl PathProvider for SegmentedPathProvider {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn path_of(&self, reference: &PropertyReference) -> Option<String> {
        // First root-to-subject path wins; DAG members mirror under their
        // primary parent.
        let ancestry = ParentTracker::for_all_paths(&reference.subject)
            .into_iter()
            .next()?;
        let mut segments: Vec<String> = ancestry
            .iter()
            .map(|parent| {
                Self::render_segment(parent.reference.name, parent.index.as_ref())
            })
            .collect();
        segments.push(reference.name.to_string());
        Some(format!("{}{}", self.prefix, segments.join(&self.delimiter)))
    }

    fn resolve(
        &self,
        context: &SubjectContext,
        path: &str,
    ) -> Result<PropertyReference, SubjectError> {
        let Some(relative) = path.strip_prefix(&self.prefix) else {
            return Err(SubjectError::PropertyNotFound(path.to_string()));
        };
        let segments: Vec<&str> = relative
            .split(self.delimiter.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(SubjectError::PropertyNotFound(path.to_string()));
        }

        let registry = context
            .get_service::<SubjectRegistry>()
            .map_err(SubjectError::Configuration)?;

        'roots: for root in registry.roots() {
            let mut current = root;
            for segment in &segments[..segments.len() - 1] {
                let (name, index) = parse_segment(segment)?;
                let value = match raw_read(&current, name) {
                    Ok(value) => value,
                    Err(_) => continue 'roots,
                };
                match step_into(&value, index.as_ref()) {
                    Some(next) => current = next,
                    None => continue 'roots,
                }
            }
            let (name, _) = parse_segment(segments[segments.len() - 1])?;
            if let Some(meta_name) = current.descriptor().property(name).map(|meta| meta.name) {
                return Ok(PropertyReference::new(current, meta_name));
            }
        }

        Err(SubjectError::PropertyNotFound(path.to_string()))
    }
}
