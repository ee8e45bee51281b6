//! Origin tokens: identity markers recording which source produced a write.
//!
//! Tokens compare by identity, not by name — two sources with the same
//! nominal name stay distinguishable. The current token is tracked on a
//! thread-local stack so that synchronous write pipelines triggered by an
//! inbound source update inherit it automatically.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

struct OriginInner {
    name: String,
}

/// Identity marker for one source instance.
#[derive(Clone)]
pub struct OriginToken {
    inner: Arc<OriginInner>,
}

impl OriginToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OriginInner { name: name.into() }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Make this token the current origin for the calling thread until the
    /// returned guard drops. Scopes nest.
    pub fn enter(&self) -> OriginScope {
        CURRENT_ORIGIN.with(|stack| stack.borrow_mut().push(self.clone()));
        OriginScope { _private: () }
    }
}

impl PartialEq for OriginToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for OriginToken {}

impl fmt::Debug for OriginToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OriginToken({})", self.inner.name)
    }
}

thread_local! {
    static CURRENT_ORIGIN: RefCell<Vec<OriginToken>> = const { RefCell::new(Vec::new()) };
}

/// Guard returned by [`OriginToken::enter`]; pops the token on drop.
pub struct OriginScope {
    _private: (),
}

impl Drop for OriginScope {
    fn drop(&mut self) {
        CURRENT_ORIGIN.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// The innermost origin active on the calling thread, if any.
pub fn current_origin() -> Option<OriginToken> {
    CURRENT_ORIGIN.with(|stack| stack.borrow().last().cloned())
}
