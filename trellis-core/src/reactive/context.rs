//! Scope Context
//!
//! Tracks which scope is running user callbacks on the current thread, so a
//! watcher or an effect body can launch follow-up units into "its" scope
//! without being handed the scope explicitly.
//!
//! # Implementation
//!
//! A thread-local stack of scopes. The engine pushes the scope before it
//! invokes a watcher or builds an effect future, and pops it when the
//! returned guard drops. Nesting happens when a watcher launches into another
//! scope whose drain is idle.

use std::cell::RefCell;

use super::scope::{Scope, ScopeId};

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the scope context when dropped.
pub(crate) struct ScopeContext {
    id: ScopeId,
}

impl ScopeContext {
    /// Make `scope` current until the guard drops.
    pub(crate) fn enter(scope: &Scope) -> Self {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(scope.clone()));
        Self { id: scope.id() }
    }

    /// The innermost scope running callbacks on this thread.
    pub(crate) fn current() -> Option<Scope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for ScopeContext {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(scope) = popped {
                debug_assert_eq!(
                    scope.id(),
                    self.id,
                    "ScopeContext mismatch: expected {}, got {}",
                    self.id,
                    scope.id()
                );
            }
        });
    }
}
