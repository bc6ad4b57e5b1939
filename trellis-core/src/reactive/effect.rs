//! Effect Runtime
//!
//! Effect handlers receive their params and an [`EffectContext`] bound to
//! the scope that launched them. Through the context a handler can read
//! state, launch units, and call other effects in the same scope.
//!
//! # Nested Calls
//!
//! [`EffectContext::call`] queues the nested effect in the scope, exactly as
//! if it had been reached by propagation, and resolves with its outcome once
//! the nested completion tick has drained. The scope's tracker counts the
//! nested call like any other, so `all_settled` on the outer effect waits
//! for the whole chain.
//!
//! # Failures
//!
//! A failed call is a value, not an error: handlers return
//! `Err(Value)`, panics are caught and reported as a string value, and
//! callers observe both as [`EffectResult::Fail`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::scheduler::Transaction;
use super::scope::Scope;
use crate::error::{Error, Result, NOT_A_UNIT};
use crate::graph::{Effect, NodeId, Outcome, Store, Unit};

/// Handle passed to effect handlers.
#[derive(Debug, Clone)]
pub struct EffectContext {
    scope: Scope,
}

impl EffectContext {
    pub(crate) fn new(scope: Scope) -> Self {
        Self { scope }
    }

    /// The scope this call runs in.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Current value of `store` in this scope.
    pub fn get_state(&self, store: Store) -> Option<Value> {
        self.scope.get_state(store)
    }

    /// Trigger `unit` in this scope.
    pub fn launch(&self, unit: impl Unit, params: Value) -> Result<()> {
        self.scope.launch(unit, params)
    }

    /// Call another effect in this scope and wait for its outcome.
    pub async fn call(&self, effect: Effect, params: Value) -> Outcome {
        if !self.scope.graph().contains(effect.id()) {
            return Err(Value::from(NOT_A_UNIT));
        }
        self.call_node(effect.id(), params).await
    }

    pub(crate) async fn call_node(&self, effect: NodeId, params: Value) -> Outcome {
        let (reply, outcome) = oneshot::channel();
        if let Err(err) = self.scope.submit(Transaction::root(effect, params).with_reply(reply)) {
            return Err(Value::from(err.to_string()));
        }
        match outcome.await {
            Ok(outcome) => outcome,
            Err(_) => {
                let name = self.scope.graph().get(effect).name().to_string();
                Err(Value::from(Error::EffectDropped(name).to_string()))
            }
        }
    }
}

/// How an effect call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum EffectResult {
    /// The handler succeeded with this result.
    Done(Value),
    /// The handler failed with this error.
    Fail(Value),
}

impl EffectResult {
    /// Whether the call succeeded.
    pub fn is_done(&self) -> bool {
        matches!(self, EffectResult::Done(_))
    }

    /// The result or the error.
    pub fn value(&self) -> &Value {
        match self {
            EffectResult::Done(value) | EffectResult::Fail(value) => value,
        }
    }

    /// Back to `Ok(result)` / `Err(error)`.
    pub fn into_outcome(self) -> Outcome {
        match self {
            EffectResult::Done(value) => Ok(value),
            EffectResult::Fail(value) => Err(value),
        }
    }
}

impl From<Outcome> for EffectResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(value) => EffectResult::Done(value),
            Err(value) => EffectResult::Fail(value),
        }
    }
}
