//! All Settled
//!
//! [`all_settled`] triggers a unit in a scope and resolves once the scope
//! has nothing left in flight: no drain running, no effect pending, no
//! completion tick queued. For an effect target it also reports how that
//! particular call ended.
//!
//! Arguments are validated before anything is scheduled, so a rejected call
//! leaves the scope untouched.

use serde_json::Value;
use tokio::sync::oneshot;

use super::effect::EffectResult;
use super::scheduler::Transaction;
use super::scope::Scope;
use crate::error::{Error, Result};
use crate::graph::{Domain, Effect, Event, Graph, Node, NodeId, NodeKind, Store};

/// What [`all_settled`] should start from.
#[derive(Debug, Clone)]
pub enum Target {
    /// A unit of the scope's graph.
    Unit(NodeId),
    /// Wait for a scope without triggering anything.
    Scope(Scope),
    /// Anything else a dynamic caller handed in. Always rejected.
    Value(Value),
}

impl From<Store> for Target {
    fn from(store: Store) -> Self {
        Target::Unit(store.id())
    }
}

impl From<Event> for Target {
    fn from(event: Event) -> Self {
        Target::Unit(event.id())
    }
}

impl From<Effect> for Target {
    fn from(effect: Effect) -> Self {
        Target::Unit(effect.id())
    }
}

impl From<Domain> for Target {
    fn from(domain: Domain) -> Self {
        Target::Unit(domain.id())
    }
}

impl From<NodeId> for Target {
    fn from(id: NodeId) -> Self {
        Target::Unit(id)
    }
}

impl From<Scope> for Target {
    fn from(scope: Scope) -> Self {
        Target::Scope(scope)
    }
}

impl From<&Scope> for Target {
    fn from(scope: &Scope) -> Self {
        Target::Scope(scope.clone())
    }
}

impl From<Value> for Target {
    fn from(value: Value) -> Self {
        Target::Value(value)
    }
}

/// Settings for [`all_settled`].
#[derive(Debug, Clone, Default)]
pub struct SettleConfig {
    scope: Option<Scope>,
    params: Value,
}

impl SettleConfig {
    /// Run in `scope` with `null` params.
    pub fn new(scope: &Scope) -> Self {
        Self {
            scope: Some(scope.clone()),
            params: Value::Null,
        }
    }

    /// Params passed to the target unit.
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Check that `id` is a unit of `graph` that may be triggered from outside.
pub(crate) fn validate_unit(graph: &Graph, id: NodeId) -> Result<&Node> {
    let node = graph.node(id).ok_or_else(Error::not_a_unit)?;
    match node.kind() {
        NodeKind::Domain | NodeKind::Computed(_) => Err(Error::unsupported_unit()),
        _ if node.is_derived() => Err(Error::NotTargetable {
            name: node.name().to_string(),
        }),
        _ => Ok(node),
    }
}

/// Trigger `target` in the configured scope and wait until the scope settles.
///
/// Resolves to the outcome of the call for effect targets and to `None` for
/// stores, events and scopes.
pub async fn all_settled(
    target: impl Into<Target>,
    config: SettleConfig,
) -> Result<Option<EffectResult>> {
    let SettleConfig { scope, params } = config;
    let id = match target.into() {
        Target::Value(_) => return Err(Error::not_a_unit()),
        Target::Scope(scope) => {
            scope.settled().await;
            return Ok(None);
        }
        Target::Unit(id) => id,
    };
    let scope = scope.ok_or_else(|| Error::InvalidArgument("scope is required".to_string()))?;

    let (is_effect, name) = {
        let node = validate_unit(scope.graph(), id)?;
        (
            matches!(node.kind(), NodeKind::Effect { .. }),
            node.name().to_string(),
        )
    };

    if !is_effect {
        scope.submit(Transaction::root(id, params))?;
        scope.settled().await;
        return Ok(None);
    }

    let (reply, outcome) = oneshot::channel();
    scope.submit(Transaction::root(id, params).with_reply(reply))?;
    scope.settled().await;
    match outcome.await {
        Ok(outcome) => Ok(Some(outcome.into())),
        Err(_) => Err(Error::EffectDropped(name)),
    }
}
