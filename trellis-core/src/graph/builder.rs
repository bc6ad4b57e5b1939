//! Graph Builder
//!
//! The builder is the only place topology is created. It declares units,
//! wires edges between them, assigns sids, and finally freezes everything
//! into an immutable [`Graph`].
//!
//! Wiring helpers mirror the usual reactive vocabulary:
//!
//! - `on`: reduce a store from a trigger
//! - `map` / `filter` / `filter_map`: derive events
//! - `map_store` / `combine`: derive stores
//! - `sample`: read a source when a clock fires
//! - `watch`: run a side effect
//! - `attach`: wrap an effect with a parameter mapper and a source store
//!
//! Builder methods never fail. A handle from another graph is recorded and
//! reported by [`GraphBuilder::build`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use indexmap::IndexMap;
use serde_json::{json, Value};
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::node::{
    filter_fn, transform_fn, CombineFn, Computation, Edge, EffectParts, GraphId, Handler,
    HandlerFn, MapParamsFn, Node, NodeId, NodeKind, Outcome, SampleFn,
};
use super::sid::Sid;
use super::unit::{Domain, Effect, Event, Store, Unit};
use super::Graph;
use crate::error::{Error, Result};
use crate::reactive::EffectContext;

static NULL: Value = Value::Null;

/// Graph-wide settings.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Derive sids for stores declared without one. Default: `true`.
    pub auto_sid: bool,
    /// Prepended to every derived sid. Default: empty.
    pub sid_prefix: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            auto_sid: true,
            sid_prefix: String::new(),
        }
    }
}

impl GraphConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn sid derivation on or off.
    pub fn with_auto_sid(mut self, enabled: bool) -> Self {
        self.auto_sid = enabled;
        self
    }

    /// Set the prefix of derived sids.
    pub fn with_sid_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sid_prefix = prefix.into();
        self
    }
}

/// Per-store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Explicit sid. Takes precedence over derivation.
    pub sid: Option<String>,
    /// Include the store in snapshots. Default: `true`.
    pub serialize: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sid: None,
            serialize: true,
        }
    }
}

impl StoreConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit sid.
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Keep the store out of snapshots.
    pub fn skip_serialize(mut self) -> Self {
        self.serialize = false;
        self
    }
}

/// Declaration of a `sample` link.
///
/// Start from a source or a clock; whichever is missing defaults to the
/// other. Without a source the clock payload is sampled.
pub struct Sample {
    source: Option<NodeId>,
    clock: SmallVec<[NodeId; 2]>,
    filter: Option<SampleFn<bool>>,
    map: Option<SampleFn<Value>>,
    target: Option<NodeId>,
}

impl Sample {
    /// Sample `unit` whenever it updates.
    pub fn source(unit: impl Unit) -> Self {
        Self {
            source: Some(unit.node()),
            clock: SmallVec::new(),
            filter: None,
            map: None,
            target: None,
        }
    }

    /// Sample the payload of `unit`.
    pub fn clock(unit: impl Unit) -> Self {
        Self {
            source: None,
            clock: smallvec![unit.node()],
            filter: None,
            map: None,
            target: None,
        }
    }

    /// Read `unit` instead of the clock payload.
    pub fn with_source(mut self, unit: impl Unit) -> Self {
        self.source = Some(unit.node());
        self
    }

    /// Add a clock.
    pub fn with_clock(mut self, unit: impl Unit) -> Self {
        self.clock.push(unit.node());
        self
    }

    /// Only pass values for which `predicate(source, clock)` holds.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Replace the sampled value with `f(source, clock)`.
    pub fn map<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.map = Some(Arc::new(f));
        self
    }

    /// Forward the result to `unit`.
    pub fn target(mut self, unit: impl Unit) -> Self {
        self.target = Some(unit.node());
        self
    }
}

/// Declaration of an attached effect.
pub struct Attach {
    effect: Effect,
    source: Option<NodeId>,
    map_params: Option<MapParamsFn>,
    name: Option<String>,
}

impl Attach {
    /// Wrap `effect`.
    pub fn new(effect: Effect) -> Self {
        Self {
            effect,
            source: None,
            map_params: None,
            name: None,
        }
    }

    /// Read `store` when a call starts and hand it to the mapper.
    pub fn source(mut self, store: Store) -> Self {
        self.source = Some(store.0);
        self
    }

    /// Map `(params, source)` to the wrapped effect's params. An `Err` fails
    /// the call without running the wrapped effect.
    pub fn map_params<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, Option<&Value>) -> Outcome + Send + Sync + 'static,
    {
        self.map_params = Some(Arc::new(f));
        self
    }

    /// Name of the new effect. Defaults to `<wrapped>.attached`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declares units and freezes them into a [`Graph`].
pub struct GraphBuilder {
    id: GraphId,
    config: GraphConfig,
    nodes: Vec<Node>,
    domain: Option<NodeId>,
    ordinals: HashMap<String, u32>,
    error: Option<Error>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create a builder with the given configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            id: GraphId::next(),
            config,
            nodes: Vec::new(),
            domain: None,
            ordinals: HashMap::new(),
            error: None,
        }
    }

    /// Identifier the built graph will carry.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Number of nodes declared so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------

    /// Declare a store.
    pub fn store(&mut self, name: impl Into<String>, default: Value) -> Store {
        self.store_with(name, default, StoreConfig::default())
    }

    /// Declare a store with explicit settings.
    pub fn store_with(
        &mut self,
        name: impl Into<String>,
        default: Value,
        config: StoreConfig,
    ) -> Store {
        let name = name.into();
        let sid = match config.sid {
            Some(sid) => Some(Sid::new(sid)),
            None if self.config.auto_sid => Some(self.derive_sid(&name)),
            None => None,
        };
        let id = self.add_node(
            name,
            NodeKind::Store {
                default,
                derived: false,
                serialize: config.serialize,
            },
        );
        self.nodes[id.index()].sid = sid;
        Store(id)
    }

    /// Declare an event.
    pub fn event(&mut self, name: impl Into<String>) -> Event {
        Event(self.add_node(name.into(), NodeKind::Event { derived: false }))
    }

    /// Declare a domain.
    pub fn domain(&mut self, name: impl Into<String>) -> Domain {
        Domain(self.add_node(name.into(), NodeKind::Domain))
    }

    /// Run `declare` with `domain` as the owner of every unit it declares.
    pub fn in_domain<R>(&mut self, domain: Domain, declare: impl FnOnce(&mut Self) -> R) -> R {
        if !self.owns(domain.0) {
            return declare(self);
        }
        let previous = self.domain.replace(domain.0);
        let result = declare(self);
        self.domain = previous;
        result
    }

    /// Declare an asynchronous effect.
    pub fn effect<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> Effect
    where
        F: Fn(Value, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |params, ctx| handler(params, ctx).boxed());
        self.effect_node(name.into(), Handler::Native(handler))
    }

    /// Declare an effect with a synchronous implementation.
    pub fn effect_fn<F>(&mut self, name: impl Into<String>, handler: F) -> Effect
    where
        F: Fn(Value) -> Outcome + Send + Sync + 'static,
    {
        self.effect(name, move |params, _ctx| future::ready(handler(params)))
    }

    /// Declare an effect that maps its params and calls another effect.
    pub fn attach(&mut self, attach: Attach) -> Effect {
        let Attach {
            effect,
            source,
            map_params,
            name,
        } = attach;
        self.owns(effect.id);
        if let Some(source) = source {
            self.owns(source);
        }
        let name = name.unwrap_or_else(|| format!("{}.attached", self.name_of(effect.id)));
        self.effect_node(
            name,
            Handler::Attached {
                effect: effect.id,
                source,
                map_params,
            },
        )
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Update `store` with `reducer(state, payload)` whenever `trigger` fires.
    pub fn on<F>(&mut self, store: Store, trigger: impl Unit, reducer: F) -> Store
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.try_on(store, trigger, move |state, payload| Ok(reducer(state, payload)))
    }

    /// Like [`on`](Self::on), with a reducer that may abort the tick.
    pub fn try_on<F>(&mut self, store: Store, trigger: impl Unit, reducer: F) -> Store
    where
        F: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        let target = store.0;
        self.owns(target);
        let transform = transform_fn(move |payload, view| reducer(view.value(target), payload));
        self.add_edge(trigger.node(), Edge::to(target).with_transform(transform));
        store
    }

    /// Derive an event carrying `f(payload)`.
    pub fn map<F>(&mut self, source: impl Unit, f: F) -> Event
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.try_map(source, move |payload| Ok(f(payload)))
    }

    /// Like [`map`](Self::map), with a mapper that may abort the tick.
    pub fn try_map<F>(&mut self, source: impl Unit, f: F) -> Event
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = format!("{} → *", self.name_of(source.node()));
        let derived = self.add_node(name, NodeKind::Event { derived: true });
        let transform = transform_fn(move |payload, _| f(payload));
        self.add_edge(source.node(), Edge::to(derived).with_transform(transform));
        Event(derived)
    }

    /// Derive an event that only fires when `predicate(payload)` holds.
    pub fn filter<F>(&mut self, source: impl Unit, predicate: F) -> Event
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let name = format!("{} →? *", self.name_of(source.node()));
        let derived = self.add_node(name, NodeKind::Event { derived: true });
        let filter = filter_fn(move |payload, _| Ok(predicate(payload)));
        self.add_edge(source.node(), Edge::to(derived).with_filter(filter));
        Event(derived)
    }

    /// Derive an event carrying `f(payload)`, skipping `None`.
    pub fn filter_map<F>(&mut self, source: impl Unit, f: F) -> Event
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let name = format!("{} →? *", self.name_of(source.node()));
        let derived = self.add_node(name, NodeKind::Event { derived: true });
        let f = Arc::new(f);
        let guard = Arc::clone(&f);
        let edge = Edge::to(derived)
            .with_filter(filter_fn(move |payload, _| Ok(guard(payload).is_some())))
            .with_transform(transform_fn(move |payload, _| {
                Ok(f(payload).unwrap_or(Value::Null))
            }));
        self.add_edge(source.node(), edge);
        Event(derived)
    }

    /// Derive a store holding `f(state)` of another store.
    pub fn map_store<F>(&mut self, store: Store, f: F) -> Store
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let name = format!("{} → *", self.name_of(store.0));
        let combine: CombineFn = Arc::new(move |values: &[&Value]| f(values[0]));
        Store(self.derive_store(name, smallvec![store.0], combine))
    }

    /// Derive a store from several stores.
    pub fn combine<F>(&mut self, name: impl Into<String>, stores: &[Store], f: F) -> Store
    where
        F: Fn(&[&Value]) -> Value + Send + Sync + 'static,
    {
        let sources = stores.iter().map(|store| store.0).collect();
        Store(self.derive_store(name.into(), sources, Arc::new(f)))
    }

    /// Declare a `sample` link. Returns the derived event carrying the
    /// sampled value; when the sample has a target it is wired there too.
    pub fn sample(&mut self, sample: Sample) -> Event {
        let Sample {
            source,
            mut clock,
            filter,
            map,
            target,
        } = sample;
        let label = source
            .or_else(|| clock.first().copied())
            .map(|id| self.name_of(id))
            .unwrap_or_else(|| "sample".to_string());

        let read = match source {
            None => None,
            Some(source) if clock.is_empty() => {
                clock.push(source);
                None
            }
            Some(source) if self.is_store(source) => Some(source),
            Some(source) => {
                // Events carry no state: mirror the last payload into a
                // hidden store so the clock has something to read.
                let last = self.add_node(
                    format!("{label}.last"),
                    NodeKind::Store {
                        default: Value::Null,
                        derived: true,
                        serialize: false,
                    },
                );
                self.add_edge(source, Edge::to(last));
                Some(last)
            }
        };

        let link = self.add_node(
            format!("{label}.sample"),
            NodeKind::Computed(Computation::Sample {
                source: read,
                filter,
                map,
            }),
        );
        for unit in &clock {
            self.add_edge(*unit, Edge::to(link));
        }
        let output = self.add_node(format!("{label} → *"), NodeKind::Event { derived: true });
        self.add_edge(link, Edge::to(output));
        if let Some(target) = target {
            self.owns(target);
            self.add_edge(output, Edge::to(target));
        }
        Event(output)
    }

    /// Run `callback` with every payload of `unit`.
    pub fn watch<F>(&mut self, unit: impl Unit, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let name = format!("{}.watch", self.name_of(unit.node()));
        let link = self.add_node(name, NodeKind::Computed(Computation::Watch(Arc::new(callback))));
        self.add_edge(unit.node(), Edge::to(link));
    }

    /// Freeze the declared topology.
    pub fn build(self) -> Result<Graph> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut sids = IndexMap::new();
        for node in &self.nodes {
            if let Some(sid) = &node.sid {
                if sids.insert(sid.clone(), node.id).is_some() {
                    return Err(Error::DuplicateSid(sid.to_string()));
                }
            }
        }
        debug!(
            graph = %self.id,
            nodes = self.nodes.len(),
            sids = sids.len(),
            "graph built"
        );
        Ok(Graph::new(self.id, self.nodes, sids))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn add_node(&mut self, name: String, kind: NodeKind) -> NodeId {
        let id = NodeId::new(self.id, self.nodes.len());
        self.nodes.push(Node::new(id, name, kind, self.domain));
        id
    }

    fn add_edge(&mut self, from: NodeId, edge: Edge) {
        if self.owns(from) && self.owns(edge.to) {
            self.nodes[from.index()].edges.push(edge);
        }
    }

    /// Check that `id` was declared by this builder, recording the first
    /// foreign handle seen.
    fn owns(&mut self, id: NodeId) -> bool {
        if id.graph() == self.id && id.index() < self.nodes.len() {
            return true;
        }
        if self.error.is_none() {
            self.error = Some(Error::InvalidArgument(format!(
                "unit {id} belongs to another graph"
            )));
        }
        false
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|node| node.id == id)
    }

    fn name_of(&self, id: NodeId) -> String {
        self.node(id)
            .map(|node| node.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn is_store(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(Node::is_store)
    }

    fn default_of(&self, id: NodeId) -> &Value {
        self.node(id).and_then(Node::default_value).unwrap_or(&NULL)
    }

    fn domain_path(&self, name: &str) -> String {
        let mut parts = vec![name.to_string()];
        let mut cursor = self.domain;
        while let Some(id) = cursor {
            let domain = &self.nodes[id.index()];
            parts.push(domain.name.clone());
            cursor = domain.domain;
        }
        parts.reverse();
        parts.join("/")
    }

    fn derive_sid(&mut self, name: &str) -> Sid {
        let path = self.domain_path(name);
        let ordinal = self.ordinals.entry(path.clone()).or_insert(0);
        let sid = Sid::derive(&self.config.sid_prefix, &path, *ordinal);
        *ordinal += 1;
        sid
    }

    fn effect_node(&mut self, name: String, handler: Handler) -> Effect {
        let derived_event = || NodeKind::Event { derived: true };
        let finally = self.add_node(format!("{name}.finally"), derived_event());
        let done = self.add_node(format!("{name}.done"), derived_event());
        let fail = self.add_node(format!("{name}.fail"), derived_event());
        let done_data = self.add_node(format!("{name}.done_data"), derived_event());
        let fail_data = self.add_node(format!("{name}.fail_data"), derived_event());
        let in_flight = self.add_node(
            format!("{name}.in_flight"),
            NodeKind::Store {
                default: json!(0),
                derived: true,
                serialize: false,
            },
        );
        let pending_fn: CombineFn =
            Arc::new(|values: &[&Value]| Value::Bool(values[0].as_u64().unwrap_or(0) > 0));
        let pending =
            self.derive_store(format!("{name}.pending"), smallvec![in_flight], pending_fn);

        let decrement = transform_fn(move |_, view| {
            let running = view.value(in_flight).as_u64().unwrap_or(0);
            Ok(json!(running.saturating_sub(1)))
        });
        self.add_edge(finally, Edge::to(in_flight).with_transform(decrement));
        self.add_edge(
            finally,
            Edge::to(done)
                .with_filter(status_is("done"))
                .with_transform(transform_fn(|payload, _| {
                    Ok(json!({
                        "params": payload["params"].clone(),
                        "result": payload["result"].clone(),
                    }))
                })),
        );
        self.add_edge(
            finally,
            Edge::to(fail)
                .with_filter(status_is("fail"))
                .with_transform(transform_fn(|payload, _| {
                    Ok(json!({
                        "params": payload["params"].clone(),
                        "error": payload["error"].clone(),
                    }))
                })),
        );
        self.add_edge(
            done,
            Edge::to(done_data)
                .with_transform(transform_fn(|payload, _| Ok(payload["result"].clone()))),
        );
        self.add_edge(
            fail,
            Edge::to(fail_data)
                .with_transform(transform_fn(|payload, _| Ok(payload["error"].clone()))),
        );

        let parts = EffectParts {
            finally,
            done,
            fail,
            done_data,
            fail_data,
            in_flight,
            pending,
        };
        let id = self.add_node(name, NodeKind::Effect { handler, parts });
        Effect { id, parts }
    }

    /// Declare a derived store plus the combine link that maintains it.
    fn derive_store(
        &mut self,
        name: String,
        sources: SmallVec<[NodeId; 4]>,
        combine: CombineFn,
    ) -> NodeId {
        for source in &sources {
            self.owns(*source);
        }
        let defaults: Vec<&Value> = sources.iter().map(|id| self.default_of(*id)).collect();
        let default = combine(defaults.as_slice());
        let link_name = format!("{name}.combine");
        let target = self.add_node(
            name,
            NodeKind::Store {
                default,
                derived: true,
                serialize: false,
            },
        );
        let link = self.add_node(
            link_name,
            NodeKind::Computed(Computation::Combine {
                sources: sources.clone(),
                target,
                combine,
            }),
        );
        for source in &sources {
            self.add_edge(*source, Edge::to(link));
        }
        self.add_edge(link, Edge::to(target));
        target
    }
}

fn status_is(status: &'static str) -> super::node::FilterFn {
    filter_fn(move |payload, _| Ok(payload["status"] == status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_get_stable_sids() {
        let build = || {
            let mut builder = GraphBuilder::new();
            let a = builder.store("$a", json!(0));
            let b = builder.store("$a", json!(0));
            let graph = builder.build().unwrap();
            let sid_a = graph.node(a.id()).unwrap().sid().cloned().unwrap();
            let sid_b = graph.node(b.id()).unwrap().sid().cloned().unwrap();
            (sid_a, sid_b)
        };
        let first = build();
        let second = build();
        assert_eq!(first, second);
        assert_ne!(first.0, first.1);
    }

    #[test]
    fn auto_sid_can_be_disabled() {
        let mut builder = GraphBuilder::with_config(GraphConfig::new().with_auto_sid(false));
        let plain = builder.store("$plain", json!(1));
        let named = builder.store_with("$named", json!(2), StoreConfig::new().with_sid("named"));
        let graph = builder.build().unwrap();
        assert!(graph.node(plain.id()).unwrap().sid().is_none());
        assert_eq!(graph.find_sid("named").map(Node::id), Some(named.id()));
    }

    #[test]
    fn duplicate_sids_fail_the_build() {
        let mut builder = GraphBuilder::new();
        builder.store_with("$a", json!(0), StoreConfig::new().with_sid("same"));
        builder.store_with("$b", json!(0), StoreConfig::new().with_sid("same"));
        assert_eq!(builder.build().unwrap_err(), Error::DuplicateSid("same".into()));
    }

    #[test]
    fn foreign_handles_fail_the_build() {
        let mut other = GraphBuilder::new();
        let foreign = other.event("foreign");

        let mut builder = GraphBuilder::new();
        let store = builder.store("$local", json!(0));
        builder.on(store, foreign, |_, payload| payload.clone());
        assert!(matches!(builder.build(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn derived_units_are_named_after_their_parent() {
        let mut builder = GraphBuilder::new();
        let trigger = builder.event("trigger");
        let mapped = builder.map(trigger, |payload| payload.clone());
        let store = builder.store("$count", json!(2));
        let doubled = builder.map_store(store, |value| json!(value.as_i64().unwrap_or(0) * 2));
        let graph = builder.build().unwrap();

        let mapped = graph.node(mapped.id()).unwrap();
        assert_eq!(mapped.name(), "trigger → *");
        assert!(mapped.is_derived());

        let doubled = graph.node(doubled.id()).unwrap();
        assert_eq!(doubled.name(), "$count → *");
        assert_eq!(doubled.default_value(), Some(&json!(4)));
        assert!(doubled.sid().is_none());
    }

    #[test]
    fn domains_scope_sid_derivation() {
        let mut builder = GraphBuilder::new();
        let root = builder.store("$user", json!(null));
        let domain = builder.domain("session");
        let scoped = builder.in_domain(domain, |b| b.store("$user", json!(null)));
        let graph = builder.build().unwrap();

        let root = graph.node(root.id()).unwrap();
        let scoped = graph.node(scoped.id()).unwrap();
        assert_ne!(root.sid(), scoped.sid());
        assert_eq!(scoped.domain(), Some(domain.id()));
    }

    #[test]
    fn effects_declare_their_helper_units() {
        let mut builder = GraphBuilder::new();
        let fx = builder.effect_fn("fetchFx", |params| Ok(params));
        let declared = builder.node_count();
        let graph = builder.build().unwrap();

        assert_eq!(graph.node_count(), declared);
        assert_eq!(graph.nodes().filter(|node| node.is_store()).count(), 2);
        assert_eq!(graph.node(fx.done().id()).unwrap().name(), "fetchFx.done");
        assert_eq!(graph.node(fx.pending().id()).unwrap().default_value(), Some(&json!(false)));
        let finally = graph.node(fx.finally().id()).unwrap();
        let targets: Vec<_> = finally.edges().iter().map(Edge::target).collect();
        assert_eq!(targets, vec![fx.in_flight().id(), fx.done().id(), fx.fail().id()]);
    }
}
