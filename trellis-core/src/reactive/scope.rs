//! Scopes
//!
//! A scope is an isolated execution context over a shared [`Graph`]: it owns
//! the value of every store, its own transaction queue, and a tracker of the
//! effects it has in flight. Two scopes forked from the same graph never see
//! each other's writes.
//!
//! # Draining
//!
//! The first launch into an idle scope becomes the drainer. It holds the
//! kernel lock while it processes pure transactions and releases it around
//! user callbacks (watchers, effect handler construction), so those callbacks
//! may read state or launch more units. A launch that finds the scope already
//! draining only appends to the queue; the active drainer picks it up.
//!
//! Reducers, edge filters and combine functions run under the lock. They
//! must not call back into the scope.
//!
//! # Effects
//!
//! Effect handlers run as tokio tasks. Each call is counted by the tracker
//! from the moment the effect node is processed until its completion tick
//! (`finally`, then `done`/`fail`) has drained.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{self, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use super::context::ScopeContext;
use super::effect::EffectContext;
use super::scheduler::{panic_value, Completion, Deferred, Kernel, Transaction};
use super::serialize::{apply_snapshot, Snapshot};
use super::settle::validate_unit;
use super::state::StateTable;
use super::tracker::EffectTracker;
use crate::error::Result;
use crate::graph::{Effect, Graph, Handler, HandlerFn, NodeId, Outcome, Store, Unit};

/// Unique identifier of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Settings for [`fork`].
#[derive(Default)]
pub struct ForkConfig {
    values: Option<Snapshot>,
    stores: Vec<(NodeId, Value)>,
    handlers: HashMap<NodeId, HandlerFn>,
}

impl ForkConfig {
    /// Start from the graph defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed stores from a snapshot, keyed by sid. Unknown sids are ignored.
    pub fn values(mut self, snapshot: Snapshot) -> Self {
        self.values = Some(snapshot);
        self
    }

    /// Seed one store directly. Applied after the snapshot.
    pub fn value(mut self, store: Store, value: Value) -> Self {
        self.stores.push((store.id(), value));
        self
    }

    /// Replace the implementation of `effect` in the forked scope only.
    pub fn handler<F, Fut>(mut self, effect: Effect, handler: F) -> Self
    where
        F: Fn(Value, EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |params, ctx| handler(params, ctx).boxed());
        self.handlers.insert(effect.id(), handler);
        self
    }

    /// Like [`handler`](Self::handler), with a synchronous implementation.
    pub fn handler_fn<F>(self, effect: Effect, handler: F) -> Self
    where
        F: Fn(Value) -> Outcome + Send + Sync + 'static,
    {
        self.handler(effect, move |params, _ctx| future::ready(handler(params)))
    }
}

impl fmt::Debug for ForkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkConfig")
            .field("values", &self.values)
            .field("stores", &self.stores)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Create an isolated scope over `graph`.
pub fn fork(graph: &Graph, config: ForkConfig) -> Scope {
    let ForkConfig {
        values,
        stores,
        handlers,
    } = config;

    let mut state = StateTable::seeded(graph);
    let mut seeded = 0;
    if let Some(values) = &values {
        seeded += apply_snapshot(graph, &mut state, values);
    }
    for (store, value) in stores {
        match graph.node(store) {
            Some(node) if node.is_store() && !node.is_derived() => {
                state.seed(store, value);
                seeded += 1;
            }
            _ => trace!(store = %store, "ignoring fork value for unknown store"),
        }
    }
    state.recompute_derived(graph);

    let scope = Scope {
        inner: Arc::new(ScopeInner {
            id: ScopeId::next(),
            graph: graph.clone(),
            kernel: Mutex::new(Kernel::new(state)),
            tracker: EffectTracker::new(),
            handlers,
        }),
    };
    debug!(
        scope = %scope.id(),
        graph = %graph.id(),
        seeded,
        overrides = scope.inner.handlers.len(),
        "scope forked"
    );
    scope
}

/// Isolated execution context. Cloning shares the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: ScopeId,
    graph: Graph,
    kernel: Mutex<Kernel>,
    tracker: EffectTracker,
    handlers: HashMap<NodeId, HandlerFn>,
}

impl Scope {
    /// Identifier of this scope.
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// The graph this scope evaluates.
    pub fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    /// Current value of `store` in this scope.
    pub fn get_state(&self, store: Store) -> Option<Value> {
        self.inner.kernel.lock().state.get(store.id()).cloned()
    }

    /// Trigger `unit` with `params` and drain synchronously.
    ///
    /// Effects reached by the drain are spawned on the current tokio runtime
    /// and keep running after this returns; await [`settled`](Self::settled)
    /// to wait for them. Called while the scope is draining, the unit is
    /// queued behind the active drain instead.
    pub fn launch(&self, unit: impl Unit, params: Value) -> Result<()> {
        validate_unit(self.graph(), unit.node())?;
        self.submit(Transaction::root(unit.node(), params))
    }

    /// Resolve once no effect or drain is in progress.
    pub async fn settled(&self) {
        self.inner.tracker.settled().await
    }

    /// Number of operations in progress.
    pub fn pending(&self) -> usize {
        self.inner.tracker.pending()
    }

    /// The scope whose watcher or effect handler is running on this thread.
    pub fn current() -> Option<Scope> {
        ScopeContext::current()
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&StateTable) -> R) -> R {
        f(&self.inner.kernel.lock().state)
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut StateTable) -> R) -> R {
        f(&mut self.inner.kernel.lock().state)
    }

    /// Queue `root` and, unless a drain is already active, drain to
    /// quiescence.
    pub(crate) fn submit(&self, root: Transaction) -> Result<()> {
        {
            let mut kernel = self.inner.kernel.lock();
            kernel.queue.push(&self.inner.graph, root);
            if kernel.draining {
                trace!(scope = %self.id(), "joined active drain");
                return Ok(());
            }
            kernel.draining = true;
        }

        self.inner.tracker.begin();
        let guard = DrainGuard { scope: self };
        let result = self.drain();
        drop(guard);

        if let Err(err) = &result {
            warn!(scope = %self.id(), error = %err, "tick aborted");
        }
        result
    }

    fn drain(&self) -> Result<()> {
        let graph = &self.inner.graph;
        let mut processed = 0usize;
        debug!(scope = %self.id(), "drain started");

        let completions = loop {
            let (work, completions) = {
                let mut kernel = self.inner.kernel.lock();
                let mut work = None;
                while let Some(tx) = kernel.queue.pop() {
                    processed += 1;
                    if let Some(deferred) = kernel.step(graph, tx)? {
                        if matches!(deferred, Deferred::Effect { .. }) {
                            self.inner.tracker.begin();
                        }
                        work = Some(deferred);
                        break;
                    }
                }
                match work {
                    Some(work) => (Some(work), Vec::new()),
                    None => (None, kernel.finish()),
                }
            };

            match work {
                Some(deferred) => self.run(deferred),
                None => break completions,
            }
        };

        debug!(scope = %self.id(), processed, "drain finished");
        self.release(completions);
        Ok(())
    }

    /// Answer the callers of finished effects and stop tracking them.
    fn release(&self, completions: Vec<Completion>) {
        for Completion { outcome, reply } in completions {
            if let Some(reply) = reply {
                // The caller may have stopped waiting.
                let _ = reply.send(outcome);
            }
            self.inner.tracker.end();
        }
    }

    fn run(&self, deferred: Deferred) {
        match deferred {
            Deferred::Watch { callback, payload } => {
                let _context = ScopeContext::enter(self);
                callback(&payload);
            }
            Deferred::Effect {
                effect,
                handler,
                finally,
                params,
                mapped,
                reply,
            } => self.spawn_effect(effect, handler, finally, params, mapped, reply),
        }
    }

    fn spawn_effect(
        &self,
        effect: NodeId,
        handler: Handler,
        finally: NodeId,
        params: Value,
        mapped: Option<Outcome>,
        reply: Option<oneshot::Sender<Outcome>>,
    ) {
        let name = self.inner.graph.get(effect).name();
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                error!(scope = %self.id(), effect = %name, "no tokio runtime to run effect on");
                let outcome = Err(Value::from("effect requires a tokio runtime"));
                self.finish_effect(effect, finally, params, outcome, reply);
                return;
            }
        };
        trace!(scope = %self.id(), effect = %name, "effect started");

        let ctx = EffectContext::new(self.clone());
        let future = match (self.inner.handlers.get(&effect).cloned(), handler) {
            (None, Handler::Attached { effect: inner, .. }) => {
                let mapped = mapped.unwrap_or_else(|| Ok(params.clone()));
                async move {
                    match mapped {
                        Ok(params) => ctx.call_node(inner, params).await,
                        Err(error) => Err(error),
                    }
                }
                .boxed()
            }
            (Some(run), _) | (None, Handler::Native(run)) => {
                let _context = ScopeContext::enter(self);
                let params = params.clone();
                panic::catch_unwind(AssertUnwindSafe(move || run(params, ctx)))
                    .unwrap_or_else(|panic| future::ready(Err(panic_value(panic))).boxed())
            }
        };

        let scope = self.clone();
        runtime.spawn(async move {
            let outcome = match tokio::spawn(future).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_panic() => Err(panic_value(err.into_panic())),
                Err(_) => Err(Value::from("effect task was cancelled")),
            };
            scope.finish_effect(effect, finally, params, outcome, reply);
        });
    }

    /// Queue the completion tick of one effect call. The call is released
    /// once the drain that processes it ends.
    fn finish_effect(
        &self,
        effect: NodeId,
        finally: NodeId,
        params: Value,
        outcome: Outcome,
        reply: Option<oneshot::Sender<Outcome>>,
    ) {
        let name = self.inner.graph.get(effect).name();
        let payload = match &outcome {
            Ok(result) => json!({ "status": "done", "params": params, "result": result }),
            Err(error) => json!({ "status": "fail", "params": params, "error": error }),
        };
        trace!(scope = %self.id(), effect = %name, status = %payload["status"], "effect settled");

        let tx =
            Transaction::root(finally, payload).with_completion(Completion { outcome, reply });
        match panic::catch_unwind(AssertUnwindSafe(|| self.submit(tx))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(
                    scope = %self.id(),
                    effect = %name,
                    error = %err,
                    "effect completion tick failed"
                );
            }
            Err(panic) => {
                let message = panic_value(panic);
                error!(
                    scope = %self.id(),
                    effect = %name,
                    panic = %message,
                    "effect completion tick panicked"
                );
            }
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("graph", &self.inner.graph.id())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Ends a drain, including one cut short by an error or a panicking
/// watcher. Effect calls whose completion ticks were cut short are still
/// released.
struct DrainGuard<'a> {
    scope: &'a Scope,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let inner = &self.scope.inner;
        let completions = {
            let mut kernel = inner.kernel.lock();
            if kernel.draining {
                let (dropped, completions) = kernel.abort();
                if dropped > 0 {
                    warn!(scope = %inner.id, dropped, "discarded queued transactions");
                }
                completions
            } else {
                Vec::new()
            }
        };
        self.scope.release(completions);
        inner.tracker.end();
    }
}
