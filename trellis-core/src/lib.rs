//! Trellis Core
//!
//! This crate provides the scope-aware execution engine of the Trellis
//! reactive state library. It implements:
//!
//! - A unit graph of stores, events and effects, built once and shared
//! - Isolated scopes with their own state, forked from a graph
//! - Tick-based propagation through samples, combines and watchers
//! - Tracking of asynchronous effects until a scope settles
//! - Snapshots of scope state keyed by stable ids, in JSON or MessagePack
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Unit declarations, the graph builder and stable ids
//! - `reactive`: Scopes, the transaction scheduler, effects and snapshots
//! - `error`: The crate's error type
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use trellis_core::{all_settled, fork, serialize, ForkConfig, GraphBuilder, SettleConfig};
//!
//! let mut builder = GraphBuilder::new();
//! let fetch_user = builder.effect_fn("fetchUser", |id| Ok(json!({ "id": id })));
//! let user = builder.store("$user", json!(null));
//! builder.on(user, fetch_user.done_data(), |_, user| user.clone());
//! let graph = builder.build()?;
//!
//! // One scope per request
//! let scope = fork(&graph, ForkConfig::new());
//! all_settled(fetch_user, SettleConfig::new(&scope).params(json!(7))).await?;
//!
//! // Ship the changed stores to the client
//! let snapshot = serialize(&scope);
//! let client = fork(&graph, ForkConfig::new().values(snapshot));
//! assert_eq!(client.get_state(user), Some(json!({ "id": 7 })));
//! ```

pub mod error;
pub mod graph;
pub mod reactive;

pub use error::{Error, Result};
pub use graph::{
    Attach, Domain, Effect, Event, Graph, GraphBuilder, GraphConfig, NodeId, Sample, Sid, Store,
    StoreConfig, Unit,
};
pub use reactive::{
    all_settled, fork, hydrate, serialize, serialize_with, EffectContext, EffectResult, ForkConfig,
    Scope, ScopeId, SerializeOptions, SettleConfig, Snapshot, StateView, Target,
};
