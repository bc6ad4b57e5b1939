//! Integration Tests for the Scope Engine
//!
//! These tests drive graphs through forked scopes the way an application
//! would: trigger a unit, wait for the scope to settle, inspect or serialize
//! the result.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use trellis_core::graph::Node;
use trellis_core::{
    all_settled, fork, hydrate, serialize, serialize_with, Attach, Effect, EffectContext,
    EffectResult, Error, ForkConfig, Graph, GraphBuilder, Sample, SerializeOptions, SettleConfig,
    Snapshot, Store, StoreConfig,
};

fn sid(graph: &Graph, store: Store) -> String {
    graph
        .node(store.id())
        .and_then(Node::sid)
        .map(ToString::to_string)
        .unwrap()
}

async fn sleep(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn append_params(list: &Value, done: &Value) -> Value {
    let mut items = list.as_array().cloned().unwrap_or_default();
    items.push(done["params"].clone());
    Value::Array(items)
}

/// Test that the first argument is validated before anything runs.
#[tokio::test]
async fn first_argument_validation() {
    let mut builder = GraphBuilder::new();
    let fx = builder.effect_fn("fx", |_| Ok(Value::Null));
    let event = builder.event("event");
    let store = builder.store("$store", json!(0));
    let domain = builder.domain("domain");
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let err = all_settled(Value::Null, SettleConfig::new(&scope)).await.unwrap_err();
    assert_eq!(err.to_string(), "first argument should be unit");

    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Done(Value::Null)));

    let result = all_settled(event, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, None);

    let result = all_settled(store, SettleConfig::new(&scope).params(json!(10)))
        .await
        .unwrap();
    assert_eq!(result, None);

    let err = all_settled(domain, SettleConfig::new(&scope)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "first argument accepts only effects, events, stores or scopes"
    );
}

/// Test that units from another graph are rejected.
#[tokio::test]
async fn foreign_units_are_rejected() {
    let mut other = GraphBuilder::new();
    let foreign = other.event("foreign");
    other.build().unwrap();

    let graph = GraphBuilder::new().build().unwrap();
    let scope = fork(&graph, ForkConfig::new());
    let err = all_settled(foreign, SettleConfig::new(&scope)).await.unwrap_err();
    assert_eq!(err.to_string(), "first argument should be unit");
    assert_eq!(scope.pending(), 0);
}

/// Test that derived units are refused with their derived names.
#[tokio::test]
async fn derived_units_are_not_accepted() {
    let mut builder = GraphBuilder::new();
    let foo = builder.store("$foo", json!(0));
    let bar = builder.combine("$bar", &[foo], |values| values[0].clone());
    let trigger = builder.event("trigger");
    let derived = builder.map(trigger, |x| x.clone());
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());

    let err = all_settled(bar, SettleConfig::new(&scope).params(json!(1)))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "[allSettled] unit '$bar': unit should be targetable"
    );

    let err = all_settled(derived, SettleConfig::new(&scope)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "[allSettled] unit 'trigger → *': unit should be targetable"
    );
}

/// Test that waiting on a scope covers effects launched earlier.
#[tokio::test]
async fn all_settled_scope_waits_for_running_effects() {
    let mut builder = GraphBuilder::new();
    let request_fx = builder.effect("requestFx", |_, _| async {
        sleep(40).await;
        Ok(Value::Null)
    });
    let done = builder.store("$done", json!(false));
    builder.sample(
        Sample::clock(request_fx.done())
            .map(|_, _| json!(true))
            .target(done),
    );
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    scope.launch(request_fx, Value::Null).unwrap();
    all_settled(&scope, SettleConfig::default()).await.unwrap();

    let snapshot = serialize(&scope);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get(&sid(&graph, done)), Some(&json!(true)));
}

/// Test the result reported for a resolving effect.
#[tokio::test]
async fn effect_resolving() {
    let mut builder = GraphBuilder::new();
    let fx = builder.effect("fx", |_, _| async { Ok(json!("ok")) });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Done(json!("ok"))));
}

/// Test the result reported for a rejecting effect.
#[tokio::test]
async fn effect_rejecting() {
    let mut builder = GraphBuilder::new();
    let fx = builder.effect("fx", |_, _| async { Err(json!("err")) });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Fail(json!("err"))));
}

/// Test that events and stores resolve to nothing.
#[tokio::test]
async fn event_and_store_calls_return_nothing() {
    let mut builder = GraphBuilder::new();
    let event = builder.event("event");
    let store = builder.store("$store", json!("value"));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    assert_eq!(all_settled(event, SettleConfig::new(&scope)).await.unwrap(), None);
    let result = all_settled(store, SettleConfig::new(&scope).params(json!("value in scope")))
        .await
        .unwrap();
    assert_eq!(result, None);
}

/// Test that a failure of the wrapped effect surfaces through `attach`.
#[tokio::test]
async fn attach_reports_failure_of_the_inner_effect() {
    let mut builder = GraphBuilder::new();
    let inner = builder.effect("inner", |_, _| async { Err(json!("err")) });
    let fx = builder.attach(Attach::new(inner).map_params(|_, _| Ok(Value::Null)));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Fail(json!("err"))));
}

/// Test that a failing parameter mapper fails the call without running the
/// wrapped effect.
#[tokio::test]
async fn attach_reports_mapper_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut builder = GraphBuilder::new();
    let inner = builder.effect_fn("inner", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(json!("err"))
    });
    let fx = builder.attach(
        Attach::new(inner).map_params(|_, _| Err(json!("mapParams error"))),
    );
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Fail(json!("mapParams error"))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test that a panicking parameter mapper fails the call like a rejected one.
#[tokio::test]
async fn attach_reports_mapper_panic() {
    let mut builder = GraphBuilder::new();
    let inner = builder.effect_fn("inner", Ok);
    let fx = builder.attach(Attach::new(inner).map_params(|_, _| panic!("mapParams error")));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let result = all_settled(fx, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(result, Some(EffectResult::Fail(json!("mapParams error"))));
    assert_eq!(scope.pending(), 0);
}

/// Test that an attached effect reads its source store from the scope.
#[tokio::test]
async fn attach_reads_source_from_the_scope() {
    let mut builder = GraphBuilder::new();
    let token = builder.store("$token", json!(null));
    let inner = builder.effect_fn("fetch", Ok);
    let fx = builder.attach(
        Attach::new(inner)
            .source(token)
            .map_params(|params, token| Ok(json!({ "id": params, "token": token }))),
    );
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new().value(token, json!("t-1")));
    let result = all_settled(fx, SettleConfig::new(&scope).params(json!(3)))
        .await
        .unwrap();
    assert_eq!(
        result,
        Some(EffectResult::Done(json!({ "id": 3, "token": "t-1" })))
    );
}

/// Test that declaring units from a watcher does not disturb the running
/// queue.
#[tokio::test]
async fn declaring_units_inside_a_watcher() {
    let declared = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&declared);

    let mut builder = GraphBuilder::new();
    let trigger = builder.event("trigger");
    let eff = builder.effect("eff", |_, _| async {
        sleep(20).await;
        Ok(Value::Null)
    });
    builder.watch(eff.done(), move |_| {
        let mut later = GraphBuilder::new();
        later.event("newEvent");
        seen.fetch_add(later.node_count(), Ordering::SeqCst);
    });
    builder.sample(Sample::source(trigger).target(eff));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    all_settled(trigger, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(declared.load(Ordering::SeqCst), 1);
    assert_eq!(scope.pending(), 0);
}

async fn request_sequential(
    ctx: EffectContext,
    x: Value,
    inner1: Effect,
    inner2: Effect,
) -> Result<Value, Value> {
    ctx.call(inner1, x.clone()).await?;
    ctx.call(inner2, x.clone()).await?;
    let again = format!("{} 2", x.as_str().unwrap_or_default());
    ctx.call(inner1, json!(again)).await?;
    Ok(Value::Null)
}

/// Test that nested effect chains in two scopes settle independently while
/// more units are declared.
#[tokio::test]
async fn nested_effect_chains_in_two_scopes() {
    let mut builder = GraphBuilder::new();
    let trigger = builder.event("trigger");
    let inner1 = builder.effect("inner1", |_, _| async {
        sleep(20).await;
        Ok(Value::Null)
    });
    let inner2 = builder.effect("inner2", |_, _| async {
        sleep(20).await;
        Ok(Value::Null)
    });
    let req1 = builder.effect("req1", move |x, ctx| request_sequential(ctx, x, inner1, inner2));
    let words = builder.store("$words", json!([]));
    builder.on(words, inner2.done(), append_params);
    let text = builder.store("$str", json!("-"));
    builder.on(text, trigger, |_, x| x.clone());
    builder.sample(Sample::source(text).target(req1));
    let graph = builder.build().unwrap();

    let scope1 = fork(&graph, ForkConfig::new());
    let first = tokio::spawn(all_settled(
        trigger,
        SettleConfig::new(&scope1).params(json!("a")),
    ));

    // A second, parallel variant declared while the first scope is busy.
    let mut builder = GraphBuilder::new();
    let trigger2 = builder.event("trigger");
    let p_inner1 = builder.effect("inner1", |_, _| async {
        sleep(20).await;
        Ok(Value::Null)
    });
    let p_inner2 = builder.effect("inner2", |_, _| async {
        sleep(15).await;
        Ok(Value::Null)
    });
    let p_req1 = builder.effect("req1", move |x: Value, ctx: EffectContext| async move {
        let (a, b) = tokio::join!(ctx.call(p_inner1, x.clone()), ctx.call(p_inner2, x));
        a.and(b)
    });
    let words2 = builder.store("$words", json!([]));
    builder.on(words2, p_inner2.done(), append_params);
    let text2 = builder.store("$str", json!("-"));
    builder.on(text2, trigger2, |_, x| x.clone());
    builder.sample(Sample::source(text2).target(p_req1));
    let graph2 = builder.build().unwrap();

    let scope2 = fork(&graph2, ForkConfig::new());
    let second = tokio::spawn(all_settled(
        trigger2,
        SettleConfig::new(&scope2).params(json!("b")),
    ));

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let snapshot1 = serialize(&scope1);
    assert_eq!(snapshot1.len(), 2);
    assert_eq!(snapshot1.get(&sid(&graph, text)), Some(&json!("a")));
    assert_eq!(snapshot1.get(&sid(&graph, words)), Some(&json!(["a"])));

    let snapshot2 = serialize(&scope2);
    assert_eq!(snapshot2.len(), 2);
    assert_eq!(snapshot2.get(&sid(&graph2, text2)), Some(&json!("b")));
    assert_eq!(snapshot2.get(&sid(&graph2, words2)), Some(&json!(["b"])));
}

/// Test that a store used as the starting unit is serialized.
#[tokio::test]
async fn starting_store_is_serialized() {
    let mut builder = GraphBuilder::new();
    let store = builder.store("$store", json!("value"));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    all_settled(store, SettleConfig::new(&scope).params(json!("value in scope")))
        .await
        .unwrap();

    assert_eq!(
        serialize(&scope).get(&sid(&graph, store)),
        Some(&json!("value in scope"))
    );
    assert_eq!(scope.get_state(store), Some(json!("value in scope")));
}

/// Test that a store feeding back into itself serializes its final value.
#[tokio::test]
async fn starting_store_affected_twice() {
    let mut builder = GraphBuilder::new();
    let store = builder.store("$store", json!("value"));
    builder.sample(
        Sample::source(store)
            .filter(|value, _| !value.as_str().unwrap_or_default().contains('1'))
            .map(|value, _| json!(format!("{}1", value.as_str().unwrap_or_default())))
            .target(store),
    );
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    all_settled(store, SettleConfig::new(&scope).params(json!("value in scope")))
        .await
        .unwrap();

    assert_eq!(
        serialize(&scope).get(&sid(&graph, store)),
        Some(&json!("value in scope1"))
    );
    assert_eq!(scope.get_state(store), Some(json!("value in scope1")));
}

/// Test the server-to-client round trip through a JSON snapshot.
#[tokio::test]
async fn snapshot_round_trip_seeds_a_new_scope() {
    let mut builder = GraphBuilder::new();
    let load = builder.effect_fn("loadUser", |id| Ok(json!({ "id": id, "name": "Ada" })));
    let user = builder.store("$user", json!(null));
    builder.on(user, load.done_data(), |_, user| user.clone());
    let greeting = builder.map_store(user, |user| {
        json!(format!("hi {}", user["name"].as_str().unwrap_or("stranger")))
    });
    let graph = builder.build().unwrap();

    let server = fork(&graph, ForkConfig::new());
    all_settled(load, SettleConfig::new(&server).params(json!(1)))
        .await
        .unwrap();
    let mut snapshot = Snapshot::from_json(&serialize(&server).to_json().unwrap()).unwrap();
    snapshot.insert("no-such-sid", json!(true));

    let client = fork(&graph, ForkConfig::new().values(snapshot));
    assert_eq!(client.get_state(user), server.get_state(user));
    assert_eq!(client.get_state(greeting), Some(json!("hi Ada")));
    assert_eq!(serialize(&client), serialize(&server));
}

/// Test that MessagePack snapshots carry the same values.
#[tokio::test]
async fn msgpack_snapshots_round_trip() {
    let mut builder = GraphBuilder::new();
    let items = builder.store_with("$items", json!([]), StoreConfig::new().with_sid("items"));
    let flag = builder.store_with("$flag", json!(false), StoreConfig::new().with_sid("flag"));
    let graph = builder.build().unwrap();

    let scope = fork(
        &graph,
        ForkConfig::new()
            .value(items, json!([1, "two", { "three": 3.5 }]))
            .value(flag, json!(true)),
    );
    let bytes = serialize(&scope).to_msgpack().unwrap();
    let snapshot = Snapshot::from_msgpack(&bytes).unwrap();
    assert_eq!(snapshot, serialize(&scope));

    let other = fork(&graph, ForkConfig::new());
    hydrate(&other, &snapshot);
    assert_eq!(other.get_state(items), Some(json!([1, "two", { "three": 3.5 }])));
    assert_eq!(other.get_state(flag), Some(json!(true)));
}

/// Test that unchanged stores are included only on request.
#[tokio::test]
async fn serialize_options_control_membership() {
    let mut builder = GraphBuilder::new();
    let a = builder.store("$a", json!(1));
    let b = builder.store("$b", json!(2));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    all_settled(a, SettleConfig::new(&scope).params(json!(10)))
        .await
        .unwrap();

    assert_eq!(serialize(&scope).len(), 1);
    let all = serialize_with(&scope, SerializeOptions::new().with_only_changes(false));
    assert_eq!(all.get(&sid(&graph, a)), Some(&json!(10)));
    assert_eq!(all.get(&sid(&graph, b)), Some(&json!(2)));
}

/// Test that handler overrides apply to one scope only.
#[tokio::test]
async fn handler_overrides_are_scoped() {
    let mut builder = GraphBuilder::new();
    let fetch = builder.effect_fn("fetch", |_| Ok(json!("real")));
    let graph = builder.build().unwrap();

    let mocked = fork(
        &graph,
        ForkConfig::new().handler_fn(fetch, |_| Ok(json!("mock"))),
    );
    let real = fork(&graph, ForkConfig::new());

    let (mocked_result, real_result) = tokio::join!(
        all_settled(fetch, SettleConfig::new(&mocked)),
        all_settled(fetch, SettleConfig::new(&real)),
    );
    assert_eq!(mocked_result.unwrap(), Some(EffectResult::Done(json!("mock"))));
    assert_eq!(real_result.unwrap(), Some(EffectResult::Done(json!("real"))));
}

/// Test that `pending` follows the number of running calls.
#[tokio::test]
async fn pending_follows_in_flight_calls() {
    let mut builder = GraphBuilder::new();
    let slow = builder.effect("slow", |ms: Value, _| async move {
        sleep(ms.as_u64().unwrap_or(0)).await;
        Ok(ms)
    });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    scope.launch(slow, json!(10)).unwrap();
    scope.launch(slow, json!(30)).unwrap();
    assert_eq!(scope.get_state(slow.in_flight()), Some(json!(2)));
    assert_eq!(scope.get_state(slow.pending()), Some(json!(true)));
    assert_eq!(scope.pending(), 2);

    scope.settled().await;
    assert_eq!(scope.get_state(slow.in_flight()), Some(json!(0)));
    assert_eq!(scope.get_state(slow.pending()), Some(json!(false)));
    assert_eq!(scope.pending(), 0);
}

/// Test that a combine recomputes once per tick however many sources change.
#[tokio::test]
async fn combine_recomputes_once_per_tick() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);

    let mut builder = GraphBuilder::new();
    let reset = builder.event("reset");
    let a = builder.store("$a", json!(1));
    let b = builder.store("$b", json!(2));
    builder.on(a, reset, |_, _| json!(0));
    builder.on(b, reset, |_, _| json!(0));
    let sum = builder.combine("$sum", &[a, b], move |values| {
        counter.fetch_add(1, Ordering::SeqCst);
        json!(values.iter().filter_map(|v| v.as_i64()).sum::<i64>())
    });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    assert_eq!(scope.get_state(sum), Some(json!(3)));
    let before = runs.load(Ordering::SeqCst);

    all_settled(reset, SettleConfig::new(&scope)).await.unwrap();
    assert_eq!(scope.get_state(sum), Some(json!(0)));
    assert_eq!(runs.load(Ordering::SeqCst), before + 1);
}

/// Test that a failing reducer aborts the tick but keeps earlier writes.
#[tokio::test]
async fn failing_reducer_aborts_the_tick() {
    let mut builder = GraphBuilder::new();
    let submit = builder.event("submit");
    let draft = builder.store("$draft", json!(""));
    let saved = builder.store("$saved", json!(null));
    builder.on(draft, submit, |_, text| text.clone());
    builder.try_on(saved, submit, |_, text| {
        if text.as_str().is_some_and(str::is_empty) {
            Err(Error::custom("empty submission"))
        } else {
            Ok(text.clone())
        }
    });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let err = all_settled(submit, SettleConfig::new(&scope).params(json!("")))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "propagation failed at '$saved': empty submission");

    all_settled(submit, SettleConfig::new(&scope).params(json!("hello")))
        .await
        .unwrap();
    assert_eq!(scope.get_state(draft), Some(json!("hello")));
    assert_eq!(scope.get_state(saved), Some(json!("hello")));
}

/// Test that a panic during an effect's completion tick does not leave the
/// scope waiting forever.
#[tokio::test]
async fn panicking_completion_tick_still_settles() {
    let mut builder = GraphBuilder::new();
    let fx = builder.effect_fn("fx", Ok);
    builder.watch(fx.done_data(), |_| panic!("watcher failed"));
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    scope.launch(fx, json!(1)).unwrap();
    let settled = tokio::time::timeout(
        Duration::from_secs(1),
        all_settled(&scope, SettleConfig::default()),
    )
    .await;
    assert!(matches!(settled, Ok(Ok(None))));
    assert_eq!(scope.pending(), 0);
    assert_eq!(scope.get_state(fx.pending()), Some(json!(false)));
}

/// Test that a nested call resolves only after its completion tick has
/// updated the scope, with completions racing on several threads.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nested_calls_resolve_after_their_completion_tick() {
    let mut builder = GraphBuilder::new();
    let inner = builder.effect("inner", |params: Value, _ctx| async move {
        tokio::task::yield_now().await;
        Ok(params)
    });
    let seen = builder.store("$seen", json!([]));
    builder.on(seen, inner.done(), append_params);
    let outer = builder.effect("outer", move |params: Value, ctx: EffectContext| async move {
        let result = match ctx.call(inner, params).await {
            Ok(result) => result,
            Err(error) => return Err(error),
        };
        let applied = ctx
            .get_state(seen)
            .and_then(|seen| seen.as_array().map(|items| items.contains(&result)))
            .unwrap_or(false);
        if applied {
            Ok(result)
        } else {
            Err(json!("resolved before its completion tick"))
        }
    });
    let graph = builder.build().unwrap();

    let scope = fork(&graph, ForkConfig::new());
    let calls = (0..32).map(|i| all_settled(outer, SettleConfig::new(&scope).params(json!(i))));
    let results = futures_util::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), Some(EffectResult::Done(json!(i))));
    }
    assert_eq!(scope.pending(), 0);
}

/// Test that duplicate explicit sids fail the build.
#[test]
fn duplicate_sids_are_rejected() {
    let mut builder = GraphBuilder::new();
    builder.store_with("$a", json!(0), StoreConfig::new().with_sid("shared"));
    builder.store_with("$b", json!(0), StoreConfig::new().with_sid("shared"));
    assert_eq!(
        builder.build().unwrap_err(),
        Error::DuplicateSid("shared".to_string())
    );
}
