//! End-to-end call tests: results, rejections, concurrency, reverse calls.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use anchor::Args;
use anchor::CallSettings;
use anchor::Context;
use anchor::Environment;
use anchor::Guest;
use anchor::GuestOptions;
use anchor::Host;
use anchor::HostOptions;
use anchor::MIN_ID_LENGTH;
use anchor::Method;
use anchor::RemoteError;
use anchor::Schema;
use anchor::Worker;
use anchor::rpc;
use anchor::with_transferable;

use common::connect_frame;
use common::connect_worker;
use common::init_tracing;

fn add() -> Method {
    Method::typed(|(a, b): (i64, i64), _ctx| async move { anyhow::Ok(a + b) })
}

fn echo() -> Method {
    Method::new(|args: Args, _ctx| async move { anyhow::Ok(args.get(0).cloned().unwrap_or(Value::Null)) })
}

// --- Test 1: Bidirectional calls ---

#[tokio::test]
async fn test_add_both_directions() {
    init_tracing();
    let host = Host::new();
    let (host_side, guest_side) = connect_worker(
        &host,
        Schema::map().with("add", add()),
        Schema::map().with("add", add()),
    )
    .await;

    let from_guest = guest_side.remote().call("add", vec![json!(2), json!(3)]).await.expect("guest call");
    assert_eq!(from_guest, json!(5));

    let from_host: i64 = host_side.remote().invoke("add", (2, 3)).await.expect("host call");
    assert_eq!(from_host, 5);
}

#[tokio::test]
async fn test_remote_mirrors_schema() {
    let host = Host::new();
    let host_schema = Schema::map()
        .with("version", json!("1.0"))
        .with("math", Schema::map().with("add", add()))
        .with("tools", Schema::list().push(json!("first")).push(echo()));
    let (_host_side, guest_side) = connect_worker(&host, host_schema, Schema::map()).await;
    let remote = guest_side.remote();

    assert_eq!(remote.get("version").and_then(|n| n.as_value()), Some(&json!("1.0")));
    assert!(remote.get("math.add").and_then(|n| n.as_stub()).is_some());
    assert_eq!(remote.get("tools.0").and_then(|n| n.as_value()), Some(&json!("first")));
    assert_eq!(remote.stub("tools.1").expect("stub").name(), "tools.1");
    assert_eq!(remote.call("tools.1", vec![json!("x")]).await.expect("call"), json!("x"));
    assert_eq!(
        remote.to_value(),
        json!({ "version": "1.0", "math": {}, "tools": ["first", null] })
    );
    assert!(matches!(remote.stub("math.sub"), Err(rpc::Error::MethodNotFound(_))));
    assert!(matches!(remote.stub("version"), Err(rpc::Error::MethodNotFound(_))));
}

// --- Test 2: Scenarios ---

#[tokio::test]
async fn test_nested_profile_scenario() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    let get = Method::typed(|(): (), _ctx| async {
        anyhow::Ok(Profile {
            name: "Alice".into(),
            age: 30,
        })
    });
    let host_schema = Schema::map().with("user", Schema::map().with("profile", Schema::map().with("get", get)));

    let host = Host::new();
    let setup = connect_frame(&host, host_schema, Schema::map()).await;

    let profile: Profile = setup.guest.remote().invoke("user.profile.get", ()).await.expect("call");
    assert_eq!(
        profile,
        Profile {
            name: "Alice".into(),
            age: 30
        }
    );
    let raw = setup.guest.remote().call("user.profile.get", vec![]).await.expect("call");
    assert_eq!(raw, json!({ "name": "Alice", "age": 30 }));
}

#[tokio::test]
async fn test_reverse_call_through_context() {
    init_tracing();
    let send = Method::new(|args: Args, ctx: Context| async move {
        let message: String = args.parse()?;
        let answer = ctx.remote().call("reply", vec![json!(format!("ACK {}", message))]).await?;
        anyhow::Ok(answer)
    });
    let reply = Method::typed(|text: String, _ctx| async move { anyhow::Ok(text + "!") });

    let host = Host::new();
    let setup = connect_frame(
        &host,
        Schema::map().with("send", send),
        Schema::map().with("reply", reply),
    )
    .await;

    let answer = setup.guest.remote().call("send", vec![json!("ping")]).await.expect("call");
    assert_eq!(answer, json!("ACK ping!"));
}

#[tokio::test]
async fn test_context_carries_connection_id() {
    let whoami = Method::new(|_args, ctx: Context| async move { anyhow::Ok(json!(ctx.connection_id().as_str())) });
    let host = Host::new();
    let (host_side, guest_side) = connect_worker(&host, Schema::map().with("whoami", whoami), Schema::map()).await;

    let id = guest_side.remote().call("whoami", vec![]).await.expect("call");
    assert_eq!(id, json!(host_side.id().as_str()));
}

// --- Test 3: Concurrency ---

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    init_tracing();
    let order = Arc::new(Mutex::new(Vec::new()));
    let finished = order.clone();
    let slow = Method::typed(move |(delay, tag): (u64, String), _ctx| {
        let finished = finished.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            finished.lock().push(tag.clone());
            anyhow::Ok(tag)
        }
    });

    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("slow", slow).with("add", add()), Schema::map()).await;
    let remote = guest_side.remote();

    let (first, second, sum) = tokio::join!(
        remote.invoke::<_, String>("slow", (60, "first")),
        remote.invoke::<_, String>("slow", (5, "second")),
        remote.invoke::<_, i64>("add", (40, 2)),
    );
    assert_eq!(first.expect("first"), "first");
    assert_eq!(second.expect("second"), "second");
    assert_eq!(sum.expect("sum"), 42);
    assert_eq!(*order.lock(), vec!["second".to_string(), "first".to_string()]);
}

#[tokio::test]
async fn test_many_calls_in_flight() {
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("add", add()), Schema::map()).await;
    let remote = guest_side.remote().clone();

    let calls = (0..50).map(|i| {
        let remote = remote.clone();
        tokio::spawn(async move { remote.invoke::<_, i64>("add", (i, i)).await })
    });
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        let sum = result.expect("task").expect("call");
        assert_eq!(sum, 2 * i as i64);
    }
}

// --- Test 4: Rejections ---

#[tokio::test]
async fn test_error_message_propagates() {
    init_tracing();
    let boom = Method::new(|_args, _ctx| async { Err::<Value, _>(anyhow::anyhow!("boom")) });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("boom", boom), Schema::map()).await;

    match guest_side.remote().call("boom", vec![]).await {
        Err(rpc::Error::Remote(e)) => {
            assert_eq!(e.message, "boom");
            assert!(e.props.is_empty());
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_properties_propagate() {
    let fail = Method::new(|_args, _ctx| async {
        Err::<Value, anyhow::Error>(RemoteError::new("not allowed").with_prop("code", 403).into())
    });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("fail", fail), Schema::map()).await;

    match guest_side.remote().call("fail", vec![]).await {
        Err(rpc::Error::Remote(e)) => {
            assert_eq!(e.message, "not allowed");
            assert_eq!(e.prop("code"), Some(&json!(403)));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_nested_rejection_keeps_properties() {
    let inner = Method::new(|_args, _ctx| async {
        Err::<Value, anyhow::Error>(RemoteError::new("deep").with_prop("level", 2).into())
    });
    let outer = Method::new(|_args, ctx: Context| async move {
        let value = ctx.remote().call("inner", vec![]).await?;
        anyhow::Ok(value)
    });

    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(
        &host,
        Schema::map().with("outer", outer),
        Schema::map().with("inner", inner),
    )
    .await;

    match guest_side.remote().call("outer", vec![]).await {
        Err(rpc::Error::Remote(e)) => {
            assert_eq!(e.message, "deep");
            assert_eq!(e.prop("level"), Some(&json!(2)));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panicking_handler_rejects() {
    let explode = Method::new(|_args, _ctx| async {
        if true {
            panic!("kaboom");
        }
        anyhow::Ok(Value::Null)
    });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(
        &host,
        Schema::map().with("explode", explode).with("add", add()),
        Schema::map(),
    )
    .await;

    match guest_side.remote().call("explode", vec![]).await {
        Err(rpc::Error::Remote(e)) => assert_eq!(e.message, "kaboom"),
        other => panic!("expected rejection, got {:?}", other),
    }
    // the listener survived
    let sum: i64 = guest_side.remote().invoke("add", (1, 1)).await.expect("call");
    assert_eq!(sum, 2);
}

// --- Test 5: Serialization ---

#[tokio::test]
async fn test_unserializable_argument_fails_before_sending() {
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("echo", echo()), Schema::map()).await;

    let mut bad = HashMap::new();
    bad.insert((1, 2), "tuple keys are not cloneable");
    let result: Result<Value, _> = guest_side.remote().invoke("echo", (bad,)).await;
    assert!(matches!(result, Err(rpc::Error::Serialize(_))));
}

#[tokio::test]
async fn test_unserializable_result_rejects() {
    let broken = Method::typed(|(): (), _ctx| async {
        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);
        anyhow::Ok(bad)
    });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("broken", broken), Schema::map()).await;

    let result = guest_side.remote().call("broken", vec![]).await;
    assert!(matches!(result, Err(rpc::Error::Remote(_))));
}

#[tokio::test]
async fn test_bad_arguments_reject() {
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("add", add()), Schema::map()).await;

    let result = guest_side.remote().call("add", vec![json!("two"), json!("three")]).await;
    assert!(matches!(result, Err(rpc::Error::Remote(_))));
}

#[tokio::test]
async fn test_falsy_results_arrive_exactly() {
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("echo", echo()), Schema::map()).await;

    for value in [json!(0), json!(""), json!(false), Value::Null, json!([]), json!({})] {
        let result = guest_side.remote().call("echo", vec![value.clone()]).await.expect("call");
        assert_eq!(result, value);
    }
}

// --- Test 6: Transferables ---

#[tokio::test]
async fn test_buffers_move_both_ways() {
    let invert = Method::new(|mut args: Args, _ctx| async move {
        let marker = args.get(0).map(|v| v["data"].clone()).unwrap_or_default();
        let bytes = args.take_buffer(&marker).unwrap_or_default();
        let inverted: Vec<u8> = bytes.iter().map(|b| !b).collect();
        let len = inverted.len();
        anyhow::Ok(with_transferable(|t| json!({ "data": t.transfer(inverted), "len": len })))
    });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("invert", invert), Schema::map()).await;

    let payload = with_transferable(|t| json!({ "data": t.transfer(vec![0x00, 0x0f, 0xff]) }));
    let stub = guest_side.remote().stub("invert").expect("stub");
    let reply = stub.call_with(payload).await.expect("call");

    assert_eq!(reply.value["len"], json!(3));
    assert_eq!(reply.buffer(&reply.value["data"]), Some(&[0xff, 0xf0, 0x00][..]));
}

// --- Test 7: Timeouts ---

#[tokio::test]
async fn test_call_timeout() {
    init_tracing();
    let never = Method::new(|_args, _ctx| async {
        std::future::pending::<()>().await;
        anyhow::Ok(Value::Null)
    });

    let (handle, scope) = Worker::pair();
    let host = Host::new().with_options(HostOptions::new().call_timeout(Duration::from_millis(30)));
    let host_handshake = host
        .connect(handle, Schema::map().with("never", never.clone()))
        .expect("host connect");
    let guest_handshake = Guest::connect_with(
        &Environment::worker(scope),
        Schema::map().with("never", never),
        GuestOptions::new().call_timeout(Duration::from_millis(30)),
    )
    .expect("guest connect");
    let (host_side, guest_side) = tokio::join!(host_handshake, guest_handshake);
    let (host_side, guest_side) = (host_side.expect("host"), guest_side.expect("guest"));

    assert!(matches!(
        guest_side.remote().call("never", vec![]).await,
        Err(rpc::Error::Timeout)
    ));
    assert!(matches!(
        host_side.remote().call("never", vec![]).await,
        Err(rpc::Error::Timeout)
    ));
}

#[tokio::test]
async fn test_custom_id_length() {
    let (handle, scope) = Worker::pair();
    let host = Host::new().with_options(HostOptions::new().id_length(8));
    let host_handshake = host.connect(handle, Schema::map().with("add", add())).expect("host connect");
    let guest_handshake = Guest::connect(&Environment::worker(scope), Schema::map()).expect("guest connect");
    let (host_side, guest_side) = tokio::join!(host_handshake, guest_handshake);
    let (host_side, guest_side) = (host_side.expect("host"), guest_side.expect("guest"));

    assert_eq!(host_side.id().as_str().len(), 8);
    let sum: i64 = guest_side.remote().invoke("add", (1, 2)).await.expect("call");
    assert_eq!(sum, 3);
}

#[tokio::test]
async fn test_short_id_length_keeps_calls_concurrent() {
    let slow = || {
        Method::typed(|delay: u64, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            anyhow::Ok(delay)
        })
    };

    let (handle, scope) = Worker::pair();
    let host = Host::new().with_options(HostOptions::new().id_length(0));
    let host_handshake = host.connect(handle, Schema::map().with("slow", slow())).expect("host connect");
    let guest_options = GuestOptions {
        calls: CallSettings {
            timeout: None,
            id_length: 1,
        },
        ..GuestOptions::default()
    };
    let guest_handshake =
        Guest::connect_with(&Environment::worker(scope), Schema::map().with("slow", slow()), guest_options)
            .expect("guest connect");
    let (host_side, guest_side) = tokio::join!(host_handshake, guest_handshake);
    let (host_side, guest_side) = (host_side.expect("host"), guest_side.expect("guest"));
    assert_eq!(host_side.id().as_str().len(), MIN_ID_LENGTH);

    // Both sides run on this single-threaded runtime.
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(
            host_side.remote().invoke::<_, u64>("slow", (50,)),
            host_side.remote().invoke::<_, u64>("slow", (5,)),
            guest_side.remote().invoke::<_, u64>("slow", (50,)),
            guest_side.remote().invoke::<_, u64>("slow", (5,)),
        )
    })
    .await
    .expect("calls finish");
    assert_eq!(outcome.0.expect("host slow"), 50);
    assert_eq!(outcome.1.expect("host fast"), 5);
    assert_eq!(outcome.2.expect("guest slow"), 50);
    assert_eq!(outcome.3.expect("guest fast"), 5);
}

#[tokio::test]
async fn test_invoke_single_collection_argument() {
    let count = Method::new(|args: Args, _ctx| async move { anyhow::Ok(json!(args.len())) });
    let host = Host::new();
    let (_host_side, guest_side) = connect_worker(&host, Schema::map().with("count", count), Schema::map()).await;
    let remote = guest_side.remote();

    let wrapped: usize = remote.invoke("count", (vec![1, 2, 3],)).await.expect("wrapped");
    assert_eq!(wrapped, 1);
    let spread: usize = remote.invoke("count", vec![1, 2, 3]).await.expect("spread");
    assert_eq!(spread, 3);
    let none: usize = remote.invoke("count", (Option::<i64>::None,)).await.expect("wrapped none");
    assert_eq!(none, 1);
    let empty: usize = remote.invoke("count", ()).await.expect("no args");
    assert_eq!(empty, 0);
}
