use serde_json::json;
use serde_json::Value;

use crate::*;

fn request(call_name: &str) -> RpcRequest {
    RpcRequest {
        connection_id: ConnectionId::from("conn"),
        call_id: CallId::from("call-1"),
        call_name: call_name.to_string(),
        args: vec![json!(2), json!(3)],
    }
}

// ============================================================================
//  WIRE SHAPE
// ============================================================================

#[test]
fn test_handshake_request_shape() {
    let msg = Message::HandshakeRequest(HandshakeRequest {
        method_names: vec!["user.profile.get".into()],
        schema: json!({ "user": { "name": "guest" } }),
    });

    assert_eq!(
        msg.to_value().unwrap(),
        json!({
            "action": "ANCHOR/HANDSHAKE_REQUEST",
            "methodNames": ["user.profile.get"],
            "schema": { "user": { "name": "guest" } },
        })
    );
}

#[test]
fn test_handshake_ack_omits_schema() {
    let msg = Message::HandshakeReply(HandshakeReply::ack(ConnectionId::from("abc")));
    let value = msg.to_value().unwrap();

    assert_eq!(value, json!({ "action": "ANCHOR/HANDSHAKE_REPLY", "connectionID": "abc" }));

    let Message::HandshakeReply(reply) = Message::from_value(&value).unwrap() else {
        panic!("expected a handshake reply");
    };
    assert!(reply.is_ack());
}

#[test]
fn test_rpc_request_shape() {
    let value = Message::RpcRequest(request("add")).to_value().unwrap();

    assert_eq!(
        value,
        json!({
            "action": "ANCHOR/RPC_REQUEST",
            "connectionID": "conn",
            "callID": "call-1",
            "callName": "add",
            "args": [2, 3],
        })
    );
}

#[test]
fn test_reject_carries_error_properties() {
    let error = RemoteError::new("boom").with_prop("code", 42);
    let value = Message::reject(&request("explode"), error).to_value().unwrap();

    assert_eq!(value["action"], "ANCHOR/RPC_REJECT");
    assert_eq!(value["error"], json!({ "message": "boom", "code": 42 }));
    assert!(value.get("result").is_none());

    let Message::RpcReject(response) = Message::from_value(&value).unwrap() else {
        panic!("expected a reject");
    };
    let err = response.into_outcome(false).unwrap_err();
    assert_eq!(err.message, "boom");
    assert_eq!(err.prop("code"), Some(&json!(42)));
}

// ============================================================================
//  RESULTS
// ============================================================================

#[test]
fn test_falsy_results_survive() {
    for falsy in [json!(0), json!(""), json!(false), Value::Null] {
        let value = Message::resolve(&request("get"), falsy.clone()).to_value().unwrap();
        assert_eq!(value["result"], falsy);

        let Message::RpcResolve(response) = Message::from_value(&value).unwrap() else {
            panic!("expected a resolve");
        };
        assert_eq!(response.result, Some(falsy.clone()));
        assert_eq!(response.into_outcome(true).unwrap(), falsy);
    }
}

#[test]
fn test_reject_without_error_body() {
    let value = json!({
        "action": "ANCHOR/RPC_REJECT",
        "connectionID": "conn",
        "callID": "call-1",
        "callName": "get",
    });

    let Message::RpcReject(response) = Message::from_value(&value).unwrap() else {
        panic!("expected a reject");
    };
    let err = response.into_outcome(false).unwrap_err();
    assert!(err.message.contains("get"));
}

// ============================================================================
//  FILTERING
// ============================================================================

#[test]
fn test_foreign_payloads_are_rejected() {
    for value in [
        json!({ "action": "SOMEONE_ELSE/PING" }),
        json!({ "hello": "world" }),
        json!("ANCHOR/RPC_REQUEST"),
        json!({ "action": "ANCHOR/RPC_REQUEST", "connectionID": "c" }),
    ] {
        assert!(matches!(Message::from_value(&value), Err(Error::Decode(_))), "{value}");
    }
}

#[test]
fn test_connection_id_accessor() {
    let req = Message::HandshakeRequest(HandshakeRequest::default());
    assert_eq!(req.connection_id(), None);
    assert_eq!(req.action(), action::HANDSHAKE_REQUEST);

    let rpc = Message::RpcRequest(request("add"));
    assert_eq!(rpc.connection_id(), Some(&ConnectionId::from("conn")));
}

// ============================================================================
//  IDS
// ============================================================================

#[test]
fn test_generate_id_length() {
    assert_eq!(generate_id(5).len(), 5);
    assert_eq!(generate_id(DEFAULT_ID_LENGTH).len(), DEFAULT_ID_LENGTH);
    assert_eq!(generate_id(0), "");
    assert!(generate_id(64).chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn test_generated_ids_differ() {
    let a = CallId::generate(DEFAULT_ID_LENGTH);
    let b = CallId::generate(DEFAULT_ID_LENGTH);
    assert_ne!(a, b);
}
