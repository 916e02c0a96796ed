//! Incoming-call handling as seen from the wire

mod test_helpers;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use test_helpers::{RawPeer, connect};
use turul_json_rpc_endpoint::prelude::*;

fn service() -> MethodRouter {
    MethodRouter::new()
        .request("ping", |_params, _context| async { Ok(Payload::json("pong")) })
        .request("fail", |_params, _context| async {
            Err(ServiceError::internal("BAAZ"))
        })
        .request("explode", |_params, _context| async {
            if true {
                panic!("BAAZ");
            }
            Ok(Payload::null())
        })
        .request("foo", |_params, _context| async {
            // Never completes on its own
            futures::future::pending::<()>().await;
            Ok(Payload::null())
        })
        .request("rejected", |_params, _context| async {
            Err(ResponseError::invalid_params("need a number").into())
        })
        .request("unserializable", |_params, _context| async {
            // JSON object keys must be strings
            let bytes_keyed: HashMap<Vec<u8>, i32> = HashMap::from([(vec![0xff], 1)]);
            Ok(Payload::typed(bytes_keyed))
        })
}

async fn ping(peer: &mut RawPeer, id: i64) {
    peer.send(json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(id));
    assert_eq!(response["result"], json!("pong"));
}

#[tokio::test]
async fn test_request_is_answered_with_same_id() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": "abc", "method": "ping"}))
        .await;
    assert_eq!(
        peer.receive().await,
        json!({"jsonrpc": "2.0", "id": "abc", "result": "pong"})
    );
}

#[tokio::test]
async fn test_handler_error_becomes_internal_error() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": "1", "method": "fail"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!("1"));
    assert_eq!(response["error"]["code"], json!(INTERNAL_ERROR));
    assert!(response["error"]["data"].as_str().unwrap().contains("BAAZ"));
    assert!(response.get("result").is_none());

    // Exactly one response: the next message belongs to the next request
    ping(&mut peer, 2).await;
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": "1", "method": "explode"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!("1"));
    assert_eq!(response["error"]["code"], json!(INTERNAL_ERROR));
    assert!(response["error"]["data"].as_str().unwrap().contains("BAAZ"));

    // The read loop survived the panic
    ping(&mut peer, 2).await;
}

#[tokio::test]
async fn test_cancelled_request_gets_request_cancelled() {
    let (listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": "1", "method": "foo", "params": "bar"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": "1"}}))
        .await;

    let response = peer.receive().await;
    assert_eq!(response["id"], json!("1"));
    assert_eq!(response["error"]["code"], json!(REQUEST_CANCELLED));
    assert_eq!(
        response["error"]["message"],
        json!("The request (id: 1, method: 'foo') has been cancelled")
    );

    ping(&mut peer, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(listener.remote().pending_incoming(), 0);
}

#[tokio::test]
async fn test_cancel_for_unknown_id_is_a_no_op() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 42}}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": "x"}}))
        .await;
    ping(&mut peer, 1).await;
    peer.expect_silence(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_cancel_after_completion_is_a_no_op() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    ping(&mut peer, 7).await;
    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 7}}))
        .await;
    peer.expect_silence(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_unknown_notification_gets_no_response() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "method": "unknownMethod", "params": "bar"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "method": "$/somethingOptional"}))
        .await;
    ping(&mut peer, 1).await;
    peer.expect_silence(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_unknown_request_gets_method_not_found() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": 3, "method": "bogus"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(3));
    assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    assert_eq!(
        response["error"]["message"],
        json!("Unsupported request method: bogus")
    );
}

#[tokio::test]
async fn test_explicit_response_error_is_sent_verbatim() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "rejected"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(
        response["error"],
        json!({"code": INVALID_PARAMS, "message": "need a number"})
    );
}

#[tokio::test]
async fn test_parse_failures() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    // Malformed JSON: nothing to correlate, so nothing is answered
    peer.send_raw(b"Content-Length: 9\r\n\r\n{\"id\": 1,").await;
    // Neither id nor method
    peer.send(json!({"jsonrpc": "2.0", "params": [1]})).await;
    ping(&mut peer, 1).await;

    // Bad method with an id: answered
    peer.send(json!({"jsonrpc": "2.0", "id": 5, "method": 12}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(5));
    assert_eq!(response["error"]["code"], json!(INVALID_REQUEST));
}

#[tokio::test]
async fn test_exception_handler_maps_errors() {
    let builder = ConnectionBuilder::new(service()).exception_handler(|error| {
        Some(ResponseError::server_error(
            -32000,
            &format!("mapped: {}", error),
            None,
        ))
    });
    let (_listener, mut peer) = connect(builder);

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "fail"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["error"]["code"], json!(-32000));
    assert_eq!(response["error"]["message"], json!("mapped: BAAZ"));
}

#[tokio::test]
async fn test_misbehaving_exception_handler_still_answers() {
    let returns_nothing = ConnectionBuilder::new(service()).exception_handler(|_| None);
    let (_listener, mut peer) = connect(returns_nothing);
    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "fail"}))
        .await;
    assert_eq!(
        peer.receive().await["error"]["code"],
        json!(INTERNAL_ERROR)
    );

    let panics = ConnectionBuilder::new(service())
        .exception_handler(|_| panic!("exception handler is broken"));
    let (_listener, mut peer) = connect(panics);
    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "fail"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["error"]["code"], json!(INTERNAL_ERROR));
}

#[tokio::test]
async fn test_unmatched_response_does_not_stop_the_loop() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": 99, "result": "nobody asked"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "bad"}}))
        .await;
    ping(&mut peer, 1).await;
}

#[tokio::test]
async fn test_handlers_run_concurrently() {
    let service = service().request("wait", |_params, context: CallContext| async move {
        context.cancellation.cancelled().await;
        context.check_cancelled()?;
        Ok(Payload::null())
    });
    let (_listener, mut peer) = connect(ConnectionBuilder::new(service));

    // A blocked handler does not hold up the next request
    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "wait"}))
        .await;
    ping(&mut peer, 2).await;

    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 1}}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["error"]["code"], json!(REQUEST_CANCELLED));
}

#[tokio::test]
async fn test_unserializable_result_becomes_internal_error() {
    let (listener, mut peer) = connect(ConnectionBuilder::new(service()));

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "unserializable"}))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["error"]["code"], json!(INTERNAL_ERROR));
    assert!(response["error"]["data"].as_str().unwrap().contains("key must be a string"));
    assert!(response.get("result").is_none());

    ping(&mut peer, 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(listener.remote().pending_incoming(), 0);
}

#[tokio::test]
async fn test_reused_running_id_is_rejected() {
    let service = service().request("wait", |_params, context: CallContext| async move {
        context.cancellation.cancelled().await;
        Err(ServiceError::Cancelled)
    });
    let (listener, mut peer) = connect(ConnectionBuilder::new(service));

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "wait"}))
        .await;
    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await;
    let rejected = peer.receive().await;
    assert_eq!(rejected["id"], json!(1));
    assert_eq!(rejected["error"]["code"], json!(INVALID_REQUEST));
    assert_eq!(listener.remote().pending_incoming(), 1);

    // The first request can still be cancelled and answered
    peer.send(json!({"jsonrpc": "2.0", "method": "$/cancelRequest", "params": {"id": 1}}))
        .await;
    let cancelled = peer.receive().await;
    assert_eq!(cancelled["id"], json!(1));
    assert_eq!(cancelled["error"]["code"], json!(REQUEST_CANCELLED));
}
