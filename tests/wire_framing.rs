//! Byte-level framing through a running connection

mod test_helpers;

use std::time::Duration;

use serde_json::json;
use test_helpers::{WAIT, connect};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use turul_json_rpc_endpoint::prelude::*;

fn echo() -> MethodRouter {
    MethodRouter::new().request("echo", |params, _context| async move {
        Ok(params.unwrap_or_else(Payload::null))
    })
}

fn frame(body: &str) -> Vec<u8> {
    format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
}

#[tokio::test]
async fn test_outgoing_request_frame_is_exact() {
    let (local, mut remote) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(local);
    let listener = ConnectionBuilder::new(echo()).build(reader, writer).listen();

    let endpoint = listener.remote();
    tokio::spawn(async move { endpoint.request("foo", Some(Payload::json("bar"))).await });

    let expected = concat!(
        "Content-Length: 53\r\n\r\n",
        r#"{"jsonrpc":"2.0","id":1,"method":"foo","params":"bar"}"#
    );
    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(WAIT, remote.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(received).unwrap(), expected);
}

#[tokio::test]
async fn test_input_split_into_single_bytes() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(echo()));

    let mut input = Vec::new();
    for id in 1..=3 {
        input.extend(frame(
            &json!({"jsonrpc": "2.0", "id": id, "method": "echo", "params": {"n": id, "s": "ünï"}})
                .to_string(),
        ));
    }
    for byte in input {
        peer.send_raw(&[byte]).await;
    }

    for id in 1..=3 {
        let response = peer.receive().await;
        assert_eq!(response["id"], json!(id));
        assert_eq!(response["result"], json!({"n": id, "s": "ünï"}));
    }
}

#[tokio::test]
async fn test_bad_frames_are_skipped() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(echo()));

    // No Content-Length at all
    peer.send_raw(b"Content-Type: application/json\r\n\r\n").await;
    // Unparseable length
    peer.send_raw(b"Content-Length: twelve\r\n\r\n").await;
    // Unsupported charset: the declared body is skipped
    peer.send_raw(b"Content-Length: 2\r\nContent-Type: application/json; charset=utf-16\r\n\r\n{}")
        .await;

    peer.send_raw(&frame(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":"ok"}"#))
        .await;
    let response = peer.receive().await;
    assert_eq!(response["result"], json!("ok"));
}

#[tokio::test]
async fn test_declared_latin1_body() {
    let (_listener, mut peer) = connect(ConnectionBuilder::new(echo()));

    let mut body = br#"{"jsonrpc":"2.0","id":1,"method":"echo","params":"caf"#.to_vec();
    body.push(0xe9);
    body.extend_from_slice(br#""}"#);
    let mut input = format!(
        "Content-Length: {}\r\nContent-Type: application/json; charset=iso-8859-1\r\n\r\n",
        body.len()
    )
    .into_bytes();
    input.extend(body);
    peer.send_raw(&input).await;

    assert_eq!(peer.receive().await["result"], json!("café"));
}

#[tokio::test]
async fn test_content_type_header_when_configured() {
    let (local, mut remote) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(local);
    let config = EndpointConfig::default().with_content_type(true);
    let listener = ConnectionBuilder::new(echo())
        .config(config)
        .build(reader, writer)
        .listen();

    listener.remote().notify("exit", None).await.unwrap();

    let expected = concat!(
        "Content-Length: 33\r\n",
        "Content-Type: application/json; charset=utf-8\r\n\r\n",
        r#"{"jsonrpc":"2.0","method":"exit"}"#
    );
    let mut received = vec![0u8; expected.len()];
    tokio::time::timeout(WAIT, remote.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(received).unwrap(), expected);
}

#[tokio::test]
async fn test_truncated_stream_stops_listening() {
    let (local, mut remote) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(local);
    let listener = ConnectionBuilder::new(echo()).build(reader, writer).listen();

    remote
        .write_all(b"Content-Length: 100\r\n\r\n{\"jsonrpc\":")
        .await
        .unwrap();
    remote.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), listener.join())
        .await
        .expect("listener should stop at end of stream")
        .expect("truncation is a clean shutdown");
}
