//! Test helpers for driving an endpoint from a hand-written peer.
//!
//! [`RawPeer`] speaks the wire format directly, so tests can assert on exact
//! envelopes instead of going through a second endpoint.

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use turul_json_rpc_endpoint::{ConnectionBuilder, FrameCodec, ListenerHandle};

pub const WAIT: Duration = Duration::from_secs(5);

/// The other end of a connection under test
pub struct RawPeer {
    reader: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, FrameCodec>,
}

impl RawPeer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(reader, FrameCodec::new()),
            writer: FramedWrite::new(writer, FrameCodec::new()),
        }
    }

    /// Send one framed JSON message
    pub async fn send(&mut self, message: Value) {
        self.writer
            .send(message.to_string())
            .await
            .expect("peer write failed");
    }

    /// Send raw bytes, bypassing the framing
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.writer.get_mut();
        stream.write_all(bytes).await.expect("peer write failed");
        stream.flush().await.expect("peer flush failed");
    }

    /// Next message from the endpoint, as JSON. Fails the test after [`WAIT`].
    pub async fn receive(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.reader.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("read failed")
            .expect("endpoint wrote a malformed frame");
        let text = frame.into_text().expect("body is not valid text");
        serde_json::from_str(&text).expect("body is not valid JSON")
    }

    /// Assert nothing arrives within `wait`
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(wait, self.reader.next()).await {
            panic!("expected no message, got {:?}", frame);
        }
    }

    /// Close the peer's writing side
    pub async fn hang_up(&mut self) {
        let _ = SinkExt::<String>::close(&mut self.writer).await;
    }
}

/// Start `builder` against a fresh in-memory stream and return the peer end.
pub fn connect(builder: ConnectionBuilder) -> (ListenerHandle, RawPeer) {
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(local);
    let listener = builder.build(reader, writer).listen();
    (listener, RawPeer::new(remote))
}

/// Two endpoints wired to each other
pub fn connect_pair(
    left: ConnectionBuilder,
    right: ConnectionBuilder,
) -> (ListenerHandle, ListenerHandle) {
    let (left_io, right_io) = tokio::io::duplex(64 * 1024);
    let (left_reader, left_writer) = tokio::io::split(left_io);
    let (right_reader, right_writer) = tokio::io::split(right_io);
    (
        left.build(left_reader, left_writer).listen(),
        right.build(right_reader, right_writer).listen(),
    )
}
