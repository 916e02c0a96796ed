//! # Stdio Echo Peer
//!
//! A JSON-RPC peer speaking Content-Length framed messages over stdin/stdout.
//! Logs go to stderr so they never corrupt the protocol stream.
//!
//! ## Usage
//! ```bash
//! RUST_LOG=debug cargo run --package stdio-echo-peer -- --content-type
//! ```
//!
//! Methods:
//! - `echo`: returns its params unchanged
//! - `sum`: `{"values": [1, 2, 3]}` returns `6`
//! - `sleep`: `{"millis": 5000}` waits, answering RequestCancelled when cancelled
//! - `exit` (notification): stops the peer

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use turul_json_rpc_endpoint::prelude::*;
use turul_json_rpc_endpoint::{CancellationHandle, Charset, IdStyle};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Charset used to encode outgoing bodies
    #[arg(long, default_value = "utf-8")]
    charset: String,

    /// Emit a Content-Type header on every outgoing frame
    #[arg(long, default_value = "false")]
    content_type: bool,

    /// Log every frame at trace level
    #[arg(long, default_value = "false")]
    trace: bool,

    /// Use string ids for outgoing requests
    #[arg(long, default_value = "false")]
    string_ids: bool,

    /// Method name of the cancellation notification
    #[arg(long, default_value = "$/cancelRequest")]
    cancel_method: String,
}

#[derive(Deserialize)]
struct SumParams {
    values: Vec<i64>,
}

#[derive(Deserialize)]
struct SleepParams {
    millis: u64,
}

fn service(exit: CancellationHandle) -> MethodRouter {
    MethodRouter::new()
        .request("echo", |params, _context| async move {
            Ok(params.unwrap_or_else(Payload::null))
        })
        .typed_request("sum", |params: SumParams, _context| async move {
            Ok(params.values.iter().sum::<i64>())
        })
        .typed_request("sleep", |params: SleepParams, context: CallContext| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(params.millis)) => Ok(params.millis),
                _ = context.cancellation.cancelled() => Err(ServiceError::Cancelled),
            }
        })
        .notification("exit", move |_params, _context| {
            let exit = exit.clone();
            async move {
                exit.cancel();
                Ok(())
            }
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let charset = Charset::from_label(&args.charset)
        .with_context(|| format!("unsupported charset '{}'", args.charset))?;
    let id_style = if args.string_ids {
        IdStyle::String
    } else {
        IdStyle::Number
    };
    let config = EndpointConfig::default()
        .with_charset(charset)
        .with_content_type(args.content_type)
        .with_message_tracing(args.trace)
        .with_id_style(id_style)
        .with_cancel_method(args.cancel_method);

    let exit = CancellationHandle::new();
    let connection = ConnectionBuilder::new(service(exit.clone()))
        .config(config)
        .build(tokio::io::stdin(), tokio::io::stdout());

    info!("Listening on stdin");
    connection.run(exit).await.context("connection failed")?;
    info!("Stdin closed, exiting");
    Ok(())
}
