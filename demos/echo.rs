//! Echo - simple request/reply example.
//!
//! This example demonstrates:
//! - Building a bus with the builder pattern
//! - Registering a typed handler
//! - Awaiting the reply with `request`
//!
//! ```text
//! RUST_LOG=addrbus=debug cargo run --example echo
//! ```

use addrbus::{EventBus, Handler, ReplyContext, Value};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo address.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo address.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bus = EventBus::builder().build()?;

    let echo = Handler::typed(|input: EchoInput, ctx: ReplyContext| async move {
        ctx.reply(Value::from_serialize(&EchoOutput {
            echo: input.message,
        })?)
    });
    bus.register_handler("echo", &echo)?;

    let body = Value::from_serialize(&EchoInput {
        message: "hello".to_string(),
    })?;
    let reply = bus.request("echo", body).await?;
    let output: EchoOutput = reply.body.into_typed()?;
    println!("{output:?}");

    bus.unregister_handler("echo", &echo)?;
    bus.close();
    Ok(())
}
