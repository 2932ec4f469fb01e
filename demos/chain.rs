//! Chain - a conversation carried on through replies.
//!
//! Every reply context can answer again with `reply_with`, so two handlers
//! can keep talking without registering anything beyond the first address.
//!
//! ```text
//! cargo run --example chain
//! ```

use addrbus::{EventBus, Handler, ReplyContext, Value};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const ROUNDS: i64 = 3;

/// Handler that answers a count with the next one, until `ROUNDS`.
fn counter(name: &'static str, done: mpsc::UnboundedSender<i64>) -> Handler {
    Handler::new(move |body: Value, ctx: ReplyContext| {
        let done = done.clone();
        async move {
            let n = body.as_i64().unwrap_or_default();
            println!("{name} got {n}");
            if n >= ROUNDS {
                let _ = done.send(n);
                return Ok(());
            }
            let next = counter(name, done);
            ctx.reply_with(n + 1, &next)
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bus = EventBus::builder().build()?;
    let (done, mut finished) = mpsc::unbounded_channel();

    bus.register_handler("ping", &counter("ping", done.clone()))?;
    bus.send_with_reply("ping", 0, &counter("pong", done))?;

    if let Some(n) = finished.recv().await {
        println!("finished after {n} rounds");
    }

    bus.close();
    Ok(())
}
