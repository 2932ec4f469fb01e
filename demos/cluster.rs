//! Cluster - two nodes sharing one address space.
//!
//! Node `b` runs the workers; node `a` sends work and publishes a
//! notice. A local handler on `b` stays invisible to `a`.
//!
//! ```text
//! RUST_LOG=addrbus=debug cargo run --example cluster
//! ```

use std::time::Duration;

use addrbus::{Cluster, EventBus, Handler, ReplyContext, Value};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cluster = Cluster::new();
    let a = EventBus::builder().cluster(&cluster).build()?;
    let b = EventBus::builder()
        .cluster(&cluster)
        .max_concurrent_handlers(4)
        .reply_timeout(Duration::from_secs(5))
        .build()?;

    let square = Handler::new(|body: Value, ctx: ReplyContext| async move {
        let n = body.as_i64().unwrap_or_default();
        ctx.reply(n * n)
    });
    b.register_handler("math.square", &square)?;

    let notices = Handler::new(|body: Value, ctx: ReplyContext| async move {
        println!("notice on {}: {:?}", ctx.address(), body);
        Ok(())
    });
    b.register_handler("notices", &notices)?;
    b.register_local_handler("b.internal", &notices)?;

    for n in 1..=3 {
        let reply = a.request("math.square", n).await?;
        println!("{n}² = {:?}", reply.body);
    }

    a.publish("notices", "maintenance at noon")?;
    // No route: local to b
    a.send("b.internal", "never delivered")?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "nodes: {}, routes at math.square: {}",
        cluster.node_count(),
        cluster.route_count("math.square")
    );

    b.close();
    a.close();
    Ok(())
}
