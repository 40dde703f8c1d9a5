use clap::Parser;
use futures::stream::{FuturesUnordered, StreamExt};
use relaycalc_core::message::{Message, Response, fields};
use relaycalc_server::server::{client, config::CallerArgs};
use std::{sync::Arc, time::Instant};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CallerArgs::parse();
    let gateway_addr: Arc<str> = Arc::from(args.gateway_addr.as_str());
    let max_line_bytes = args.max_line_bytes;

    let start = Instant::now();
    let mut tasks = FuturesUnordered::new();

    for request in args.requests() {
        let gateway_addr = Arc::clone(&gateway_addr);
        tasks.push(tokio::spawn(async move {
            let reply = client::exchange(&gateway_addr, &request, max_line_bytes).await;
            (request, reply)
        }));
    }

    while let Some(joined) = tasks.next().await {
        let (request, reply) = joined?;
        println!("→ {}", render(&request));
        match reply {
            Ok(reply) => println!("← {}", render(&reply)),
            Err(err) => {
                let id = request
                    .get(fields::REQUEST_ID)
                    .and_then(|id| id.as_str())
                    .map(Into::into);
                let failure = Response::failure(id, &err);
                println!("← {}", serde_json::to_string(&failure)?);
            }
        }
    }

    println!(
        "\n{} request(s) in {:.2} ms",
        args.parallel,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn render(message: &Message) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
