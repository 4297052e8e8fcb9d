//! Server-Sent Events fed by a broadcast ticker.
//!
//! ```text
//! curl -N http://127.0.0.1:8080/stream
//! ```
//! Every connected client receives one `data: value: N` event per
//! second; slow clients drop ticks instead of slowing the publisher.

use std::time::Duration;
use zzz_web::{broadcast::Broadcast, sse::Sse, Context, Handled, Respond, Router, Server, StatusCode};

fn index<'p>(_ctx: &mut Context<'p, Broadcast<u64>>) -> Handled<'p> {
    Ok(Respond::new()
        .status(StatusCode::Ok)
        .mime("text/html")
        .body(b"<html><body><pre id=\"log\"></pre><script>\
               new EventSource('/stream').onmessage = \
               e => log.append(e.data + '\\n');\
               </script></body></html>")
        .into())
}

fn stream<'p>(ctx: &mut Context<'p, Broadcast<u64>>) -> Handled<'p> {
    let mut channel = ctx.state().subscribe(16);
    let feed = ctx.state().clone();

    Ok(ctx.to_sse(move |mut sse: Sse| {
        tokio::spawn(async move {
            while let Some(value) = channel.recv().await {
                let step = sse.send_data(format_args!("value: {}", value));
                if step.await.is_err() {
                    break;
                }
            }
            feed.unsubscribe(channel);
            sse.close().await;
        });
    }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let feed: Broadcast<u64> = Broadcast::new(64);

    let publisher = feed.clone();
    tokio::spawn(async move {
        let mut tick = 0u64;
        loop {
            publisher.send(tick);
            tick += 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let mut router: Router<Broadcast<u64>> = Router::new();
    router.at("/").get(index);
    router.at("/stream").get(stream);

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .state(feed)
        .router(router)
        .build()
        .launch()
        .await;
}
