//! Typed captures, query parameters, and a middleware.
//!
//! ```text
//! curl http://127.0.0.1:8080/hi/alice?greeting=Hello
//! curl http://127.0.0.1:8080/items/42
//! curl http://127.0.0.1:8080/admin/panel   # 403 from the middleware
//! ```

use zzz_web::{Context, Handled, Next, Respond, Router, Server, StatusCode};

fn greet<'p>(ctx: &mut Context<'p>) -> Handled<'p> {
    let name = ctx.capture_str(0).ok_or("name is not UTF-8")?;
    let greeting = ctx
        .queries()
        .get(b"greeting")
        .and_then(|v| std::str::from_utf8(v).ok())
        .unwrap_or("Hi");

    let body = bumpalo::format!(in ctx.arena(), "{}, {}!", greeting, name);
    Ok(Respond::new()
        .status(StatusCode::Ok)
        .mime("text/plain")
        .body(body.into_bump_str().as_bytes())
        .into())
}

fn item<'p>(ctx: &mut Context<'p>) -> Handled<'p> {
    let id = ctx.capture_int(0).ok_or("missing id")?;
    let body = bumpalo::format!(in ctx.arena(), "item #{}", id);

    Ok(Respond::new()
        .status(StatusCode::Ok)
        .mime("text/plain")
        .body(body.into_bump_str().as_bytes())
        .into())
}

fn deny<'p>(_ctx: &mut Context<'p>, _next: Next<'_>) -> Handled<'p> {
    Ok(Respond::new()
        .status(StatusCode::Forbidden)
        .mime("text/plain")
        .body(b"admins only")
        .into())
}

fn panel<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
    Ok(Respond::new().status(StatusCode::Ok).body(b"panel").into())
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut router: Router = Router::new();
    router.at("/hi/%s").get(greet);
    router.at("/items/%i").get(item);
    router.middleware("/admin", deny);
    router.at("/admin/panel").get(panel);

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .router(router)
        .build()
        .run();
}
