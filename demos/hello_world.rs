use zzz_web::{Context, Handled, Respond, Router, Server, StatusCode};

fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
    Ok(Respond::new()
        .status(StatusCode::Ok)
        .mime("text/html")
        .body(b"Hello, World!")
        .into())
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut router: Router = Router::new();
    router.at("/").get(hello);

    Server::builder()
        .bind("127.0.0.1:8080".parse().unwrap())
        .router(router)
        .build()
        .run();
}
