//! The per-connection engine: parse, dispatch, respond, keep alive.

use crate::{
    errors::ErrorKind,
    http::{
        respond::{Pseudoslice, Respond},
        types,
    },
    limits::{ConnLimits, ReqLimits},
    router::{
        context::{Context, MiddlewareFn, Next, Outcome, Upgrade},
        trie::Router,
    },
    server::{provision::PooledProvision, transport::Transport},
    sse::{self, Sse},
    StatusCode,
};
use std::{mem, net::SocketAddr, sync::Arc};

/// Immutable per-server facts every connection task reads.
pub(crate) struct Shared<S, T: Transport> {
    pub(crate) router: Router<S, T>,
    pub(crate) state: S,
    pub(crate) conn: ConnLimits,
    pub(crate) req: ReqLimits,
}

/// Connection state machine states.
enum State {
    Header,
    Body { head_end: usize, expected: usize },
    Handler { head_end: usize },
}

/// What one handled request asks the engine to do next.
enum Step<T: Transport> {
    Respond { body: &'static [u8] },
    Upgrade(Upgrade<T>),
}

pub(crate) struct Engine<T: Transport, S> {
    transport: T,
    peer: SocketAddr,
    provision: PooledProvision,
    shared: Arc<Shared<S, T>>,
}

impl<T: Transport, S: Send + Sync + 'static> Engine<T, S> {
    #[inline]
    pub(crate) fn new(
        transport: T,
        peer: SocketAddr,
        provision: PooledProvision,
        shared: Arc<Shared<S, T>>,
    ) -> Self {
        Self {
            transport,
            peer,
            provision,
            shared,
        }
    }

    /// Serves the connection to completion: one or more requests, then
    /// close on error, EOF, or `Connection: close`. An SSE upgrade instead
    /// which takes socket and provision out of the engine's hands.
    ///
    /// The provision is released on every exit path; a panicking handler
    /// unwinds through here and the pool guard still returns it.
    pub(crate) async fn run(mut self) {
        if let Err(error) = self.transport.set_nodelay() {
            tracing::debug!(peer = %self.peer, %error, "failed to disable Nagle");
        }

        loop {
            let step = match self.serve_one().await {
                Ok(step) => step,
                Err(ErrorKind::SocketClosed) => break,
                Err(error) if error.is_parse_level() => {
                    tracing::debug!(peer = %self.peer, %error, "request shed");
                    break;
                }
                Err(error) => {
                    tracing::debug!(peer = %self.peer, %error, "connection aborted");
                    break;
                }
            };

            match step {
                Step::Respond { body } => {
                    if let Err(error) = self.write_response(body).await {
                        tracing::debug!(peer = %self.peer, %error, "send failed");
                        break;
                    }
                    if !self.keep_alive() {
                        let _ = self.transport.shutdown().await;
                        break;
                    }
                    self.provision.clear(&self.shared.conn);
                }
                Step::Upgrade(upgrade) => {
                    if let Err(error) = self.transport.send_all(sse::PREAMBLE).await {
                        tracing::debug!(peer = %self.peer, %error, "sse preamble failed");
                        break;
                    }

                    let Engine {
                        transport,
                        provision,
                        ..
                    } = self;
                    (upgrade.init)(Sse::new(transport, provision));
                    return;
                }
            }
        }
    }

    /// Runs the request states for one request: `Header` until the
    /// `\r\n\r\n` terminator arrives, `Body` until `Content-Length`
    /// bytes followed it, then `Handler`.
    async fn serve_one(&mut self) -> Result<Step<T>, ErrorKind> {
        let recv_max = self
            .shared
            .req
            .request_bytes_max
            .min(self.shared.conn.list_recv_bytes_max);

        let mut state = State::Header;
        loop {
            state = match state {
                State::Header => {
                    let scanned = self.provision.recv.len();
                    self.provision
                        .recv
                        .recv_some(&mut self.transport, recv_max)
                        .await?;
                    if self.provision.recv.len() > self.shared.req.request_bytes_max {
                        return Err(ErrorKind::ContentTooLarge);
                    }

                    match self.provision.recv.find_terminator(scanned) {
                        Some(head_end) => self.parse_head(head_end, recv_max)?,
                        None => State::Header,
                    }
                }

                State::Body { head_end, expected } => {
                    let received = self.provision.recv.len() - head_end;
                    if received == expected {
                        State::Handler { head_end }
                    } else if received > expected {
                        return Err(ErrorKind::MalformedRequest);
                    } else {
                        self.provision
                            .recv
                            .recv_some(&mut self.transport, recv_max)
                            .await?;
                        State::Body { head_end, expected }
                    }
                }

                State::Handler { head_end } => return self.dispatch(head_end),
            };
        }
    }

    #[inline]
    fn parse_head(&mut self, head_end: usize, recv_max: usize) -> Result<State, ErrorKind> {
        let provision = &mut *self.provision;
        let limits = &self.shared.req;

        {
            let head = provision.recv.head_mut(head_end);
            provision.request.parse(head, limits)?;
        }

        let request = &provision.request;
        tracing::info!(
            peer = %self.peer,
            method = ?request.method(),
            uri = types::as_str(request.url().target()).unwrap_or("<non-utf8>"),
            user_agent = request.header(b"user-agent").and_then(types::as_str).unwrap_or("-"),
            "request"
        );

        let content_length = request.content_length().unwrap_or(0);
        if request.method().expects_body() && content_length != 0 {
            if head_end + content_length > recv_max {
                return Err(ErrorKind::ContentTooLarge);
            }
            Ok(State::Body {
                head_end,
                expected: content_length,
            })
        } else {
            Ok(State::Handler { head_end })
        }
    }

    /// Resolves routing, runs the middleware chain and handler, and
    /// encodes the response head. The body stays a borrowed slice; it
    /// remains valid until the post-send clear.
    fn dispatch(&mut self, head_end: usize) -> Result<Step<T>, ErrorKind> {
        let shared = &*self.shared;
        let provision = &mut *self.provision;

        let content_length = provision.request.content_length().unwrap_or(0);
        if provision.request.method().expects_body() && content_length != 0 {
            provision.request.body = Some(provision.recv.slice_static(head_end, content_length));
        }

        if let Some(query) = provision.request.url.query {
            provision.queries.parse(query)?;
        }

        let mut middlewares: Vec<MiddlewareFn<S, T>> = Vec::new();
        let route = shared.router.lookup(
            provision.request.url.path,
            &mut provision.captures,
            shared.req.capture_count_max,
            &mut middlewares,
        );

        let Some(route) = route else {
            tracing::debug!(peer = %self.peer, error = %ErrorKind::RouteNotFound, "miss");
            return empty_response(StatusCode::NotFound, &mut provision.head);
        };
        let Some(handler) = route.handler(provision.request.method()) else {
            tracing::debug!(peer = %self.peer, error = %ErrorKind::MethodNotAllowed, "miss");
            return empty_response(StatusCode::MethodNotAllowed, &mut provision.head);
        };

        let ctx = &mut Context {
            request: &provision.request,
            captures: &provision.captures,
            queries: &provision.queries,
            arena: &provision.arena,
            peer: self.peer,
            state: &shared.state,
        };

        match Next::new(&middlewares, handler).run(ctx) {
            Ok(Outcome::Respond(respond)) => {
                respond.encode_head(&mut provision.head)?;
                Ok(Step::Respond {
                    body: detach(respond.body),
                })
            }
            Ok(Outcome::Upgrade(upgrade)) => Ok(Step::Upgrade(upgrade)),
            Err(failure) => {
                tracing::error!(
                    peer = %self.peer,
                    error = %ErrorKind::HandlerFailed,
                    reason = %failure,
                    "handler failed"
                );
                empty_response(StatusCode::InternalServerError, &mut provision.head)
            }
        }
    }

    /// The respond state: drain head + body as one pseudoslice, one
    /// write window at a time, without materializing a joined buffer.
    async fn write_response(&mut self, body: &'static [u8]) -> Result<(), ErrorKind> {
        let window = self.shared.conn.socket_buffer_bytes;
        let provision = &mut *self.provision;
        let mut pseudo = Pseudoslice::new(&provision.head, body, &mut provision.scratch);

        let total = pseudo.len();
        let mut offset = 0;
        while offset < total {
            let chunk = pseudo.get(offset, window);
            offset += chunk.len();
            self.transport.send_all(chunk).await?;
        }

        Ok(())
    }

    /// `Connection` header of the request just served; keep-alive is the
    /// HTTP/1.1 default.
    #[inline]
    fn keep_alive(&self) -> bool {
        match self.provision.request.header(b"connection") {
            Some(value) => !value.eq_ignore_ascii_case(b"close"),
            None => true,
        }
    }
}

#[inline]
fn empty_response<T: Transport>(
    status: StatusCode,
    head: &mut Vec<u8>,
) -> Result<Step<T>, ErrorKind> {
    Respond::new().status(status).encode_head(head)?;
    Ok(Step::Respond { body: b"" })
}

// SAFETY: the body borrows the provision's arena, receive buffer, or
// static data. The first two stay untouched until the post-send clear,
// which runs strictly after the last read of this slice.
#[inline(always)]
fn detach(body: &[u8]) -> &'static [u8] {
    unsafe { mem::transmute(body) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::Broadcast,
        limits::ServerLimits,
        server::{provision::ProvisionPool, transport::mock::MockStream},
        tools::str_op,
        Handled, Respond,
    };
    use std::time::Duration;

    async fn serve_with<S: Send + Sync + 'static>(
        router: Router<S, MockStream>,
        state: S,
        req: ReqLimits,
        chunks: Vec<Vec<u8>>,
    ) -> Vec<u8> {
        let server = ServerLimits::default();
        let conn = ConnLimits::default();
        let pool = ProvisionPool::new(&server, conn.clone(), req.clone());

        let shared = Arc::new(Shared {
            router,
            state,
            conn,
            req,
        });

        let stream = MockStream::new(chunks);
        let sent = stream.sent();

        Engine::new(stream, "127.0.0.1:4000".parse().unwrap(), pool.acquire().await, shared)
            .run()
            .await;

        let out = sent.lock().unwrap().clone();
        out
    }

    async fn serve(router: Router<(), MockStream>, chunks: Vec<Vec<u8>>) -> Vec<u8> {
        serve_with(router, (), ReqLimits::default(), chunks).await
    }

    fn chunk(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
        Ok(Respond::new()
            .status(StatusCode::Ok)
            .mime("text/html")
            .body(b"Hello, World!")
            .into())
    }

    fn greet<'p>(ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
        let name = ctx.capture_str(0).ok_or("missing capture")?;
        let greeting = ctx
            .queries()
            .get(b"greeting")
            .and_then(types::as_str)
            .unwrap_or("Hi");

        let body = bumpalo::format!(in ctx.arena(), "{}, {}!", greeting, name);
        Ok(Respond::new()
            .status(StatusCode::Ok)
            .mime("text/plain")
            .body(body.into_bump_str().as_bytes())
            .into())
    }

    fn echo_body<'p>(ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
        Ok(Respond::new()
            .status(StatusCode::Ok)
            .mime("application/octet-stream")
            .body(ctx.request().body().unwrap_or(b"<empty>"))
            .into())
    }

    fn fails<'p>(_ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
        Err("database on fire".into())
    }

    fn no_status<'p>(_ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
        Ok(Respond::new().body(b"forgot the status").into())
    }

    #[tokio::test]
    async fn hello_world_byte_exact() {
        let mut router = Router::new();
        router.at("/").get(hello);

        let out = serve(router, chunk(&["GET / HTTP/1.1\r\nHost: x\r\n\r\n"])).await;

        assert_eq!(
            str_op(&out),
            "HTTP/1.1 200 OK\r\n\
             Server: zzz\r\n\
             Connection: keep-alive\r\n\
             Content-Type: text/html\r\n\
             Content-Length: 13\r\n\r\n\
             Hello, World!"
        );
    }

    #[tokio::test]
    async fn captures_and_queries_reach_the_handler() {
        let mut router = Router::new();
        router.at("/hi/%s").get(greet);

        let out = serve(
            router,
            chunk(&["GET /hi/alice?greeting=Hello HTTP/1.1\r\nHost: x\r\n\r\n"]),
        )
        .await;

        let text = str_op(&out);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nHello, alice!"));
    }

    #[tokio::test]
    async fn method_absent_on_matched_route_is_405() {
        let mut router = Router::new();
        router.at("/kill").get(hello);

        let out = serve(
            router,
            chunk(&["POST /kill HTTP/1.1\r\nHost: x\r\nContent-Length: 0\r\n\r\n"]),
        )
        .await;

        let text = str_op(&out);
        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn no_route_is_404() {
        let out = serve(
            Router::new(),
            chunk(&["GET /nowhere HTTP/1.1\r\nHost: x\r\n\r\n"]),
        )
        .await;

        assert!(str_op(&out).starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn terminator_split_across_recvs() {
        let mut router = Router::new();
        router.at("/").get(hello);

        let out = serve(
            router,
            chunk(&["GET / HTTP/1.1\r\nHost: x\r\n\r", "\n"]),
        )
        .await;

        assert!(str_op(&out).starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn body_split_across_recvs() {
        let mut router = Router::new();
        router.at("/echo").post(echo_body);

        let out = serve(
            router,
            chunk(&[
                "POST /echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nhell",
                "o worl",
            ]),
        )
        .await;

        assert!(str_op(&out).ends_with("\r\n\r\nhello worl"));
    }

    #[tokio::test]
    async fn post_with_zero_length_goes_straight_to_handler() {
        let mut router = Router::new();
        router.at("/echo").post(echo_body);

        let out = serve(
            router,
            chunk(&["POST /echo HTTP/1.1\r\nContent-Length: 0\r\n\r\n"]),
        )
        .await;

        assert!(str_op(&out).ends_with("\r\n\r\n<empty>"));
    }

    #[tokio::test]
    async fn keep_alive_serves_both_then_close_ends() {
        let mut router = Router::new();
        router.at("/").get(hello);

        let out = serve(
            router,
            chunk(&[
                "GET / HTTP/1.1\r\nHost: x\r\n\r\n",
                "GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
                "GET / HTTP/1.1\r\nHost: x\r\n\r\n",
            ]),
        )
        .await;

        let text = str_op(&out);
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        assert_eq!(text.matches("Hello, World!").count(), 2);
    }

    #[tokio::test]
    async fn handler_failure_is_an_empty_500() {
        let mut router = Router::new();
        router.at("/boom").get(fails);

        let out = serve(router, chunk(&["GET /boom HTTP/1.1\r\n\r\n"])).await;

        let text = str_op(&out);
        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
    }

    #[tokio::test]
    async fn missing_status_aborts_without_bytes() {
        let mut router = Router::new();
        router.at("/oops").get(no_status);

        let out = serve(router, chunk(&["GET /oops HTTP/1.1\r\n\r\n"])).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn header_overflow_drops_without_response() {
        let mut router = Router::new();
        router.at("/").get(hello);

        let raw = format!(
            "GET / HTTP/1.1\r\n{}\r\n",
            "X-Pad: v\r\n".repeat(ReqLimits::default().header_count_max + 1)
        );
        let out = serve(router, chunk(&[raw.as_str()])).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn request_at_bytes_max_passes_one_more_drops() {
        let limits = ReqLimits {
            request_bytes_max: 256,
            ..ReqLimits::default()
        };

        let fit = |total: usize| {
            let skeleton = "GET / HTTP/1.1\r\nX-Pad: \r\n\r\n".len();
            format!(
                "GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n",
                "p".repeat(total - skeleton)
            )
        };

        let mut router = Router::new();
        router.at("/").get(hello);
        let exact = fit(256);
        assert_eq!(exact.len(), 256);
        let out = serve_with(router, (), limits.clone(), chunk(&[exact.as_str()])).await;
        assert!(str_op(&out).starts_with("HTTP/1.1 200 OK\r\n"));

        let mut router = Router::new();
        router.at("/").get(hello);
        let over = fit(257);
        let out = serve_with(router, (), limits, chunk(&[over.as_str()])).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn responses_larger_than_one_window_drain_fully() {
        fn big<'p>(ctx: &mut Context<'p>) -> Handled<'p, MockStream> {
            let body = ctx.arena().alloc_slice_fill_copy(10_000, b'z');
            Ok(Respond::new()
                .status(StatusCode::Ok)
                .mime("text/plain")
                .body(body)
                .into())
        }

        let mut router = Router::new();
        router.at("/big").get(big);

        let out = serve(router, chunk(&["GET /big HTTP/1.1\r\n\r\n"])).await;
        let text = str_op(&out);

        assert!(text.contains("Content-Length: 10000\r\n"));
        assert_eq!(text.bytes().filter(|&b| b == b'z').count(), 10_000);
    }

    #[tokio::test]
    async fn middleware_short_circuit_never_reaches_handler() {
        fn deny<'p>(
            _ctx: &mut Context<'p>,
            _next: Next<'_, (), MockStream>,
        ) -> Handled<'p, MockStream> {
            Ok(Respond::new().status(StatusCode::Forbidden).into())
        }

        let mut router = Router::new();
        router.middleware("/admin", deny);
        router.at("/admin/panel").get(hello);

        let out = serve(router, chunk(&["GET /admin/panel HTTP/1.1\r\n\r\n"])).await;
        assert!(str_op(&out).starts_with("HTTP/1.1 403 Forbidden\r\n"));
    }

    #[tokio::test]
    async fn sse_upgrade_streams_broadcast_values_in_order() {
        fn stream<'p>(ctx: &mut Context<'p, Broadcast<u32>>) -> Handled<'p, MockStream> {
            let mut channel = ctx.state().subscribe(8);
            let feed = ctx.state().clone();

            Ok(ctx.to_sse(move |mut sse: Sse<MockStream>| {
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

        let feed = Broadcast::new(4);
        let mut router = Router::new();
        router.at("/stream").get(stream);

        let server = ServerLimits::default();
        let conn = ConnLimits::default();
        let req = ReqLimits::default();
        let pool = ProvisionPool::new(&server, conn.clone(), req.clone());
        let shared = Arc::new(Shared {
            router,
            state: feed.clone(),
            conn,
            req,
        });

        let mut stream_mock = MockStream::new(chunk(&["GET /stream HTTP/1.1\r\n\r\n"]));
        // Preamble plus three events go through, then the client is gone
        stream_mock.sends_left = Some(4);
        let sent = stream_mock.sent();

        Engine::new(
            stream_mock,
            "127.0.0.1:4000".parse().unwrap(),
            pool.acquire().await,
            shared,
        )
        .run()
        .await;

        for n in 0..3u32 {
            feed.send(n);
        }

        let expected = format!(
            "{}data: value: 0\r\n\r\ndata: value: 1\r\n\r\ndata: value: 2\r\n\r\n",
            str_op(sse::PREAMBLE)
        );
        for _ in 0..200 {
            if sent.lock().unwrap().len() >= expected.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(str_op(&sent.lock().unwrap()), expected);
        assert_eq!(feed.subscriber_count(), 1);

        // Client disconnect: the next publish hits a dead socket, the
        // subscriber loop unwinds and unsubscribes
        feed.send(3);
        for _ in 0..200 {
            if feed.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(feed.subscriber_count(), 0);
        assert_eq!(str_op(&sent.lock().unwrap()), expected);
    }
}
