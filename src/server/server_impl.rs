use crate::{
    limits::{ConnLimits, ReqLimits, Security, ServerLimits},
    router::trie::Router,
    server::{
        connection::{Engine, Shared},
        provision::ProvisionPool,
        transport::{self, Listener, Transport},
    },
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpStream;

/// An HTTP/1.1 server over a routing trie.
///
/// Connections are served by pooled provisions: the acceptor borrows a
/// provision *before* accepting, so when the pool is exhausted it parks
/// instead of dropping sockets the OS already completed the handshake
/// for. Concurrency and resident memory are bounded by
/// [`connection_count_max`](ServerLimits::connection_count_max).
///
/// # Examples
///
/// ```no_run
/// use zzz_web::{Context, Handled, Respond, Router, Server, StatusCode};
///
/// fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
///     Ok(Respond::new()
///         .status(StatusCode::Ok)
///         .mime("text/html")
///         .body(b"Hello, World!")
///         .into())
/// }
///
/// fn main() {
///     let mut router: Router = Router::new();
///     router.at("/").get(hello);
///
///     Server::builder()
///         .bind("127.0.0.1:8080".parse().unwrap())
///         .router(router)
///         .build()
///         .run();
/// }
/// ```
pub struct Server<S = (), T: Transport = TcpStream> {
    addr: SocketAddr,
    limits: ServerLimits,
    pool: Arc<ProvisionPool>,
    shared: Arc<Shared<S, T>>,
}

impl<T: Transport> Server<(), T> {
    /// Creates a new builder for configuring the server instance.
    #[inline(always)]
    pub fn builder() -> ServerBuilder<(), T> {
        ServerBuilder {
            addr: None,
            router: None,
            state: (),
            server_limits: None,
            conn_limits: None,
            req_limits: None,
        }
    }
}

impl<S: Send + Sync + 'static, T: Transport> Server<S, T> {
    /// Accept loop over an already-bound listener.
    ///
    /// This is the seam for custom transports: a TLS stack implements
    /// [`Listener`] and [`Transport`] and passes its listener here; the
    /// engine consumes the abstraction and never learns the difference.
    pub async fn serve_with<L: Listener<Stream = T>>(&self, listener: L) {
        loop {
            // Admission control: park here while the pool is dry
            let provision = self.pool.acquire().await;

            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    continue;
                }
            };

            let shared = self.shared.clone();
            tokio::spawn(Engine::new(stream, peer, provision, shared).run());
        }
    }
}

impl<S: Send + Sync + 'static> Server<S, TcpStream> {
    /// Binds the listener and serves until the runtime shuts down.
    ///
    /// # Panics
    ///
    /// - When the configured [`security`](ServerLimits::security) is
    ///   [`Security::Tls`]: TLS terminates behind an external transport
    ///   adapter driving [`serve_with`](Self::serve_with), never here.
    /// - When the listener cannot be bound.
    pub async fn launch(self) {
        assert!(
            self.limits.security == Security::Plaintext,
            "TLS requires an external transport adapter; drive `serve_with` instead"
        );

        let listener = transport::bind(self.addr, self.limits.backlog_count)
            .expect("failed to bind the listening socket");

        tracing::info!(addr = %self.addr, "listening");
        self.serve_with(listener).await
    }

    /// Blocking entry point: builds the runtime ([`worker_threads`]
    /// workers, [`stack_size`] stacks) and drives [`launch`](Self::launch).
    ///
    /// [`worker_threads`]: ServerLimits::worker_threads
    /// [`stack_size`]: ServerLimits::stack_size
    pub fn run(self) {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_stack_size(self.limits.stack_size);

        if let Some(count) = self.limits.worker_threads {
            builder.worker_threads(count);
        }

        builder
            .build()
            .expect("failed to build the runtime")
            .block_on(self.launch());
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// `bind` and `router` are required; everything else has defaults. When
/// the server carries typed state, set it with [`state`](Self::state)
/// *before* [`router`](Self::router): the router's handler signatures
/// are typed by the state.
pub struct ServerBuilder<S = (), T: Transport = TcpStream> {
    addr: Option<SocketAddr>,
    router: Option<Router<S, T>>,
    state: S,
    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
}

impl<S: Send + Sync + 'static, T: Transport> ServerBuilder<S, T> {
    /// Sets the address the server will listen on.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Sets the routing table.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn router(mut self, router: Router<S, T>) -> Self {
        self.router = Some(router);
        self
    }

    /// Injects the shared server state handlers reach through
    /// [`Context::state`](crate::Context::state).
    ///
    /// # Panics
    ///
    /// When called after [`router`](Self::router): the router is typed
    /// by the state, so the state has to come first.
    #[track_caller]
    pub fn state<S2: Send + Sync + 'static>(self, state: S2) -> ServerBuilder<S2, T> {
        assert!(
            self.router.is_none(),
            "The `state` method must be called before `router`"
        );

        ServerBuilder {
            addr: self.addr,
            router: None,
            state,
            server_limits: self.server_limits,
            conn_limits: self.conn_limits,
            req_limits: self.req_limits,
        }
    }

    /// Configures listener, runtime, and admission limits.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection buffer retention and write sizing.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `bind` method must be called to create``
    /// - ``The `router` method must be called to create``
    #[inline(always)]
    #[track_caller]
    pub fn build(self) -> Server<S, T> {
        let addr = self.addr.expect("The `bind` method must be called to create");
        let router = self
            .router
            .expect("The `router` method must be called to create");

        let server_limits = self.server_limits.unwrap_or_default();
        let conn = self.conn_limits.unwrap_or_default();
        let req = self.req_limits.unwrap_or_default();

        let pool = ProvisionPool::new(&server_limits, conn.clone(), req.clone());

        Server {
            addr,
            limits: server_limits,
            pool,
            shared: Arc::new(Shared {
                router,
                state: self.state,
                conn,
                req,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Handled, Respond, StatusCode};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
        Ok(Respond::new()
            .status(StatusCode::Ok)
            .mime("text/plain")
            .body(b"over tcp")
            .into())
    }

    #[tokio::test]
    async fn serves_over_real_tcp() {
        let mut router: Router = Router::new();
        router.at("/").get(hello);

        let server = Server::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .router(router)
            .build();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve_with(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: t\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        let text = std::str::from_utf8(&response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nover tcp"));
    }

    #[tokio::test]
    async fn bind_helper_applies_backlog() {
        let listener = transport::bind("127.0.0.1:0".parse().unwrap(), 512).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    #[should_panic(expected = "The `bind` method must be called to create")]
    fn build_without_bind_panics() {
        let _ = Server::<(), TcpStream>::builder()
            .router(Router::new())
            .build();
    }

    #[test]
    #[should_panic(expected = "The `state` method must be called before `router`")]
    fn state_after_router_panics() {
        let _ = Server::<(), TcpStream>::builder()
            .router(Router::new())
            .state(42u32);
    }
}
