//! Server configuration limits
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Header flooding
//! - Oversized request floods
//!
//! # Memory Consumption
//!
//! Resident memory is bounded by the provision pool:
//!
//! `Total` ≈ [`connection_count_max`](ServerLimits::connection_count_max) ×
//! ([`list_recv_bytes_retain`](ConnLimits::list_recv_bytes_retain) +
//! [`connection_arena_bytes_retain`](ConnLimits::connection_arena_bytes_retain) +
//! 2 × [`socket_buffer_bytes`](ConnLimits::socket_buffer_bytes) + fixed arrays)
//!
//! A connection may temporarily grow its receive buffer up to
//! [`request_bytes_max`](ReqLimits::request_bytes_max); the excess is
//! released when the request completes.
//!
//! # Examples
//!
//! ```no_run
//! use zzz_web::{limits::{ReqLimits, ServerLimits}, Router, Server};
//!
//! let router: Router<()> = Router::new();
//!
//! Server::builder()
//!     .bind("127.0.0.1:8080".parse().unwrap())
//!     .router(router)
//!     .server_limits(ServerLimits {
//!         connection_count_max: Some(4096), // Higher concurrency
//!         ..ServerLimits::default()
//!     })
//!     .request_limits(ReqLimits {
//!         header_count_max: 64, // More headers for complex APIs
//!         ..ReqLimits::default()
//!     })
//!     .build()
//!     .run();
//! ```

use std::time::Duration;

/// Controls listener setup, runtime sizing, and connection admission.
///
/// # Admission
///
/// ```text
/// [----------------]        [-----------------]        [------------]
/// [ Borrow a       ] =====> [ Accept one TCP  ] =====> [ Spawn the  ]
/// [ provision      ]        [ connection      ]        [ engine     ]
/// [----------------]        [-----------------]        [------------]
///        /\
///        || pool empty: park (wait_strategy), never refuse
/// ```
///
/// The provision is borrowed *before* `accept`, so a full pool parks the
/// acceptor instead of dropping already-established sockets. Concurrency
/// is therefore bounded by the pool, not by task count.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Listen backlog passed to the OS when binding (default: `512`).
    pub backlog_count: usize,

    /// Worker threads for the runtime built by
    /// [`Server::run`](crate::Server::run) (default: `None` = one per core).
    ///
    /// Ignored when the server is launched on an already-running runtime.
    pub worker_threads: Option<usize>,

    /// Stack size for runtime worker threads (default: `1 MiB`).
    pub stack_size: usize,

    /// Maximum number of provisions, and therefore of concurrently served
    /// connections (default: `Some(1024)`).
    ///
    /// `None` removes the bound: the pool grows with demand and memory is
    /// limited only by what the host provides.
    pub connection_count_max: Option<usize>,

    /// How the acceptor parks while the provision pool is empty
    /// (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Transport security of the bound listener (default: `Plaintext`).
    ///
    /// The engine itself only consumes the [`Transport`](crate::Transport)
    /// abstraction; a TLS stack terminates the handshake behind the same
    /// trait and feeds the engine through
    /// [`Server::serve_with`](crate::Server::serve_with).
    pub security: Security,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            backlog_count: 512,
            worker_threads: None,
            stack_size: 1024 * 1024,
            connection_count_max: Some(1024),
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            security: Security::Plaintext,

            _priv: (),
        }
    }
}

/// Strategy for acceptor parking when no provision is available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`].
    ///
    /// Lowest wake-up latency, but spins a worker at full load while the
    /// pool stays empty.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Transport flavor of the listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plain TCP.
    Plaintext,
    /// TLS-wrapped TCP, terminated by an external transport adapter.
    Tls,
}

/// Per-connection buffer retention and write sizing.
///
/// These limits shape what a pooled provision keeps between requests.
/// Buffers may grow while a request is in flight; the clear that runs
/// after each response shrinks them back to the retention thresholds, so
/// a single huge request does not pin memory for the connection lifetime.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Arena bytes a provision keeps across requests (default: `1 KiB`).
    pub connection_arena_bytes_retain: usize,

    /// Receive-buffer bytes a provision keeps across requests
    /// (default: `1 KiB`).
    pub list_recv_bytes_retain: usize,

    /// Hard cap on receive-buffer growth (default: `2 MiB`).
    pub list_recv_bytes_max: usize,

    /// Window size for response writes, and size of the response head and
    /// scratch buffers (default: `1 KiB`).
    pub socket_buffer_bytes: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            connection_arena_bytes_retain: 1024,
            list_recv_bytes_retain: 1024,
            list_recv_bytes_max: 2 * 1024 * 1024,
            socket_buffer_bytes: 1024,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits.
///
/// A request that violates any of these is shed: the connection closes
/// without a response byte.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum total request size, head and body (default: `2 MiB`).
    pub request_bytes_max: usize,

    /// Maximum URI length including the query string (default: `2 KiB`).
    pub request_uri_bytes_max: usize,

    /// Maximum number of headers per request (default: `32`).
    ///
    /// Typical browsers send 10-12 headers; 32 leaves room for proxies
    /// and custom headers while stopping header flooding.
    pub header_count_max: usize,

    /// Maximum number of typed path captures per match (default: `8`).
    pub capture_count_max: usize,

    /// Maximum number of query parameters (default: `8`).
    pub query_count_max: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            request_bytes_max: 2 * 1024 * 1024,
            request_uri_bytes_max: 2 * 1024,
            header_count_max: 32,
            capture_count_max: 8,
            query_count_max: 8,

            _priv: (),
        }
    }
}
