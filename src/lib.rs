//! zzz_web - High-concurrency asynchronous HTTP/1.1 server core
//!
//! A performance-oriented HTTP/1.1 server built around three pieces: a
//! per-connection state machine over pooled, reusable buffers; a
//! path-segment routing trie with typed captures and ordered
//! middleware; and a Server-Sent Events upgrade path backed by a
//! fan-out broadcast channel.
//!
//! # Features
//!
//! ## 🚀 Performance & Memory
//! - **Pooled provisions** - receive buffers, arenas, and request state
//!   are borrowed per connection and reused forever; resident memory is
//!   `connection_count_max × retained sizes`, no matter the load.
//! - **Zero-copy requests** - URIs, headers, and bodies are slices into
//!   the receive buffer; responses ship head and body without a joined
//!   allocation.
//!
//! ## 🔒 Security & Protection
//! - **Shed-load parsing** - malformed, oversized, or flooding requests
//!   terminate the connection without a response byte.
//! - **Fully configurable limits** for request size, URI length, header
//!   count, captures, and queries.
//!
//! ## 🌐 Routing & Streaming
//! - **Trie routing** with `%i`/`%f`/`%s` typed captures and `%r` tails.
//! - **Ordered middleware** with early termination.
//! - **SSE upgrades** - a handler hands its socket to a long-lived event
//!   stream; a [`Broadcast`](broadcast::Broadcast) fans values out to
//!   per-subscriber bounded queues.
//!
//! # Quick Start
//!
//! ```no_run
//! use zzz_web::{Context, Handled, Respond, Router, Server, StatusCode};
//!
//! fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
//!     Ok(Respond::new()
//!         .status(StatusCode::Ok)
//!         .mime("text/html")
//!         .body(b"Hello, World!")
//!         .into())
//! }
//!
//! fn main() {
//!     let mut router: Router = Router::new();
//!     router.at("/").get(hello);
//!
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .router(router)
//!         .build()
//!         .run();
//! }
//! ```
//!
//! For typed captures, middleware, and SSE streaming, see the runnable
//! demos under `demos/`.
pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod respond;
    pub(crate) mod types;
}
pub(crate) mod router {
    pub(crate) mod context;
    pub(crate) mod trie;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod provision;
    pub(crate) mod server_impl;
    pub(crate) mod transport;
}
pub mod broadcast;
pub(crate) mod errors;
pub mod limits;
pub mod sse;

pub use crate::{
    errors::HandlerError,
    http::{
        query,
        request::{Request, Url},
        respond::Respond,
        types::{Method, StatusCode, Version},
    },
    router::{
        context::{Context, Handled, HandlerFn, MiddlewareFn, Next, Outcome, Upgrade},
        trie::{Route, Router},
    },
    server::{
        server_impl::{Server, ServerBuilder},
        transport::{Listener, Transport},
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&mut Context<'_, ()>)>(f: F) {
    let limits = limits::ReqLimits::default();
    let request = Request::new(&limits);
    let queries = query::QueryMap::with_capacity(limits.query_count_max);
    let arena = bumpalo::Bump::new();

    let mut ctx = Context {
        request: &request,
        captures: &[],
        queries: &queries,
        arena: &arena,
        peer: "127.0.0.1:0".parse().unwrap(),
        state: &(),
    };
    f(&mut ctx);
}
