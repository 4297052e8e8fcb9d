//! Per-request facts and the middleware chain residual.

use crate::{
    errors::HandlerError,
    http::{request::Request, respond::Respond, types},
    query::QueryMap,
    server::transport::Transport,
    sse::Sse,
};
use bumpalo::Bump;
use std::net::SocketAddr;
use tokio::net::TcpStream;

// CAPTURE

/// A positional value extracted from a typed path-template parameter,
/// in traversal order: slot 0 is the first parameter encountered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Capture {
    Int(i64),
    Float(f64),
    Str(&'static [u8]),
}

// CONTEXT

/// Everything a middleware or handler gets to see for one request.
///
/// Borrows live until the response is sent; nothing here survives into
/// the next request on the connection. Shared server state injected via
/// [`ServerBuilder::state`](crate::ServerBuilder::state) is reachable
/// through [`state`](Context::state).
pub struct Context<'p, S = ()> {
    pub(crate) request: &'p Request,
    pub(crate) captures: &'p [Capture],
    pub(crate) queries: &'p QueryMap,
    pub(crate) arena: &'p Bump,
    pub(crate) peer: SocketAddr,
    pub(crate) state: &'p S,
}

impl<'p, S> Context<'p, S> {
    #[inline(always)]
    pub fn request(&self) -> &'p Request {
        self.request
    }

    #[inline(always)]
    pub fn queries(&self) -> &'p QueryMap {
        self.queries
    }

    /// Scratch arena for building response bodies without heap traffic;
    /// reset after the response goes out.
    ///
    /// ```
    /// # zzz_web::run_test(|ctx| {
    /// let body = bumpalo::format!(in ctx.arena(), "{} + {} = {}", 2, 2, 4);
    /// # assert_eq!(body.as_str(), "2 + 2 = 4");
    /// # });
    /// ```
    #[inline(always)]
    pub fn arena(&self) -> &'p Bump {
        self.arena
    }

    #[inline(always)]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline(always)]
    pub fn state(&self) -> &'p S {
        self.state
    }

    /// Number of captures filled by the route match.
    #[inline(always)]
    pub fn captures_len(&self) -> usize {
        self.captures.len()
    }

    /// The `%i` capture at `index`.
    #[inline(always)]
    pub fn capture_int(&self, index: usize) -> Option<i64> {
        match self.captures.get(index)? {
            Capture::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The `%f` capture at `index`.
    #[inline(always)]
    pub fn capture_float(&self, index: usize) -> Option<f64> {
        match self.captures.get(index)? {
            Capture::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// The `%s` or `%r` capture at `index`, UTF-8 validated.
    #[inline(always)]
    pub fn capture_str(&self, index: usize) -> Option<&'p str> {
        types::as_str(self.capture_bytes(index)?)
    }

    /// The `%s` or `%r` capture at `index` as raw bytes.
    #[inline(always)]
    pub fn capture_bytes(&self, index: usize) -> Option<&'p [u8]> {
        match self.captures.get(index)? {
            Capture::Str(value) => Some(*value),
            _ => None,
        }
    }

    /// Relinquishes the request/response lifecycle: the engine writes
    /// the SSE preamble, hands the socket and provision to an [`Sse`],
    /// and invokes `init` with it. The connection is no longer managed
    /// by the engine from that point on; `init` typically spawns the
    /// subscriber loop and owns the stream until close.
    #[inline]
    pub fn to_sse<T, F>(&mut self, init: F) -> Outcome<'p, T>
    where
        T: Transport,
        F: FnOnce(Sse<T>) + Send + 'static,
    {
        Outcome::Upgrade(Upgrade {
            init: Box::new(init),
        })
    }
}

// OUTCOME

/// What a handler produced: a response to encode, or an SSE upgrade
/// that takes the connection away from the engine.
pub enum Outcome<'p, T: Transport = TcpStream> {
    Respond(Respond<'p>),
    Upgrade(Upgrade<T>),
}

impl<'p, T: Transport> From<Respond<'p>> for Outcome<'p, T> {
    #[inline(always)]
    fn from(respond: Respond<'p>) -> Self {
        Outcome::Respond(respond)
    }
}

/// The deferred SSE initializer carried out of a handler.
pub struct Upgrade<T: Transport> {
    pub(crate) init: Box<dyn FnOnce(Sse<T>) + Send + 'static>,
}

/// Handler return type.
pub type Handled<'p, T = TcpStream> = Result<Outcome<'p, T>, HandlerError>;

/// A request handler. Plain function pointer: cheap to store in the
/// routing trie and trivially `Send + Sync`.
pub type HandlerFn<S = (), T = TcpStream> =
    for<'p, 'c> fn(&'c mut Context<'p, S>) -> Handled<'p, T>;

/// A middleware. Runs before the handler in registration order; calls
/// `next.run()` to continue, or returns its own [`Respond`] to
/// short-circuit the chain.
pub type MiddlewareFn<S = (), T = TcpStream> =
    for<'p, 'c, 'n> fn(&'c mut Context<'p, S>, Next<'n, S, T>) -> Handled<'p, T>;

// NEXT

/// The residual of the middleware chain plus the terminal handler.
///
/// Consumed by `run`: each middleware gets the remainder of the chain
/// and decides whether the request travels further. An empty residual
/// invokes the handler.
pub struct Next<'n, S = (), T: Transport = TcpStream> {
    middlewares: &'n [MiddlewareFn<S, T>],
    handler: HandlerFn<S, T>,
}

impl<'n, S, T: Transport> Next<'n, S, T> {
    #[inline(always)]
    pub(crate) fn new(middlewares: &'n [MiddlewareFn<S, T>], handler: HandlerFn<S, T>) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    /// Pops the first middleware and invokes it with the rest of the
    /// chain; invokes the handler once the chain is exhausted.
    pub fn run<'p>(self, ctx: &mut Context<'p, S>) -> Handled<'p, T> {
        match self.middlewares.split_first() {
            Some((middleware, rest)) => middleware(ctx, Next::new(rest, self.handler)),
            None => (self.handler)(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::ReqLimits,
        server::transport::mock::MockStream,
        tools::test_context,
        Respond, StatusCode,
    };

    type MockNext<'n> = Next<'n, (), MockStream>;
    type MockHandled<'p> = Handled<'p, MockStream>;

    fn terminal<'p>(_ctx: &mut Context<'p>) -> MockHandled<'p> {
        Ok(Respond::new().status(StatusCode::Ok).header("X-Order", "handler").into())
    }

    fn tag_outer<'p>(ctx: &mut Context<'p>, next: MockNext<'_>) -> MockHandled<'p> {
        match next.run(ctx)? {
            Outcome::Respond(respond) => Ok(respond.header("X-Order", "outer").into()),
            upgrade => Ok(upgrade),
        }
    }

    fn tag_inner<'p>(ctx: &mut Context<'p>, next: MockNext<'_>) -> MockHandled<'p> {
        match next.run(ctx)? {
            Outcome::Respond(respond) => Ok(respond.header("X-Order", "inner").into()),
            upgrade => Ok(upgrade),
        }
    }

    fn reject<'p>(_ctx: &mut Context<'p>, _next: MockNext<'_>) -> MockHandled<'p> {
        Ok(Respond::new()
            .status(StatusCode::Forbidden)
            .header("X-Order", "reject")
            .into())
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let limits = ReqLimits::default();
        test_context(&limits, |mut ctx| {
            let chain: &[MiddlewareFn<(), MockStream>] = &[tag_outer, tag_inner];

            let outcome = Next::new(chain, terminal).run(&mut ctx).unwrap();
            let Outcome::Respond(respond) = outcome else {
                panic!("expected a response");
            };

            // Headers append on the way back out: handler first, then
            // inner, then outer, so outer ran first going in.
            let order: Vec<&str> = respond.headers.iter().map(|&(_, v)| v).collect();
            assert_eq!(order, ["handler", "inner", "outer"]);
        });
    }

    #[test]
    fn short_circuit_skips_the_handler() {
        let limits = ReqLimits::default();
        test_context(&limits, |mut ctx| {
            let chain: &[MiddlewareFn<(), MockStream>] = &[tag_outer, reject, tag_inner];

            let outcome = Next::new(chain, terminal).run(&mut ctx).unwrap();
            let Outcome::Respond(respond) = outcome else {
                panic!("expected a response");
            };

            assert_eq!(respond.status, Some(StatusCode::Forbidden));
            let order: Vec<&str> = respond.headers.iter().map(|&(_, v)| v).collect();
            assert_eq!(order, ["reject", "outer"]);
        });
    }

    #[test]
    fn empty_chain_is_just_the_handler() {
        let limits = ReqLimits::default();
        test_context(&limits, |mut ctx| {
            let outcome = Next::new(&[], terminal).run(&mut ctx).unwrap();
            let Outcome::Respond(respond) = outcome else {
                panic!("expected a response");
            };
            assert_eq!(respond.status, Some(StatusCode::Ok));
        });
    }

    #[test]
    fn capture_accessors_check_the_tag() {
        let limits = ReqLimits::default();
        crate::tools::test_context_with(
            &limits,
            &[Capture::Int(42), Capture::Str(b"alice"), Capture::Float(2.5)],
            |ctx| {
                assert_eq!(ctx.captures_len(), 3);
                assert_eq!(ctx.capture_int(0), Some(42));
                assert_eq!(ctx.capture_str(1), Some("alice"));
                assert_eq!(ctx.capture_float(2), Some(2.5));

                // Wrong tag or slot: None, never a panic
                assert_eq!(ctx.capture_str(0), None);
                assert_eq!(ctx.capture_int(3), None);
            },
        );
    }
}
