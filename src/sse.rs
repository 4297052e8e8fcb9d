//! Server-Sent Events: the post-upgrade life of a connection.
//!
//! A handler leaves the request/response world through
//! [`Context::to_sse`](crate::Context::to_sse). The engine writes the
//! preamble and hands the socket (plus the connection's provision) to
//! an [`Sse`], which owns both until close. The canonical subscriber
//! loop pairs it with a [`Broadcast`](crate::broadcast::Broadcast)
//! channel:
//!
//! ```no_run
//! # use zzz_web::{broadcast::Broadcast, sse::Sse, Context, Handled};
//! # use tokio::net::TcpStream;
//! fn stream<'p>(ctx: &mut Context<'p, Broadcast<u32>>) -> Handled<'p> {
//!     let mut channel = ctx.state().subscribe(16);
//!     let feed = ctx.state().clone();
//!
//!     Ok(ctx.to_sse(move |mut sse: Sse<TcpStream>| {
//!         tokio::spawn(async move {
//!             while let Some(value) = channel.recv().await {
//!                 let step = sse.send_data(format_args!("value: {}", value));
//!                 if step.await.is_err() {
//!                     break;
//!                 }
//!             }
//!             feed.unsubscribe(channel);
//!             sse.close().await;
//!         });
//!     }))
//! }
//! ```
//!
//! The loop ends when the channel closes (publisher gone, or this
//! subscriber unsubscribed) or the client disconnects (a send fails);
//! either way the channel is unsubscribed, the socket closed, and the
//! provision returned to its pool.

use crate::server::{provision::PooledProvision, transport::Transport};
use std::{fmt, future::Future, io};
use tokio::net::TcpStream;

pub(crate) const PREAMBLE: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: text/event-stream\r\n\
    Cache-Control: no-cache\r\n\
    Connection: keep-alive\r\n\r\n";

/// A long-lived event stream owning an upgraded connection.
///
/// Once constructed, the connection engine is out of the picture: the
/// `Sse` closes the socket and returns the provision. Dropping it has
/// the same effect as [`close`](Sse::close), minus the orderly TCP
/// shutdown.
pub struct Sse<T: Transport = TcpStream> {
    transport: T,
    provision: PooledProvision,
}

impl<T: Transport> Sse<T> {
    pub(crate) fn new(transport: T, provision: PooledProvision) -> Self {
        Self {
            transport,
            provision,
        }
    }

    /// Writes one framed event.
    ///
    /// An error means the client is gone; the caller should exit its
    /// loop and [`close`](Sse::close).
    pub async fn send(&mut self, event: Event<'_>) -> io::Result<()> {
        let frame = &mut self.provision.head;
        frame.clear();

        if let Some(kind) = event.event {
            frame.extend_from_slice(b"event: ");
            frame.extend_from_slice(kind.as_bytes());
            frame.extend_from_slice(b"\r\n");
        }
        if let Some(id) = event.id {
            frame.extend_from_slice(b"id: ");
            frame.extend_from_slice(id.as_bytes());
            frame.extend_from_slice(b"\r\n");
        }
        frame.extend_from_slice(b"data: ");
        frame.extend_from_slice(event.data);
        frame.extend_from_slice(b"\r\n\r\n");

        self.transport.send_all(&self.provision.head).await
    }

    /// Formats a data-only event straight into the provision's frame
    /// buffer and writes it. No intermediate allocation.
    pub fn send_data<'a>(
        &'a mut self,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = io::Result<()>> + Send + 'a {
        use fmt::Write;

        let frame = &mut self.provision.head;
        frame.clear();
        frame.extend_from_slice(b"data: ");
        let _ = ByteWriter(&mut *frame).write_fmt(args);
        frame.extend_from_slice(b"\r\n\r\n");

        self.transport.send_all(&self.provision.head)
    }

    /// Shuts the socket down and releases the provision to its pool.
    pub async fn close(mut self) {
        let _ = self.transport.shutdown().await;
    }
}

struct ByteWriter<'a>(&'a mut Vec<u8>);

impl fmt::Write for ByteWriter<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// One event on the wire: optional `event:` and `id:` lines, then the
/// `data:` payload.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    event: Option<&'a str>,
    id: Option<&'a str>,
    data: &'a [u8],
}

impl<'a> Event<'a> {
    #[inline(always)]
    pub fn data(data: &'a [u8]) -> Self {
        Self {
            event: None,
            id: None,
            data,
        }
    }

    /// Sets the event type (`event:` line).
    #[inline(always)]
    pub fn kind(mut self, kind: &'a str) -> Self {
        self.event = Some(kind);
        self
    }

    /// Sets the event id (`id:` line).
    #[inline(always)]
    pub fn id(mut self, id: &'a str) -> Self {
        self.id = Some(id);
        self
    }
}
