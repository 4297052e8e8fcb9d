//! The socket abstraction the engine consumes.
//!
//! The connection engine never touches `TcpStream` directly; it drives
//! a [`Transport`], and the acceptor side drives a [`Listener`]. A TLS
//! stack terminates its handshake behind the same two traits and feeds
//! the engine through [`Server::serve_with`](crate::Server::serve_with).

use std::{future::Future, io, net::SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

/// One accepted connection.
///
/// `recv` returning `Ok(0)` is the closed signal; the engine treats it
/// as clean termination, every other error as a connection fault.
pub trait Transport: Send + 'static {
    fn recv<'a>(&'a mut self, buf: &'a mut [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    /// Writes the whole of `data`, suspending as needed. A partial write
    /// that cannot complete surfaces as an error.
    fn send_all<'a>(&'a mut self, data: &'a [u8]) -> impl Future<Output = io::Result<()>> + Send + 'a;

    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_;

    /// Disables Nagle's algorithm. Called once per accepted connection.
    fn set_nodelay(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    #[inline(always)]
    fn recv<'a>(&'a mut self, buf: &'a mut [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a {
        self.read(buf)
    }

    #[inline(always)]
    fn send_all<'a>(&'a mut self, data: &'a [u8]) -> impl Future<Output = io::Result<()>> + Send + 'a {
        self.write_all(data)
    }

    #[inline(always)]
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send + '_ {
        AsyncWriteExt::shutdown(self)
    }

    #[inline(always)]
    fn set_nodelay(&self) -> io::Result<()> {
        TcpStream::set_nodelay(self, true)
    }
}

/// A bound listening socket.
pub trait Listener: Send + Sync + 'static {
    type Stream: Transport;

    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Listener for TcpListener {
    type Stream = TcpStream;

    #[inline(always)]
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Binds a TCP listener with an explicit backlog and reuse-addr.
pub(crate) fn bind(addr: SocketAddr, backlog: usize) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.try_into().unwrap_or(i32::MAX))?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    /// Scripted transport: `recv` replays the given chunks (so tests can
    /// split a request at any byte, including inside `\r\n\r\n`), then
    /// reports closed; `send_all` captures everything written.
    pub(crate) struct MockStream {
        chunks: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
        pub(crate) fail_send: bool,
        /// Successful sends left before the peer "disconnects".
        pub(crate) sends_left: Option<usize>,
        pub(crate) shut_down: bool,
    }

    impl MockStream {
        pub(crate) fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            Self {
                chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_send: false,
                sends_left: None,
                shut_down: false,
            }
        }

        /// Handle for inspecting output after the stream moved into the
        /// engine or an SSE task.
        pub(crate) fn sent(&self) -> Arc<Mutex<Vec<u8>>> {
            self.sent.clone()
        }
    }

    impl Transport for MockStream {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };

            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push_front(chunk.split_off(n));
            }
            Ok(n)
        }

        async fn send_all(&mut self, data: &[u8]) -> io::Result<()> {
            match &mut self.sends_left {
                Some(0) => self.fail_send = true,
                Some(left) => *left -= 1,
                None => {}
            }
            if self.fail_send {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
            }
            self.sent.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn shutdown(&mut self) -> io::Result<()> {
            self.shut_down = true;
            Ok(())
        }

        fn set_nodelay(&self) -> io::Result<()> {
            Ok(())
        }
    }
}
