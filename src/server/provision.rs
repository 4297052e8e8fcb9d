//! Per-connection resource bundle and its pool.
//!
//! A provision carries everything one connection needs that is worth
//! reusing: the receive buffer, the scratch arena, capture and query
//! storage, the request, and the response head/scratch buffers. The
//! pool bounds how many exist at once, which is what bounds server
//! concurrency and resident memory.

use crate::{
    errors::ErrorKind,
    http::request::Request,
    limits::{ConnLimits, ReqLimits, ServerLimits, WaitStrategy},
    query::QueryMap,
    router::context::Capture,
    server::transport::Transport,
};
use bumpalo::Bump;
use crossbeam::queue::SegQueue;
use memchr::memmem;
use std::{
    mem,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{task::yield_now, time::sleep as tokio_sleep};

// RECV BUFFER

/// Growable receive buffer with bounded growth and bounded retention.
///
/// The backing storage is kept zero-extended so reads always land in
/// initialized memory; `len` tracks how much of it holds received bytes.
#[derive(Debug, Default)]
pub(crate) struct RecvBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl RecvBuffer {
    #[inline(always)]
    pub(crate) fn ensure_init(&mut self, retain: usize) {
        if self.buf.is_empty() {
            self.buf.resize(retain.max(64), 0);
        }
    }

    /// One `recv` into the free tail, growing (doubling, capped at
    /// `max`) when the buffer is full. `Ok(0)` from the transport maps
    /// to [`ErrorKind::SocketClosed`]; a full buffer that cannot grow
    /// maps to [`ErrorKind::ContentTooLarge`].
    pub(crate) async fn recv_some<T: Transport>(
        &mut self,
        transport: &mut T,
        max: usize,
    ) -> Result<usize, ErrorKind> {
        if self.len == self.buf.len() {
            if self.buf.len() >= max {
                return Err(ErrorKind::ContentTooLarge);
            }
            let grown = (self.buf.len() * 2).min(max);
            self.buf.resize(grown, 0);
        }

        let count = transport.recv(&mut self.buf[self.len..]).await?;
        if count == 0 {
            return Err(ErrorKind::SocketClosed);
        }

        self.len += count;
        Ok(count)
    }

    /// Scans for `\r\n\r\n` over the freshly received tail only: the
    /// last `recv_count + 3` bytes, so a terminator split across two
    /// recvs is still found. Returns the index one past the delimiter.
    #[inline]
    pub(crate) fn find_terminator(&self, scanned: usize) -> Option<usize> {
        let start = scanned.saturating_sub(3);
        memmem::find(&self.buf[start..self.len], b"\r\n\r\n").map(|pos| start + pos + 4)
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn head_mut(&mut self, end: usize) -> &mut [u8] {
        &mut self.buf[..end]
    }

    // SAFETY: same discipline as the request parser: the slice points
    // into this buffer, which the provision keeps alive and only
    // rewrites after the per-request clear.
    #[inline(always)]
    pub(crate) fn slice_static(&self, start: usize, count: usize) -> &'static [u8] {
        unsafe { mem::transmute(&self.buf[start..start + count]) }
    }

    #[inline]
    pub(crate) fn clear(&mut self, retain: usize) {
        self.len = 0;
        if self.buf.len() > retain {
            self.buf.truncate(retain);
            self.buf.shrink_to_fit();
        }
    }
}

// PROVISION

/// The reusable resource bundle of one connection.
pub(crate) struct Provision {
    pub(crate) recv: RecvBuffer,
    pub(crate) arena: Bump,
    pub(crate) captures: Vec<Capture>,
    pub(crate) queries: QueryMap,
    pub(crate) request: Request,
    pub(crate) head: Vec<u8>,
    pub(crate) scratch: Vec<u8>,
    initialized: bool,
}

impl Provision {
    #[inline]
    fn new() -> Self {
        Self {
            recv: RecvBuffer::default(),
            arena: Bump::new(),
            captures: Vec::new(),
            queries: QueryMap::default(),
            request: Request::new(&ReqLimits::default()),
            head: Vec::new(),
            scratch: Vec::new(),
            initialized: false,
        }
    }

    /// One-time buffer materialization, on first borrow.
    #[inline]
    fn init(&mut self, conn: &ConnLimits, req: &ReqLimits) {
        if self.initialized {
            return;
        }

        self.recv.ensure_init(conn.list_recv_bytes_retain);
        self.arena = Bump::with_capacity(conn.connection_arena_bytes_retain);
        self.captures = Vec::with_capacity(req.capture_count_max);
        self.queries = QueryMap::with_capacity(req.query_count_max);
        self.request = Request::new(req);
        self.head = Vec::with_capacity(conn.socket_buffer_bytes);
        self.scratch = vec![0; conn.socket_buffer_bytes];
        self.initialized = true;
    }

    /// Per-request clear: request/captures/queries reset, recv buffer
    /// and arena shrunk back to their retention thresholds.
    pub(crate) fn clear(&mut self, conn: &ConnLimits) {
        self.request.reset();
        self.captures.clear();
        self.queries.clear();
        self.head.clear();
        self.recv.clear(conn.list_recv_bytes_retain);

        self.arena.reset();
        if self.arena.chunk_capacity() > conn.connection_arena_bytes_retain {
            self.arena = Bump::with_capacity(conn.connection_arena_bytes_retain);
        }
    }
}

// POOL

/// Provision pool: lazy creation up to `connection_count_max`, then the
/// acceptor parks until a release. Never refuses an already-established
/// connection.
pub(crate) struct ProvisionPool {
    idle: SegQueue<Provision>,
    created: AtomicUsize,
    limit: Option<usize>,
    wait: WaitStrategy,
    conn: ConnLimits,
    req: ReqLimits,
}

impl ProvisionPool {
    pub(crate) fn new(server: &ServerLimits, conn: ConnLimits, req: ReqLimits) -> Arc<Self> {
        Arc::new(Self {
            idle: SegQueue::new(),
            created: AtomicUsize::new(0),
            limit: server.connection_count_max,
            wait: server.wait_strategy.clone(),
            conn,
            req,
        })
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> PooledProvision {
        loop {
            if let Some(provision) = self.idle.pop() {
                return PooledProvision::new(provision, self.clone());
            }

            if self.try_reserve() {
                let mut provision = Provision::new();
                provision.init(&self.conn, &self.req);
                return PooledProvision::new(provision, self.clone());
            }

            match &self.wait {
                WaitStrategy::Yield => yield_now().await,
                WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
            }
        }
    }

    #[inline]
    fn try_reserve(&self) -> bool {
        self.created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| match self.limit {
                Some(limit) if count >= limit => None,
                _ => Some(count + 1),
            })
            .is_ok()
    }
}

/// RAII borrow of a provision.
///
/// Dropping the guard clears the provision and returns it to the pool,
/// so every exit path (clean close, socket error, handler panic)
/// releases it. An SSE upgrade moves the guard into the stream, which
/// extends the borrow to the stream's lifetime.
pub(crate) struct PooledProvision {
    provision: Option<Provision>,
    pool: Arc<ProvisionPool>,
}

impl PooledProvision {
    #[inline]
    fn new(provision: Provision, pool: Arc<ProvisionPool>) -> Self {
        Self {
            provision: Some(provision),
            pool,
        }
    }
}

impl Deref for PooledProvision {
    type Target = Provision;

    #[inline(always)]
    fn deref(&self) -> &Provision {
        self.provision.as_ref().unwrap()
    }
}

impl DerefMut for PooledProvision {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Provision {
        self.provision.as_mut().unwrap()
    }
}

impl Drop for PooledProvision {
    fn drop(&mut self) {
        if let Some(mut provision) = self.provision.take() {
            provision.clear(&self.pool.conn);
            self.pool.idle.push(provision);
        }
    }
}
