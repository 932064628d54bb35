//! `Socket` — descriptor lifecycle.
//!
//! Owns one descriptor, creates its `AsyncContext` on first async use, and
//! closes it with the two-phase policy in [`release_descriptor`]: try a
//! blocking close (honoring a configured linger) and fall back to an
//! abortive reset, never stalling the closing thread.
//!
//! Every async call delivers exactly one completion, even when the socket
//! is already closed or its context cannot be created.

use crate::addr::SockAddrBuf;
use crate::buffer::TransferBuffer;
use crate::context::{schedule_completion, AsyncContext, Submission};
use crate::engine::Engine;
use crate::operation::{
    AcceptCallback, AcceptOp, ConnectCallback, ConnectOp, Operation, TransferCallback, TransferOp,
};
use crate::sys;

use nix::errno::Errno;
use sockasync_core::error::{is_would_block, CoreError, CoreResult};
use sockasync_core::{log_debug, log_warn, SocketError};
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};

/// Syscalls used by the close policy.
///
/// **Contract:** each call acts on `fd` only and reports the raw errno.
pub trait CloseOps: Send + Sync {
    fn close(&self, fd: RawFd) -> Result<(), Errno>;
    fn set_blocking(&self, fd: RawFd) -> Result<(), Errno>;
    fn set_abortive_linger(&self, fd: RawFd) -> Result<(), Errno>;
}

/// `CloseOps` backed by the real syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysCloseOps;

impl CloseOps for SysCloseOps {
    fn close(&self, fd: RawFd) -> Result<(), Errno> {
        sys::close(fd)
    }

    fn set_blocking(&self, fd: RawFd) -> Result<(), Errno> {
        sys::set_nonblocking(fd, false)
    }

    fn set_abortive_linger(&self, fd: RawFd) -> Result<(), Errno> {
        sys::set_abortive_linger(fd)
    }
}

/// Close `fd`.
///
/// With `blocking` set, close as-is first. A would-block result means a
/// linger timeout is configured on a non-blocking descriptor: switch it to
/// blocking and close again. If that switch fails, or `blocking` is unset,
/// set a zero linger (tolerating `EINVAL`/`ENOPROTOOPT`) and close, which
/// resets the connection. If the linger itself fails the descriptor is
/// left open, since closing could block.
pub fn release_descriptor(ops: &dyn CloseOps, fd: RawFd, blocking: bool) -> Result<(), SocketError> {
    if blocking {
        match ops.close(fd) {
            Ok(()) => return Ok(()),
            Err(e) if !is_would_block(e as i32) => return Err(e.into()),
            Err(_) => {}
        }

        log_debug!("fd {}: close would block, retrying in blocking mode", fd);
        match ops.set_blocking(fd) {
            Ok(()) => return ops.close(fd).map_err(SocketError::from),
            Err(e) => log_debug!("fd {}: cannot switch to blocking ({}), closing abortively", fd, e),
        }
    }

    match ops.set_abortive_linger(fd) {
        Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOPROTOOPT) => {}
        Err(e) => {
            log_warn!("fd {}: zero linger failed ({}), leaving descriptor open", fd, e);
            return Err(e.into());
        }
    }
    ops.close(fd).map_err(SocketError::from)
}

fn core_to_socket_error(e: &CoreError) -> SocketError {
    match e {
        CoreError::Register(errno) | CoreError::Os(errno) | CoreError::ReactorSetup(errno) => {
            SocketError::from_errno(*errno)
        }
        CoreError::Socket(se) => *se,
        CoreError::InvalidConfig(_) => SocketError::InvalidArgument,
        CoreError::SpawnFailed => SocketError::NoBufferSpace,
    }
}

pub struct Socket {
    fd: RawFd,
    engine: Engine,
    /// `false` once closed. Held shared for the length of a submission so
    /// the descriptor cannot be released under an in-flight syscall.
    open: RwLock<bool>,
    context: Mutex<Option<Arc<AsyncContext>>>,
    blocking_close: AtomicBool,
    close_ops: Arc<dyn CloseOps>,
}

impl Socket {
    /// New non-blocking, close-on-exec socket.
    pub fn new(
        engine: Engine,
        domain: libc::c_int,
        ty: libc::c_int,
        protocol: libc::c_int,
    ) -> CoreResult<Self> {
        let fd = sys::socket(domain, ty, protocol).map_err(|e| CoreError::Socket(e.into()))?;
        Ok(Self::wrap(engine, fd))
    }

    /// TCP socket of the family of `addr`.
    pub fn stream_for(engine: Engine, addr: &SocketAddr) -> CoreResult<Self> {
        Self::new(engine, family_of(addr), libc::SOCK_STREAM, 0)
    }

    /// UDP socket of the family of `addr`.
    pub fn datagram_for(engine: Engine, addr: &SocketAddr) -> CoreResult<Self> {
        Self::new(engine, family_of(addr), libc::SOCK_DGRAM, 0)
    }

    /// Take ownership of an existing descriptor (for example one delivered
    /// by `accept_async`) and make it non-blocking. On error the caller
    /// still owns `fd`.
    pub fn from_raw(engine: Engine, fd: RawFd) -> CoreResult<Self> {
        sys::set_nonblocking(fd, true).map_err(|e| CoreError::Socket(e.into()))?;
        Ok(Self::wrap(engine, fd))
    }

    fn wrap(engine: Engine, fd: RawFd) -> Self {
        let blocking = engine.blocking_close();
        Self {
            fd,
            engine,
            open: RwLock::new(true),
            context: Mutex::new(None),
            blocking_close: AtomicBool::new(blocking),
            close_ops: Arc::new(SysCloseOps),
        }
    }

    /// Replace the syscalls used by `close()`.
    pub fn with_close_ops(mut self, ops: Arc<dyn CloseOps>) -> Self {
        self.close_ops = ops;
        self
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn is_closed(&self) -> bool {
        !*self.read_open()
    }

    /// Whether `close()` may try a blocking close before the abortive one.
    pub fn set_blocking_close(&self, enable: bool) {
        self.blocking_close.store(enable, Ordering::Relaxed);
    }

    pub fn set_reuseaddr(&self) -> Result<(), SocketError> {
        sys::set_reuseaddr(self.fd).map_err(SocketError::from)
    }

    pub fn bind(&self, addr: &SocketAddr) -> Result<(), SocketError> {
        sys::bind(self.fd, &SockAddrBuf::from(*addr)).map_err(SocketError::from)
    }

    pub fn listen(&self, backlog: i32) -> Result<(), SocketError> {
        sys::listen(self.fd, backlog).map_err(SocketError::from)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        let addr = sys::local_addr(self.fd).map_err(SocketError::from)?;
        addr.to_socket_addr().ok_or(SocketError::AddressFamilyNotSupported)
    }

    fn read_open(&self) -> RwLockReadGuard<'_, bool> {
        self.open.read().unwrap_or_else(|p| p.into_inner())
    }

    fn context_slot(&self) -> MutexGuard<'_, Option<Arc<AsyncContext>>> {
        self.context.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The socket's async context, created and registered on first use.
    pub fn async_context(&self) -> CoreResult<Arc<AsyncContext>> {
        let open = self.read_open();
        if !*open {
            return Err(CoreError::Socket(SocketError::Shutdown));
        }
        self.context_or_create()
    }

    fn context_or_create(&self) -> CoreResult<Arc<AsyncContext>> {
        let mut slot = self.context_slot();
        if let Some(ctx) = slot.as_ref() {
            return Ok(Arc::clone(ctx));
        }
        let ctx = AsyncContext::new(self.fd, &self.engine)?;
        *slot = Some(Arc::clone(&ctx));
        Ok(ctx)
    }

    fn complete_detached(&self, mut op: Operation, error: SocketError) -> Submission {
        op.set_error(error);
        schedule_completion(self.engine.scheduler().as_ref(), self.fd, op);
        if error.is_success() {
            Submission::Completed
        } else {
            Submission::Failed(error)
        }
    }

    /// After close a stopped context still orders the `Shutdown`
    /// completion behind operations it drained.
    fn submit_closed(&self, op: Operation) -> Submission {
        let existing = self.context_slot().clone();
        match existing {
            Some(ctx) => ctx.submit(op),
            None => self.complete_detached(op, SocketError::Shutdown),
        }
    }

    fn submit(&self, op: Operation) -> Submission {
        let open = self.read_open();
        if !*open {
            return self.submit_closed(op);
        }
        match self.context_or_create() {
            Ok(ctx) => ctx.submit(op),
            Err(e) => {
                log_warn!("fd {}: async context unavailable: {}", self.fd, e);
                self.complete_detached(op, core_to_socket_error(&e))
            }
        }
    }

    // ── Async operations ──

    /// Accept one connection. The callback owns the new descriptor.
    pub fn accept_async(&self, callback: AcceptCallback) -> Submission {
        self.submit(Operation::Accept(AcceptOp::new(SockAddrBuf::new(), callback)))
    }

    pub fn connect_async(&self, addr: &SocketAddr, callback: ConnectCallback) -> Submission {
        let mut op = Operation::Connect(ConnectOp::new(SockAddrBuf::from(*addr), callback));
        let open = self.read_open();
        if !*open {
            return self.submit_closed(op);
        }

        let existing = self.context_slot().clone();
        if let Some(ctx) = existing {
            return ctx.submit(op);
        }

        // An unconnected stream socket polls as hung up, so connect() is
        // issued before the descriptor is registered.
        if op.attempt(self.fd) {
            let error = op.error();
            return self.complete_detached(op, error);
        }
        match self.context_or_create() {
            Ok(ctx) => ctx.enqueue_not_ready(op),
            Err(e) => {
                log_warn!("fd {}: async context unavailable: {}", self.fd, e);
                self.complete_detached(op, core_to_socket_error(&e))
            }
        }
    }

    pub fn receive_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::receive(buffer, flags, None, callback)))
    }

    /// Receive a datagram (or stream data) and report the sender.
    pub fn receive_from_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::receive(
            buffer,
            flags,
            Some(SockAddrBuf::new()),
            callback,
        )))
    }

    pub fn send_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::send(buffer, flags, None, callback)))
    }

    pub fn send_to_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        addr: &SocketAddr,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::send(
            buffer,
            flags,
            Some(SockAddrBuf::from(*addr)),
            callback,
        )))
    }

    // ── Close ──

    /// Close the descriptor and complete every outstanding operation.
    ///
    /// Idempotent and callable from any thread. Pending operations always
    /// complete with `Shutdown`. The returned `Result` only reports the
    /// close syscall itself, for the owner of the socket; a second call
    /// returns `Ok(())`. Must not be called from a completion callback that
    /// runs inline on the submitting thread.
    ///
    /// Submitters are excluded only while the queues are stopped. The
    /// descriptor release, which may wait out a linger, runs after that,
    /// and submissions meanwhile complete with `Shutdown` without blocking.
    pub fn close(&self) -> Result<(), SocketError> {
        let (ctx, drained) = {
            let mut open = self.open.write().unwrap_or_else(|p| p.into_inner());
            if !*open {
                return Ok(());
            }
            *open = false;
            let ctx = self.context_slot().clone();
            let drained = match &ctx {
                Some(ctx) => ctx.stop_for_close(),
                None => Vec::new(),
            };
            (ctx, drained)
        };

        let fd = self.fd;
        let blocking = self.blocking_close.load(Ordering::Relaxed);
        let result = release_descriptor(self.close_ops.as_ref(), fd, blocking);
        if let Some(ctx) = ctx {
            ctx.complete_closed(drained);
        }
        match result {
            Ok(()) => log_debug!("fd {}: closed", fd),
            Err(e) => log_warn!("fd {}: close failed: {}", fd, e),
        }
        result
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn family_of(addr: &SocketAddr) -> libc::c_int {
    match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    }
}
