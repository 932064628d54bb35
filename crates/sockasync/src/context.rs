//! `AsyncContext` — the per-descriptor multiplexer.
//!
//! Owns the receive, send and accept-or-connect queues of one socket, its
//! reactor registration, and the two locks that order everything:
//!
//! - the **queue lock** guards the three queues and the registered
//!   interest mask. It is held for single queue mutations only and never
//!   while a completion is scheduled.
//! - the **close lock** is held for a whole readiness dispatch and for the
//!   whole close sequence, so HUP teardown and explicit close cannot
//!   interleave.
//!
//! Submissions never block: an operation either finishes inline or is
//! left in its queue for a later readiness event. Every completion runs on
//! the scheduler, on the lane of its (descriptor, direction).

use crate::addr::SockAddrBuf;
use crate::buffer::TransferBuffer;
use crate::engine::Engine;
use crate::operation::{
    AcceptCallback, AcceptOp, ConnectCallback, ConnectOp, Direction, Operation, TransferCallback,
    TransferOp,
};
use crate::queue::{Begin, Gate, Head, OperationQueue};
use crate::sys;

use nix::errno::Errno;
use sockasync_core::error::{CoreError, CoreResult};
use sockasync_core::{
    log_debug, log_trace, log_warn, CompletionScheduler, EventHandler, EventMask, Reactor,
    SocketError,
};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// What a submission call reports synchronously. The callback fires exactly
/// once in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Finished inline with success.
    Completed,
    /// Queued; the result arrives through the callback.
    Pending,
    /// Finished inline with an error (including `Shutdown`).
    Failed(SocketError),
}

impl Submission {
    #[inline]
    pub fn is_pending(self) -> bool {
        self == Submission::Pending
    }
}

struct Queues {
    receive: OperationQueue,
    send: OperationQueue,
    accept_connect: OperationQueue,
    /// Interest currently registered with the reactor. Empty once torn down.
    registered: EventMask,
}

impl Queues {
    fn get(&mut self, dir: Direction) -> &mut OperationQueue {
        match dir {
            Direction::Receive => &mut self.receive,
            Direction::Send => &mut self.send,
            Direction::AcceptConnect => &mut self.accept_connect,
        }
    }

    fn stop_all(&mut self) -> Vec<Operation> {
        let mut ops = self.receive.stop();
        ops.extend(self.send.stop());
        ops.extend(self.accept_connect.stop());
        ops
    }

    fn settle_all(&mut self) -> Vec<Operation> {
        let mut ops = self.receive.settle();
        ops.extend(self.send.settle());
        ops.extend(self.accept_connect.settle());
        ops
    }
}

pub struct AsyncContext {
    fd: RawFd,
    queues: Mutex<Queues>,
    close_lock: Mutex<()>,
    reactor: Arc<dyn Reactor>,
    scheduler: Arc<dyn CompletionScheduler>,
    this: Weak<AsyncContext>,
}

fn any_op(_: &Operation) -> bool {
    true
}

impl AsyncContext {
    /// Create the context for `fd` and register `IN | OUT | RDHUP | ET`.
    pub fn new(fd: RawFd, engine: &Engine) -> CoreResult<Arc<Self>> {
        let ctx = Arc::new_cyclic(|this| AsyncContext {
            fd,
            queues: Mutex::new(Queues {
                receive: OperationQueue::new(),
                send: OperationQueue::new(),
                accept_connect: OperationQueue::new(),
                registered: EventMask::NONE,
            }),
            close_lock: Mutex::new(()),
            reactor: Arc::clone(engine.reactor()),
            scheduler: Arc::clone(engine.scheduler()),
            this: this.clone(),
        });

        {
            let mut q = ctx.lock_queues();
            let interest = EventMask::DEFAULT_INTEREST;
            ctx.reactor
                .register(fd, interest, ctx.handler())
                .map_err(|e| CoreError::Register(e as i32))?;
            q.registered = interest;
        }
        log_trace!("fd {}: async context created", fd);
        Ok(ctx)
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Interest currently registered with the reactor.
    pub fn registered_events(&self) -> EventMask {
        self.lock_queues().registered
    }

    fn handler(&self) -> Weak<dyn EventHandler> {
        self.this.clone()
    }

    fn lock_queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_close(&self) -> MutexGuard<'_, ()> {
        self.close_lock.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── Public operation surface ──

    pub fn accept_async(&self, address: SockAddrBuf, callback: AcceptCallback) -> Submission {
        self.submit(Operation::Accept(AcceptOp::new(address, callback)))
    }

    pub fn connect_async(&self, address: SockAddrBuf, callback: ConnectCallback) -> Submission {
        self.submit(Operation::Connect(ConnectOp::new(address, callback)))
    }

    pub fn receive_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::receive(buffer, flags, None, callback)))
    }

    /// Receive and report the sender's address in the completion.
    pub fn receive_from_async(
        &self,
        buffer: TransferBuffer,
        flags: i32,
        address: SockAddrBuf,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::receive(
            buffer,
            flags,
            Some(address),
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
        address: SockAddrBuf,
        callback: TransferCallback,
    ) -> Submission {
        self.submit(Operation::Transfer(TransferOp::send(
            buffer,
            flags,
            Some(address),
            callback,
        )))
    }

    // ── Submission ──

    pub(crate) fn submit(&self, op: Operation) -> Submission {
        let dir = op.direction();
        let gated = self.lock_queues().get(dir).gate(op);
        let mut op = match gated {
            Gate::Attempt(op) => op,
            Gate::Queued => return Submission::Pending,
            Gate::Stopped(mut op) => {
                op.set_error(SocketError::Shutdown);
                return self.finish(op);
            }
            Gate::Draining => return Submission::Failed(SocketError::Shutdown),
        };

        if op.attempt(self.fd) {
            return self.finish(op);
        }
        self.enqueue_not_ready(op)
    }

    /// Queue an operation whose last attempt was not ready, retrying inline
    /// while the queue reports a readiness edge nobody consumed.
    pub(crate) fn enqueue_not_ready(&self, op: Operation) -> Submission {
        let dir = op.direction();
        let mut op = op;
        loop {
            let begun = self.lock_queues().get(dir).begin(op);
            match begun {
                Begin::Enqueued => return Submission::Pending,
                Begin::Retry(retry) => {
                    op = retry;
                    if op.attempt(self.fd) {
                        return self.finish(op);
                    }
                }
                Begin::Stopped(mut stopped) => {
                    stopped.set_error(SocketError::Shutdown);
                    return self.finish(stopped);
                }
                Begin::Draining => return Submission::Failed(SocketError::Shutdown),
            }
        }
    }

    fn finish(&self, op: Operation) -> Submission {
        let error = op.error();
        self.schedule_completion(op);
        if error.is_success() {
            Submission::Completed
        } else {
            Submission::Failed(error)
        }
    }

    fn schedule_completion(&self, op: Operation) {
        schedule_completion(self.scheduler.as_ref(), self.fd, op);
    }

    // ── Readiness dispatch ──

    /// Attempt `op` once more on a descriptor the kernel has given a
    /// definitive state, falling back to `pending` or `Shutdown`.
    fn force_complete(&self, mut op: Operation, pending: &mut Option<SocketError>) {
        if op.attempt(self.fd) {
            take_pending_error(&mut op, pending);
        } else {
            op.set_error(pending.take().unwrap_or(SocketError::Shutdown));
        }
        self.schedule_completion(op);
    }

    /// Stop every queue, drop the registration, and complete what was
    /// queued. Runs under the close lock.
    fn teardown_hup(&self, pending: &mut Option<SocketError>) {
        let drained = {
            let mut q = self.lock_queues();
            let ops = q.stop_all();
            self.unregister_locked(&mut q);
            ops
        };
        log_debug!("fd {}: HUP teardown, {} ops drained", self.fd, drained.len());
        for op in drained {
            self.force_complete(op, pending);
        }
        self.complete_parked();
    }

    /// Complete, with `Shutdown`, submissions that reached a stopped queue
    /// while its drained operations were still being scheduled. Loops until
    /// no queue is draining.
    fn complete_parked(&self) {
        loop {
            let parked = self.lock_queues().settle_all();
            if parked.is_empty() {
                return;
            }
            for mut op in parked {
                op.set_error(SocketError::Shutdown);
                self.schedule_completion(op);
            }
        }
    }

    /// Peer closed its write side: finish receives and stop reading.
    fn handle_rdhup(&self, pending: &mut Option<SocketError>) {
        let drained = self.lock_queues().receive.stop();
        log_debug!("fd {}: RDHUP, {} receives drained", self.fd, drained.len());
        for op in drained {
            self.force_complete(op, pending);
        }
        self.complete_parked();

        let mut q = self.lock_queues();
        if q.registered.is_empty() {
            return;
        }
        let remaining = q.registered & !(EventMask::IN | EventMask::RDHUP);
        if remaining == q.registered {
            return;
        }
        match self.reactor.unregister(self.fd, remaining) {
            Ok(()) => {}
            Err(Errno::EBADF) | Err(Errno::ENOENT) => {
                log_debug!("fd {}: narrowing interest raced with close", self.fd);
            }
            Err(e) => log_warn!("fd {}: narrowing interest failed: {}", self.fd, e),
        }
        q.registered = remaining;
    }

    /// Drain `dir` up to the current tail or the first not-ready head.
    /// Returns true when newer operations remain behind the snapshot and
    /// the descriptor must be re-armed.
    fn drain(
        &self,
        dir: Direction,
        wanted: fn(&Operation) -> bool,
        pending: &mut Option<SocketError>,
    ) -> bool {
        let Some(bound) = self.lock_queues().get(dir).snapshot() else {
            return false;
        };

        loop {
            let head = self.lock_queues().get(dir).checkout_head(bound, wanted);
            let mut op = match head {
                Head::Ready(op) => op,
                Head::BeyondSnapshot => return true,
                Head::Empty | Head::Skipped => return false,
            };

            let done = if op.attempt(self.fd) {
                take_pending_error(&mut op, pending);
                true
            } else if let Some(e) = pending.take() {
                op.set_error(e);
                true
            } else {
                false
            };

            if !done {
                self.lock_queues().get(dir).restore(op);
                return false;
            }
            // The head slot stays occupied until the completion is
            // scheduled, so newer submissions queue behind it.
            self.schedule_completion(op);
            self.lock_queues().get(dir).end();
        }
    }

    /// Re-register current interest so the reactor raises a fresh edge for
    /// operations queued behind a drained snapshot.
    fn rearm(&self) {
        let q = self.lock_queues();
        if q.registered.is_empty() {
            return;
        }
        if let Err(e) = self.reactor.register(self.fd, q.registered, self.handler()) {
            log_warn!("fd {}: re-arm failed: {}", self.fd, e);
        }
    }

    fn unregister_locked(&self, q: &mut Queues) {
        if q.registered.is_empty() {
            return;
        }
        match self.reactor.unregister(self.fd, EventMask::NONE) {
            Ok(()) => {}
            Err(Errno::EBADF) | Err(Errno::ENOENT) => {
                log_debug!("fd {}: already gone from reactor", self.fd);
            }
            Err(e) => log_warn!("fd {}: unregister failed: {}", self.fd, e),
        }
        q.registered = EventMask::NONE;
    }

    // ── Close ──

    /// Tear down for an explicit close: stop every queue and leave the
    /// reactor while the descriptor is still open, run `release` (the
    /// descriptor close itself), then complete every drained operation with
    /// `Shutdown`. Nothing touches the descriptor after `release`.
    ///
    /// Unlike HUP teardown, drained operations are not attempted again: the
    /// descriptor number may already belong to another socket.
    ///
    /// Safe to call more than once; later calls drain nothing.
    pub fn close<R>(&self, release: impl FnOnce() -> R) -> R {
        let drained = self.stop_for_close();
        let result = release();
        self.complete_closed(drained);
        result
    }

    /// First half of `close()`: stop every queue and unregister. Returns the
    /// drained operations, which must be passed to `complete_closed()`.
    pub(crate) fn stop_for_close(&self) -> Vec<Operation> {
        let _close = self.lock_close();
        let mut q = self.lock_queues();
        let ops = q.stop_all();
        self.unregister_locked(&mut q);
        ops
    }

    /// Second half of `close()`: complete `drained` with `Shutdown`, then
    /// whatever was parked behind them.
    pub(crate) fn complete_closed(&self, drained: Vec<Operation>) {
        if !drained.is_empty() {
            log_debug!("fd {}: close drained {} ops", self.fd, drained.len());
        }
        for mut op in drained {
            op.set_error(SocketError::Shutdown);
            self.schedule_completion(op);
        }
        self.complete_parked();
    }
}

impl EventHandler for AsyncContext {
    fn handle_events(&self, events: EventMask) {
        let _close = self.lock_close();
        let mut events = events;
        let mut pending: Option<SocketError> = None;
        log_trace!("fd {}: events {:?}", self.fd, events);

        // Torn down: the descriptor may already be closed.
        if self.lock_queues().registered.is_empty() {
            return;
        }

        if events.contains(EventMask::ERR) {
            match sys::socket_error(self.fd) {
                Ok(0) => {}
                Ok(errno) => {
                    let e = SocketError::from_errno(errno);
                    log_debug!("fd {}: pending socket error: {}", self.fd, e);
                    pending = Some(e);
                }
                Err(e) => log_debug!("fd {}: SO_ERROR query failed: {}", self.fd, e),
            }
        }

        if events.contains(EventMask::HUP) {
            self.teardown_hup(&mut pending);
            return;
        }

        if events.contains(EventMask::RDHUP) {
            self.handle_rdhup(&mut pending);
            events.remove(EventMask::IN);
        }

        let mut rearm = false;
        if events.contains(EventMask::IN) {
            rearm |= self.drain(Direction::AcceptConnect, Operation::is_accept, &mut pending);
            rearm |= self.drain(Direction::Receive, any_op, &mut pending);
        }
        if events.contains(EventMask::OUT) {
            rearm |= self.drain(Direction::AcceptConnect, Operation::is_connect, &mut pending);
            rearm |= self.drain(Direction::Send, any_op, &mut pending);
        }
        if rearm {
            self.rearm();
        }

        if let Some(e) = pending {
            log_debug!("fd {}: socket error {} had no operation to take it", self.fd, e);
        }
    }
}

/// Hand the error fetched on ERR to an operation that finished with a
/// secondary error.
fn take_pending_error(op: &mut Operation, pending: &mut Option<SocketError>) {
    if !op.error().is_success() {
        if let Some(e) = pending.take() {
            op.set_error(e);
        }
    }
}

/// Run `op`'s callback on the scheduler lane of its direction.
pub(crate) fn schedule_completion(scheduler: &dyn CompletionScheduler, fd: RawFd, op: Operation) {
    let lane = op.direction().lane(fd);
    scheduler.schedule(lane, Box::new(move || op.complete()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Segment;
    use crate::operation::TransferResult;
    use sockasync_module::InlineScheduler;
    use std::sync::mpsc;

    /// Reactor that records calls; tests drive `handle_events` by hand.
    #[derive(Default)]
    struct RecordingReactor {
        calls: Mutex<Vec<(&'static str, RawFd, EventMask)>>,
    }

    impl RecordingReactor {
        fn calls(&self) -> Vec<(&'static str, RawFd, EventMask)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Reactor for RecordingReactor {
        fn register(
            &self,
            fd: RawFd,
            interest: EventMask,
            _handler: Weak<dyn EventHandler>,
        ) -> Result<(), Errno> {
            self.calls.lock().unwrap().push(("register", fd, interest));
            Ok(())
        }

        fn unregister(&self, fd: RawFd, remaining: EventMask) -> Result<(), Errno> {
            self.calls.lock().unwrap().push(("unregister", fd, remaining));
            Ok(())
        }
    }

    fn setup() -> (Arc<RecordingReactor>, Engine) {
        let reactor = Arc::new(RecordingReactor::default());
        let engine = Engine::new(reactor.clone(), Arc::new(InlineScheduler::new()));
        (reactor, engine)
    }

    fn write_all(fd: RawFd, data: &[u8]) {
        let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        assert_eq!(n as usize, data.len());
    }

    fn read_some(fd: RawFd, max: usize) -> Vec<u8> {
        let mut buf = vec![0u8; max];
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, max) };
        buf.truncate(n.max(0) as usize);
        buf
    }

    fn recv_into(
        ctx: &AsyncContext,
        len: usize,
        tx: &mpsc::Sender<(char, TransferResult)>,
        tag: char,
    ) -> Submission {
        let tx = tx.clone();
        ctx.receive_async(
            vec![0u8; len].into(),
            0,
            Box::new(move |r| tx.send((tag, r)).unwrap()),
        )
    }

    type Order = Arc<Mutex<Vec<char>>>;

    fn recv_ordered(ctx: &AsyncContext, len: usize, order: &Order, tag: char) -> Submission {
        let order = Arc::clone(order);
        ctx.receive_async(
            vec![0u8; len].into(),
            0,
            Box::new(move |_| order.lock().unwrap().push(tag)),
        )
    }

    #[test]
    fn test_new_registers_default_interest() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        assert_eq!(reactor.calls(), vec![("register", a, EventMask::DEFAULT_INTEREST)]);
        assert_eq!(ctx.registered_events(), EventMask::DEFAULT_INTEREST);
        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_pending_receive_completes_on_readiness() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert_eq!(recv_into(&ctx, 64, &tx, 'A'), Submission::Pending);
        assert!(rx.try_recv().is_err());

        write_all(b, &[9u8; 10]);
        ctx.handle_events(EventMask::IN);

        let (_, r) = rx.try_recv().unwrap();
        assert_eq!(r.bytes_transferred, 10);
        assert_eq!(r.error, SocketError::Success);
        assert!(rx.try_recv().is_err());

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_receives_complete_in_submission_order() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        assert!(recv_into(&ctx, 4, &tx, 'B').is_pending());

        write_all(b, b"abcdefgh");
        ctx.handle_events(EventMask::IN);

        let (first, ra) = rx.try_recv().unwrap();
        let (second, rb) = rx.try_recv().unwrap();
        assert_eq!((first, second), ('A', 'B'));
        assert_eq!(ra.buffer.into_single().into_inner(), b"abcd");
        assert_eq!(rb.buffer.into_single().into_inner(), b"efgh");

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_fifo_gate_keeps_late_submission_behind_queue() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        write_all(b, b"wxyz");
        // Data is available, but A is still queued: B must not overtake it.
        assert!(recv_into(&ctx, 4, &tx, 'B').is_pending());
        assert!(rx.try_recv().is_err());

        ctx.handle_events(EventMask::IN);
        let (first, ra) = rx.try_recv().unwrap();
        assert_eq!(first, 'A');
        assert_eq!(ra.bytes_transferred, 4);
        // B stays queued until more data arrives.
        assert!(rx.try_recv().is_err());

        write_all(b, b"1234");
        ctx.handle_events(EventMask::IN);
        assert_eq!(rx.try_recv().unwrap().0, 'B');

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_submit_racing_drain_keeps_fifo() {
        let (_reactor, engine) = setup();
        for _ in 0..500 {
            let (a, b) = sys::socketpair();
            let ctx = AsyncContext::new(a, &engine).unwrap();
            let order: Order = Arc::default();

            assert!(recv_ordered(&ctx, 8, &order, 'A').is_pending());
            write_all(b, &[1u8; 8]);

            let dispatcher = {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.handle_events(EventMask::IN))
            };
            recv_ordered(&ctx, 8, &order, 'B');
            dispatcher.join().unwrap();

            // A took all of the first write; B needs more data.
            write_all(b, &[2u8; 8]);
            ctx.handle_events(EventMask::IN);

            assert_eq!(*order.lock().unwrap(), vec!['A', 'B']);
            ctx.close(|| sys::close(a)).unwrap();
            sys::close(b).unwrap();
        }
    }

    #[test]
    fn test_submit_racing_hup_completes_once_in_order() {
        let (_reactor, engine) = setup();
        for _ in 0..500 {
            let (a, b) = sys::socketpair();
            let ctx = AsyncContext::new(a, &engine).unwrap();
            let order: Order = Arc::default();

            assert!(recv_ordered(&ctx, 8, &order, 'A').is_pending());

            let dispatcher = {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.handle_events(EventMask::HUP))
            };
            for tag in ['B', 'C', 'D'] {
                recv_ordered(&ctx, 8, &order, tag);
            }
            dispatcher.join().unwrap();

            assert_eq!(*order.lock().unwrap(), vec!['A', 'B', 'C', 'D']);
            sys::close(a).unwrap();
            sys::close(b).unwrap();
        }
    }

    #[test]
    fn test_late_submission_waits_for_close_drain() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let order: Order = Arc::default();

        assert!(recv_ordered(&ctx, 8, &order, 'A').is_pending());
        let drained = ctx.stop_for_close();
        assert_eq!(drained.len(), 1);

        // Stopped, but A is not scheduled yet: B must not overtake it.
        assert_eq!(
            recv_ordered(&ctx, 8, &order, 'B'),
            Submission::Failed(SocketError::Shutdown)
        );
        assert!(order.lock().unwrap().is_empty());

        sys::close(a).unwrap();
        ctx.complete_closed(drained);
        assert_eq!(*order.lock().unwrap(), vec!['A', 'B']);

        // Drain finished: later submissions complete immediately.
        recv_ordered(&ctx, 8, &order, 'C');
        assert_eq!(order.lock().unwrap().len(), 3);
        sys::close(b).unwrap();
    }

    #[test]
    fn test_events_after_close_are_ignored() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        ctx.close(|| sys::close(a)).unwrap();
        let calls = reactor.calls().len();

        ctx.handle_events(EventMask::ERR | EventMask::IN | EventMask::OUT);
        assert_eq!(reactor.calls().len(), calls);
        sys::close(b).unwrap();
    }

    #[test]
    fn test_set_state_lets_next_submission_retry() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        // Edge arrives with nobody waiting.
        write_all(b, b"hi");
        ctx.handle_events(EventMask::IN);
        assert_eq!(ctx.lock_queues().receive.state(), crate::queue::QueueState::Set);

        assert_eq!(recv_into(&ctx, 8, &tx, 'A'), Submission::Completed);
        assert_eq!(rx.try_recv().unwrap().1.bytes_transferred, 2);

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_partial_send_resumes_across_events() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let total = payload.len();
        let sub = ctx.send_async(
            TransferBuffer::List(vec![
                Segment::new(payload[..total / 2].to_vec()),
                Segment::new(payload[total / 2..].to_vec()),
            ]),
            0,
            Box::new(move |r| tx.send(r).unwrap()),
        );
        assert_eq!(sub, Submission::Pending);

        let mut received = Vec::with_capacity(total);
        let mut events = 0;
        loop {
            let chunk = read_some(b, 256 * 1024);
            received.extend_from_slice(&chunk);
            ctx.handle_events(EventMask::OUT);
            events += 1;
            if let Ok(r) = rx.try_recv() {
                assert_eq!(r.bytes_transferred, total);
                assert_eq!(r.error, SocketError::Success);
                break;
            }
            assert!(events < 10_000, "send never completed");
        }
        assert!(events >= 1);

        while received.len() < total {
            let chunk = read_some(b, 256 * 1024);
            assert!(!chunk.is_empty());
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, payload);

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_hup_drains_every_queue_once() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        assert!(recv_into(&ctx, 4, &tx, 'B').is_pending());

        sys::close(b).unwrap();
        ctx.handle_events(EventMask::IN | EventMask::RDHUP | EventMask::HUP);

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, 'A');
        assert_eq!(got[1].0, 'B');
        // EOF is a definitive result for the first receive.
        assert_eq!(got[0].1.error, SocketError::Success);
        assert_eq!(got[0].1.bytes_transferred, 0);

        assert!(reactor.calls().contains(&("unregister", a, EventMask::NONE)));
        assert_eq!(ctx.registered_events(), EventMask::NONE);

        // Second HUP: nothing left, no second unregister.
        ctx.handle_events(EventMask::HUP);
        assert_eq!(reactor.calls().iter().filter(|c| c.0 == "unregister").count(), 1);

        assert_eq!(recv_into(&ctx, 4, &tx, 'C'), Submission::Failed(SocketError::Shutdown));
        assert_eq!(rx.try_recv().unwrap().1.error, SocketError::Shutdown);

        sys::close(a).unwrap();
    }

    #[test]
    fn test_rdhup_stops_receive_and_narrows_interest() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        unsafe { libc::shutdown(b, libc::SHUT_WR) };
        ctx.handle_events(EventMask::IN | EventMask::RDHUP);

        let (_, r) = rx.try_recv().unwrap();
        assert_eq!(r.bytes_transferred, 0);
        assert!(rx.try_recv().is_err());

        let narrowed = EventMask::OUT | EventMask::ET;
        assert!(reactor.calls().contains(&("unregister", a, narrowed)));
        assert_eq!(ctx.registered_events(), narrowed);

        assert_eq!(recv_into(&ctx, 4, &tx, 'B'), Submission::Failed(SocketError::Shutdown));

        // Sends still work.
        let (stx, srx) = mpsc::channel();
        let sub = ctx.send_async(vec![1, 2, 3].into(), 0, Box::new(move |r| stx.send(r).unwrap()));
        assert_eq!(sub, Submission::Completed);
        assert_eq!(srx.try_recv().unwrap().bytes_transferred, 3);

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_pending_error_goes_to_failing_operation() {
        let (_reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        // No SO_ERROR is set on a healthy socket: ERR alone leaves A queued.
        ctx.handle_events(EventMask::ERR | EventMask::IN);
        assert!(rx.try_recv().is_err());

        let mut pending = Some(SocketError::ConnectionReset);
        ctx.drain(Direction::Receive, any_op, &mut pending);
        let (_, r) = rx.try_recv().unwrap();
        assert_eq!(r.error, SocketError::ConnectionReset);
        assert!(pending.is_none());

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_rearm_when_ops_queued_behind_snapshot() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        // A's callback submits B while the dispatch that completed A is
        // still running, so B lands behind that dispatch's snapshot.
        let inner = Arc::clone(&ctx);
        let tx_b = tx.clone();
        let sub = ctx.receive_async(
            vec![0u8; 4].into(),
            0,
            Box::new(move |r| {
                tx.send(('A', r)).unwrap();
                assert!(recv_into(&inner, 4, &tx_b, 'B').is_pending());
            }),
        );
        assert!(sub.is_pending());

        write_all(b, b"abcd");
        let before = reactor.calls().len();
        ctx.handle_events(EventMask::IN);

        assert_eq!(rx.try_recv().unwrap().0, 'A');
        assert!(rx.try_recv().is_err());
        let calls = reactor.calls();
        assert_eq!(calls.len(), before + 1);
        assert_eq!(calls[before], ("register", a, EventMask::DEFAULT_INTEREST));

        write_all(b, b"efgh");
        ctx.handle_events(EventMask::IN);
        assert_eq!(rx.try_recv().unwrap().0, 'B');

        sys::close(a).unwrap();
        sys::close(b).unwrap();
    }

    #[test]
    fn test_close_completes_pending_with_shutdown() {
        let (reactor, engine) = setup();
        let (a, b) = sys::socketpair();
        let ctx = AsyncContext::new(a, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        assert!(recv_into(&ctx, 4, &tx, 'A').is_pending());
        let released = ctx.close(|| sys::close(a));
        assert!(released.is_ok());

        let (_, r) = rx.try_recv().unwrap();
        assert_eq!(r.error, SocketError::Shutdown);
        assert!(reactor.calls().contains(&("unregister", a, EventMask::NONE)));

        assert_eq!(recv_into(&ctx, 4, &tx, 'B'), Submission::Failed(SocketError::Shutdown));
        assert_eq!(rx.try_recv().unwrap().1.error, SocketError::Shutdown);

        // Second close drains nothing and releases nothing new.
        let mut ran = false;
        ctx.close(|| ran = true);
        assert!(ran);
        assert!(rx.try_recv().is_err());

        sys::close(b).unwrap();
    }

    #[test]
    fn test_connect_waits_for_out() {
        let (_reactor, engine) = setup();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = SockAddrBuf::from(listener.local_addr().unwrap());
        let fd = sys::socket(libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
        let ctx = AsyncContext::new(fd, &engine).unwrap();
        let (tx, rx) = mpsc::channel();

        let sub = ctx.connect_async(target, Box::new(move |e| tx.send(e).unwrap()));
        if sub == Submission::Pending {
            // IN never serves a connect.
            ctx.handle_events(EventMask::IN);
            assert!(rx.try_recv().is_err());

            let mut result = None;
            for _ in 0..200 {
                ctx.handle_events(EventMask::OUT);
                if let Ok(e) = rx.try_recv() {
                    result = Some(e);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            assert_eq!(result, Some(SocketError::Success));
        } else {
            assert_eq!(sub, Submission::Completed);
            assert_eq!(rx.try_recv().unwrap(), SocketError::Success);
        }
        sys::close(fd).unwrap();
    }
}
