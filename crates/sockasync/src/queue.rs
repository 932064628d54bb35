//! Per-direction operation queue.
//!
//! A FIFO of operations tagged with a readiness state:
//!
//! - `Clear`: no readiness hint outstanding.
//! - `Set`: a readiness edge was observed and the queue drained; the next
//!   submission must retry its syscall instead of waiting for an edge that
//!   will not come.
//! - `Stopped`: terminal. The queue is empty and refuses new operations.
//!
//! The queue itself is not synchronized; `AsyncContext` keeps all three of
//! a socket's queues behind one lock and never completes an operation while
//! holding it.
//!
//! While a readiness event retries the head, the head is *checked out*:
//! its slot stays in the queue (so FIFO admission still sees a non-empty
//! queue) but the operation is owned by the dispatcher until it calls
//! `end()` or `restore()`. The dispatcher schedules the head's completion
//! before `end()`, so a newer submission can never be scheduled first.
//!
//! `stop()` hands the queued operations to the caller for completion
//! outside the lock. Until the caller reports them scheduled via
//! `settle()`, the queue is *draining*: newer submissions are parked
//! instead of completed, keeping their `Shutdown` behind the older ones.

use crate::operation::Operation;

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Clear,
    Set,
    Stopped,
}

/// Result of admitting a new submission before its first attempt.
#[derive(Debug)]
pub(crate) enum Gate {
    /// Queue is idle: attempt the syscall now.
    Attempt(Operation),
    /// Older operations are waiting; this one was queued behind them.
    Queued,
    Stopped(Operation),
    /// Stopped, with older operations still being completed; this one is
    /// parked and completes with `Shutdown` after them.
    Draining,
}

/// Result of `begin()` after an attempt reported not-ready.
#[derive(Debug)]
pub(crate) enum Begin {
    Enqueued,
    /// Readiness arrived since the attempt: try again.
    Retry(Operation),
    Stopped(Operation),
    Draining,
}

/// Result of `checkout_head()`.
#[derive(Debug)]
pub(crate) enum Head {
    Ready(Operation),
    Empty,
    /// Head was queued after the dispatch snapshot.
    BeyondSnapshot,
    /// Head is not the kind this event serves.
    Skipped,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    op: Option<Operation>,
}

#[derive(Debug)]
pub(crate) struct OperationQueue {
    state: QueueState,
    entries: VecDeque<Entry>,
    next_seq: u64,
    /// `stop()` returned operations that are not yet scheduled.
    draining: bool,
    /// Submissions that arrived while draining.
    parked: Vec<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            state: QueueState::Clear,
            entries: VecDeque::new(),
            next_seq: 0,
            draining: false,
            parked: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> QueueState {
        self.state
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state == QueueState::Stopped
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, op: Operation) {
        debug_assert!(!self.is_stopped());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(Entry { seq, op: Some(op) });
    }

    /// Admission for a fresh submission. An idle queue lets the caller
    /// attempt inline, consuming any `Set` hint; a busy one queues the
    /// operation so it cannot overtake older ones.
    pub fn gate(&mut self, op: Operation) -> Gate {
        match self.state {
            QueueState::Stopped if self.draining => {
                self.parked.push(op);
                Gate::Draining
            }
            QueueState::Stopped => Gate::Stopped(op),
            _ if !self.entries.is_empty() => {
                self.push(op);
                Gate::Queued
            }
            _ => {
                self.state = QueueState::Clear;
                Gate::Attempt(op)
            }
        }
    }

    /// Queue `op` after an attempt found the descriptor not ready.
    pub fn begin(&mut self, op: Operation) -> Begin {
        match self.state {
            QueueState::Stopped if self.draining => {
                self.parked.push(op);
                Begin::Draining
            }
            QueueState::Stopped => Begin::Stopped(op),
            QueueState::Set if self.entries.is_empty() => {
                self.state = QueueState::Clear;
                Begin::Retry(op)
            }
            _ => {
                self.push(op);
                Begin::Enqueued
            }
        }
    }

    /// Mark readiness observed and return the bound for this dispatch:
    /// only entries with a sequence number below it are attempted.
    /// `None` if the queue is stopped.
    pub fn snapshot(&mut self) -> Option<u64> {
        if self.is_stopped() {
            return None;
        }
        self.state = QueueState::Set;
        Some(self.next_seq)
    }

    /// Take the head operation for an attempt if it is within `bound` and
    /// `wanted` accepts it.
    pub fn checkout_head(&mut self, bound: u64, wanted: fn(&Operation) -> bool) -> Head {
        let Some(entry) = self.entries.front_mut() else {
            return Head::Empty;
        };
        if entry.seq >= bound {
            return Head::BeyondSnapshot;
        }
        let op = entry.op.as_ref().expect("queue head already checked out");
        if !wanted(op) {
            return Head::Skipped;
        }
        match entry.op.take() {
            Some(op) => Head::Ready(op),
            None => Head::Empty,
        }
    }

    /// Drop the checked-out head after it completed.
    pub fn end(&mut self) {
        let entry = self.entries.pop_front().expect("end() on an empty queue");
        assert!(entry.op.is_none(), "end() on a head that was not checked out");
    }

    /// Put a not-ready head back and forget the readiness hint.
    pub fn restore(&mut self, op: Operation) {
        let entry = self.entries.front_mut().expect("restore() on an empty queue");
        assert!(entry.op.is_none(), "restore() over a live head");
        entry.op = Some(op);
        self.state = QueueState::Clear;
    }

    /// Stop permanently and hand back every queued operation in FIFO order.
    /// A non-empty result leaves the queue draining until `settle()`.
    pub fn stop(&mut self) -> Vec<Operation> {
        self.state = QueueState::Stopped;
        let ops: Vec<Operation> = self
            .entries
            .drain(..)
            .map(|e| e.op.expect("stop() with a checked-out head"))
            .collect();
        if !ops.is_empty() {
            self.draining = true;
        }
        ops
    }

    /// Called once everything previously handed out by `stop()` or
    /// `settle()` is scheduled. Returns the submissions parked meanwhile;
    /// when there are none the queue stops draining.
    pub fn settle(&mut self) -> Vec<Operation> {
        let parked = std::mem::take(&mut self.parked);
        if parked.is_empty() {
            self.draining = false;
        }
        parked
    }
}
