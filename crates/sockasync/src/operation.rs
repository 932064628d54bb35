//! Operation model.
//!
//! Closed set of operation kinds. Each carries its inputs, the result
//! fields the attempt logic fills in, and the callback that receives them.
//! `complete()` is the only place a callback is invoked.

use crate::addr::SockAddrBuf;
use crate::attempt;
use crate::buffer::{Cursor, TransferBuffer};

use sockasync_core::{Lane, SocketError};
use std::fmt;
use std::os::unix::io::RawFd;

/// Outcome of a send or receive.
#[derive(Debug)]
pub struct TransferResult {
    pub bytes_transferred: usize,
    /// The operation's buffers, handed back.
    pub buffer: TransferBuffer,
    /// Peer address for addressed transfers.
    pub address: Option<SockAddrBuf>,
    /// `msg_flags` reported by a receive.
    pub flags: i32,
    pub error: SocketError,
}

/// Outcome of an accept.
#[derive(Debug)]
pub struct AcceptResult {
    /// New non-blocking descriptor, `-1` on failure. Owned by the callback.
    pub fd: RawFd,
    pub address: SockAddrBuf,
    pub error: SocketError,
}

pub type TransferCallback = Box<dyn FnOnce(TransferResult) + Send + 'static>;
pub type AcceptCallback = Box<dyn FnOnce(AcceptResult) + Send + 'static>;
pub type ConnectCallback = Box<dyn FnOnce(SocketError) + Send + 'static>;

/// Per-socket FIFO an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Receive = 0,
    Send = 1,
    AcceptConnect = 2,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Receive, Direction::Send, Direction::AcceptConnect];

    /// Scheduler lane for completions of this direction on `fd`.
    #[inline]
    pub fn lane(self, fd: RawFd) -> Lane {
        Lane::for_direction(fd, self as u8)
    }
}

pub struct AcceptOp {
    pub(crate) address: SockAddrBuf,
    pub(crate) accepted: RawFd,
    pub(crate) error: SocketError,
    pub(crate) callback: AcceptCallback,
}

impl AcceptOp {
    pub fn new(address: SockAddrBuf, callback: AcceptCallback) -> Self {
        Self {
            address,
            accepted: -1,
            error: SocketError::Success,
            callback,
        }
    }
}

pub struct ConnectOp {
    pub(crate) address: SockAddrBuf,
    /// `connect()` has been issued and reported in-progress.
    pub(crate) started: bool,
    pub(crate) error: SocketError,
    pub(crate) callback: ConnectCallback,
}

impl ConnectOp {
    pub fn new(address: SockAddrBuf, callback: ConnectCallback) -> Self {
        Self {
            address,
            started: false,
            error: SocketError::Success,
            callback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Send,
    Receive,
}

pub struct TransferOp {
    pub(crate) kind: TransferKind,
    pub(crate) buffer: TransferBuffer,
    pub(crate) cursor: Cursor,
    pub(crate) flags: i32,
    pub(crate) address: Option<SockAddrBuf>,
    pub(crate) bytes_transferred: usize,
    pub(crate) result_flags: i32,
    pub(crate) error: SocketError,
    pub(crate) callback: TransferCallback,
}

impl TransferOp {
    pub fn send(
        buffer: TransferBuffer,
        flags: i32,
        address: Option<SockAddrBuf>,
        callback: TransferCallback,
    ) -> Self {
        Self::new(TransferKind::Send, buffer, flags, address, callback)
    }

    pub fn receive(
        buffer: TransferBuffer,
        flags: i32,
        address: Option<SockAddrBuf>,
        callback: TransferCallback,
    ) -> Self {
        Self::new(TransferKind::Receive, buffer, flags, address, callback)
    }

    fn new(
        kind: TransferKind,
        buffer: TransferBuffer,
        flags: i32,
        address: Option<SockAddrBuf>,
        callback: TransferCallback,
    ) -> Self {
        let mut cursor = Cursor::default();
        cursor.normalize(buffer.segments());
        Self {
            kind,
            buffer,
            cursor,
            flags,
            address,
            bytes_transferred: 0,
            result_flags: 0,
            error: SocketError::Success,
            callback,
        }
    }
}

pub enum Operation {
    Accept(AcceptOp),
    Connect(ConnectOp),
    Transfer(TransferOp),
}

impl Operation {
    pub fn direction(&self) -> Direction {
        match self {
            Operation::Accept(_) | Operation::Connect(_) => Direction::AcceptConnect,
            Operation::Transfer(t) => match t.kind {
                TransferKind::Receive => Direction::Receive,
                TransferKind::Send => Direction::Send,
            },
        }
    }

    #[inline]
    pub fn is_accept(&self) -> bool {
        matches!(self, Operation::Accept(_))
    }

    #[inline]
    pub fn is_connect(&self) -> bool {
        matches!(self, Operation::Connect(_))
    }

    pub fn error(&self) -> SocketError {
        match self {
            Operation::Accept(op) => op.error,
            Operation::Connect(op) => op.error,
            Operation::Transfer(op) => op.error,
        }
    }

    pub fn set_error(&mut self, error: SocketError) {
        match self {
            Operation::Accept(op) => op.error = error,
            Operation::Connect(op) => op.error = error,
            Operation::Transfer(op) => op.error = error,
        }
    }

    /// One non-blocking attempt. `true` when the operation reached a final
    /// result (success or error), `false` when the descriptor was not ready.
    pub(crate) fn attempt(&mut self, fd: RawFd) -> bool {
        match self {
            Operation::Accept(op) => attempt::try_accept(fd, op),
            Operation::Connect(op) => attempt::try_connect(fd, op),
            Operation::Transfer(op) => match op.kind {
                TransferKind::Receive => attempt::try_receive(fd, op),
                TransferKind::Send => attempt::try_send(fd, op),
            },
        }
    }

    /// Deliver the result to the callback. Consumes the operation.
    pub fn complete(self) {
        match self {
            Operation::Accept(op) => (op.callback)(AcceptResult {
                fd: op.accepted,
                address: op.address,
                error: op.error,
            }),
            Operation::Connect(op) => (op.callback)(op.error),
            Operation::Transfer(op) => (op.callback)(TransferResult {
                bytes_transferred: op.bytes_transferred,
                buffer: op.buffer,
                address: op.address,
                flags: op.result_flags,
                error: op.error,
            }),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Accept(op) => f
                .debug_struct("Accept")
                .field("accepted", &op.accepted)
                .field("error", &op.error)
                .finish(),
            Operation::Connect(op) => f
                .debug_struct("Connect")
                .field("started", &op.started)
                .field("error", &op.error)
                .finish(),
            Operation::Transfer(op) => f
                .debug_struct("Transfer")
                .field("kind", &op.kind)
                .field("bytes_transferred", &op.bytes_transferred)
                .field("cursor", &op.cursor)
                .field("error", &op.error)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_direction_mapping() {
        let recv = Operation::Transfer(TransferOp::receive(vec![0; 4].into(), 0, None, Box::new(|_| {})));
        let send = Operation::Transfer(TransferOp::send(vec![0; 4].into(), 0, None, Box::new(|_| {})));
        let acc = Operation::Accept(AcceptOp::new(SockAddrBuf::new(), Box::new(|_| {})));
        let con = Operation::Connect(ConnectOp::new(SockAddrBuf::new(), Box::new(|_| {})));

        assert_eq!(recv.direction(), Direction::Receive);
        assert_eq!(send.direction(), Direction::Send);
        assert_eq!(acc.direction(), Direction::AcceptConnect);
        assert_eq!(con.direction(), Direction::AcceptConnect);
        assert!(acc.is_accept() && !acc.is_connect());
        assert!(con.is_connect());
    }

    #[test]
    fn test_complete_hands_back_buffer_and_error() {
        let (tx, rx) = mpsc::channel();
        let mut op = Operation::Transfer(TransferOp::receive(
            vec![5u8; 3].into(),
            0,
            None,
            Box::new(move |r| tx.send(r).unwrap()),
        ));
        op.set_error(SocketError::Shutdown);
        assert_eq!(op.error(), SocketError::Shutdown);
        op.complete();

        let r = rx.recv().unwrap();
        assert_eq!(r.error, SocketError::Shutdown);
        assert_eq!(r.bytes_transferred, 0);
        assert_eq!(r.buffer.into_single().into_inner(), vec![5u8; 3]);
    }

    #[test]
    fn test_lanes_differ_per_direction() {
        let lanes: Vec<Lane> = Direction::ALL.iter().map(|d| d.lane(12)).collect();
        assert_ne!(lanes[0], lanes[1]);
        assert_ne!(lanes[1], lanes[2]);
    }
}
