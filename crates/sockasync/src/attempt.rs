//! Non-blocking attempt logic.
//!
//! Each `try_*` issues the syscall once (send loops until the payload is
//! gone or the socket pushes back) and records the outcome in the
//! operation. The return value says whether the operation is finished:
//! `false` only for the transient not-ready errors, which never reach a
//! callback.

use crate::buffer::{receive_iovecs, send_iovecs};
use crate::operation::{AcceptOp, ConnectOp, TransferOp};
use crate::sys;

use nix::errno::Errno;
use sockasync_core::error::is_would_block;
use sockasync_core::SocketError;
use std::os::unix::io::RawFd;

#[inline]
fn would_block(errno: Errno) -> bool {
    is_would_block(errno as i32)
}

pub(crate) fn try_accept(fd: RawFd, op: &mut AcceptOp) -> bool {
    match sys::accept(fd, &mut op.address) {
        Ok(new_fd) => {
            op.accepted = new_fd;
            op.error = SocketError::Success;
            true
        }
        Err(e) if would_block(e) => false,
        Err(e) => {
            op.accepted = -1;
            op.address.set_len(0);
            op.error = e.into();
            true
        }
    }
}

/// The first call issues `connect()`. Later calls re-issue it to poll the
/// handshake: `EALREADY`/`EINPROGRESS` mean still pending, `0` or
/// `EISCONN` mean established, anything else is the handshake's failure.
pub(crate) fn try_connect(fd: RawFd, op: &mut ConnectOp) -> bool {
    let result = sys::connect(fd, &op.address);
    if !op.started {
        return match result {
            Ok(()) => {
                op.error = SocketError::Success;
                true
            }
            Err(Errno::EINPROGRESS) => {
                op.started = true;
                false
            }
            Err(e) => {
                op.error = e.into();
                true
            }
        };
    }

    match result {
        Ok(()) | Err(Errno::EISCONN) => {
            op.error = SocketError::Success;
            true
        }
        Err(Errno::EALREADY) | Err(Errno::EINPROGRESS) => false,
        Err(e) if would_block(e) => false,
        Err(e) => {
            op.error = e.into();
            true
        }
    }
}

pub(crate) fn try_receive(fd: RawFd, op: &mut TransferOp) -> bool {
    // A zero count still issues the read so a peer shutdown is observed.
    let available = match sys::bytes_available(fd) {
        Ok(0) => 1,
        Ok(n) => n,
        Err(e) => {
            op.error = e.into();
            return true;
        }
    };

    let mut iov = receive_iovecs(op.buffer.segments_mut(), available);
    match sys::recvmsg(fd, &mut iov, op.address.as_mut(), op.flags) {
        Ok((n, msg_flags)) => {
            op.bytes_transferred = n;
            op.result_flags = msg_flags;
            op.error = SocketError::Success;
            true
        }
        Err(e) if would_block(e) => false,
        Err(e) => {
            op.error = e.into();
            true
        }
    }
}

/// Sends from the persisted cursor until the payload is gone, the socket
/// pushes back, or an error. A send that moves zero bytes finishes the
/// operation.
pub(crate) fn try_send(fd: RawFd, op: &mut TransferOp) -> bool {
    loop {
        if op.cursor.is_done(op.buffer.segments()) {
            op.error = SocketError::Success;
            return true;
        }

        let iov = send_iovecs(op.buffer.segments(), op.cursor);
        if iov.is_empty() {
            op.error = SocketError::Success;
            return true;
        }

        match sys::sendmsg(fd, &iov, op.address.as_ref(), op.flags) {
            Ok(0) => {
                op.error = SocketError::Success;
                return true;
            }
            Ok(n) => {
                op.bytes_transferred += n;
                op.cursor.advance(op.buffer.segments(), n);
            }
            Err(e) if would_block(e) => return false,
            Err(e) => {
                op.error = e.into();
                return true;
            }
        }
    }
}
