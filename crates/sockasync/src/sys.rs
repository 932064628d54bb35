//! Thin libc socket wrappers.
//!
//! Every call is non-blocking with respect to the descriptor's own mode and
//! reports failure as the raw `Errno`; translation into `SocketError`
//! happens in the attempt logic.

use crate::addr::SockAddrBuf;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::mem;
use std::os::unix::io::RawFd;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        /// Suppress SIGPIPE on a send to a closed peer.
        pub const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
        /// Flags applied to descriptors created or accepted here.
        const SOCK_FLAGS: libc::c_int = libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC;
    } else {
        pub const SEND_FLAGS: libc::c_int = 0;
        const SOCK_FLAGS: libc::c_int = 0;
    }
}

/// Most iovecs handed to one `sendmsg`/`recvmsg`.
pub const IOV_MAX: usize = 1024;

/// Create a socket in non-blocking, close-on-exec mode.
pub fn socket(domain: libc::c_int, ty: libc::c_int, protocol: libc::c_int) -> Result<RawFd, Errno> {
    let fd = unsafe { libc::socket(domain, ty | SOCK_FLAGS, protocol) };
    let fd = Errno::result(fd)?;
    if SOCK_FLAGS == 0 {
        if let Err(e) = set_nonblocking(fd, true) {
            unsafe { libc::close(fd); }
            return Err(e);
        }
    }
    Ok(fd)
}

pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<(), Errno> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    let new = if nonblocking {
        flags | OFlag::O_NONBLOCK
    } else {
        flags & !OFlag::O_NONBLOCK
    };
    if new != flags {
        fcntl(fd, FcntlArg::F_SETFL(new))?;
    }
    Ok(())
}

pub fn set_reuseaddr(fd: RawFd) -> Result<(), Errno> {
    let on: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    Errno::result(ret).map(drop)
}

pub fn bind(fd: RawFd, addr: &SockAddrBuf) -> Result<(), Errno> {
    let ret = unsafe { libc::bind(fd, addr.as_ptr(), addr.raw_len()) };
    Errno::result(ret).map(drop)
}

pub fn listen(fd: RawFd, backlog: i32) -> Result<(), Errno> {
    let ret = unsafe { libc::listen(fd, backlog) };
    Errno::result(ret).map(drop)
}

pub fn local_addr(fd: RawFd) -> Result<SockAddrBuf, Errno> {
    let mut addr = SockAddrBuf::new();
    let ret = unsafe { libc::getsockname(fd, addr.as_mut_ptr(), addr.len_mut()) };
    Errno::result(ret)?;
    Ok(addr)
}

/// Bytes queued for reading.
pub fn bytes_available(fd: RawFd) -> Result<usize, Errno> {
    let mut avail: libc::c_int = 0;
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut avail) };
    Errno::result(ret)?;
    Ok(avail.max(0) as usize)
}

/// Pending socket error (`SO_ERROR`). Reading it clears it.
pub fn socket_error(fd: RawFd) -> Result<i32, Errno> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    Errno::result(ret)?;
    Ok(err)
}

/// `SO_LINGER {on, 0}`: the next close resets the connection.
pub fn set_abortive_linger(fd: RawFd) -> Result<(), Errno> {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    Errno::result(ret).map(drop)
}

pub fn close(fd: RawFd) -> Result<(), Errno> {
    let ret = unsafe { libc::close(fd) };
    Errno::result(ret).map(drop)
}

/// Accept one connection; the new descriptor is non-blocking.
pub fn accept(fd: RawFd, addr: &mut SockAddrBuf) -> Result<RawFd, Errno> {
    addr.reset_len();
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            let ret = unsafe { libc::accept4(fd, addr.as_mut_ptr(), addr.len_mut(), SOCK_FLAGS) };
            Errno::result(ret)
        } else {
            let ret = unsafe { libc::accept(fd, addr.as_mut_ptr(), addr.len_mut()) };
            let new_fd = Errno::result(ret)?;
            if let Err(e) = set_nonblocking(new_fd, true) {
                unsafe { libc::close(new_fd); }
                return Err(e);
            }
            Ok(new_fd)
        }
    }
}

pub fn connect(fd: RawFd, addr: &SockAddrBuf) -> Result<(), Errno> {
    let ret = unsafe { libc::connect(fd, addr.as_ptr(), addr.raw_len()) };
    Errno::result(ret).map(drop)
}

/// Scatter receive. Returns bytes read and the kernel's `msg_flags`.
pub fn recvmsg(
    fd: RawFd,
    iov: &mut [libc::iovec],
    addr: Option<&mut SockAddrBuf>,
    flags: libc::c_int,
) -> Result<(usize, libc::c_int), Errno> {
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iov.as_mut_ptr();
    msg.msg_iovlen = iov.len() as _;

    let mut addr = addr;
    if let Some(a) = addr.as_deref_mut() {
        a.reset_len();
        msg.msg_name = a.as_mut_ptr() as *mut libc::c_void;
        msg.msg_namelen = a.raw_len();
    }

    let ret = unsafe { libc::recvmsg(fd, &mut msg, flags) };
    let n = Errno::result(ret)?;
    if let Some(a) = addr {
        a.set_len(msg.msg_namelen);
    }
    Ok((n as usize, msg.msg_flags))
}

/// Gather send.
pub fn sendmsg(
    fd: RawFd,
    iov: &[libc::iovec],
    addr: Option<&SockAddrBuf>,
    flags: libc::c_int,
) -> Result<usize, Errno> {
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = iov.as_ptr() as *mut libc::iovec;
    msg.msg_iovlen = iov.len() as _;
    if let Some(a) = addr {
        msg.msg_name = a.as_ptr() as *mut libc::c_void;
        msg.msg_namelen = a.raw_len();
    }

    let ret = unsafe { libc::sendmsg(fd, &msg, flags | SEND_FLAGS) };
    let n = Errno::result(ret)?;
    Ok(n as usize)
}

/// Connected, non-blocking `AF_UNIX` stream pair for tests.
#[cfg(test)]
pub(crate) fn socketpair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let ret = unsafe {
        libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | SOCK_FLAGS, 0, fds.as_mut_ptr())
    };
    assert_eq!(ret, 0, "socketpair: {}", Errno::last());
    (fds[0], fds[1])
}
