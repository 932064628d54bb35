//! `WakeFd` — eventfd used to kick reactor dispatch threads out of
//! `epoll_wait()` at shutdown.
//!
//! The eventfd is registered level-triggered and never read, so once
//! signalled every waiter wakes and keeps waking until it exits.

use sockasync_core::error::{CoreError, CoreResult};

use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub struct WakeFd {
    fd: RawFd,
}

impl WakeFd {
    /// Create a new non-blocking, close-on-exec eventfd.
    pub fn create() -> CoreResult<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(CoreError::Os(Errno::last() as i32));
        }
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Make the eventfd readable.
    pub fn wake(&self) -> CoreResult<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let errno = Errno::last();
            // EAGAIN: counter saturated, a wake is already pending.
            if errno == Errno::EAGAIN {
                return Ok(());
            }
            return Err(CoreError::Os(errno as i32));
        }
        Ok(())
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe { libc::close(self.fd); }
            self.fd = -1;
        }
    }
}
