//! `EpollReactor` — default `Reactor` implementation.
//!
//! One epoll instance shared by N dispatch threads. Each ready descriptor is
//! looked up in a handler table (fd → weak handler) and its readiness mask
//! delivered to the handler on the dispatch thread that saw it.
//!
//! Edge-triggered registrations deliver an event to a single waiter, so
//! dispatch threads never duplicate work. Two edges for the same descriptor
//! can still land on two threads; handlers serialize that themselves.
//!
//! Shutdown writes to an eventfd that is registered level-triggered, which
//! wakes every dispatch thread at once.

use crate::wake_fd::WakeFd;

use sockasync_core::error::{CoreError, CoreResult};
use sockasync_core::event::EventMask;
use sockasync_core::reactor::{EventHandler, Reactor};
use sockasync_core::{log_debug, log_error, log_trace};

use nix::errno::Errno;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

/// Token reserved for the shutdown eventfd.
const WAKE_TOKEN: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct EpollReactorConfig {
    /// Threads blocked in `epoll_wait()`.
    pub dispatch_threads: usize,
    /// Event buffer size per `epoll_wait()` call.
    pub max_events: usize,
    /// Upper bound on a single wait.
    pub wait_timeout: Duration,
}

impl Default for EpollReactorConfig {
    fn default() -> Self {
        Self {
            dispatch_threads: 1,
            max_events: 256,
            wait_timeout: Duration::from_millis(100),
        }
    }
}

struct ReactorInner {
    epfd: RawFd,
    handlers: Mutex<HashMap<RawFd, Weak<dyn EventHandler>>>,
    shutdown: AtomicBool,
    wake: WakeFd,
}

impl ReactorInner {
    fn handlers(&self) -> MutexGuard<'_, HashMap<RawFd, Weak<dyn EventHandler>>> {
        self.handlers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> Result<(), Errno> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        Errno::result(ret).map(drop)
    }
}

pub struct EpollReactor {
    inner: Arc<ReactorInner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl EpollReactor {
    /// Create the epoll instance and start the dispatch threads.
    pub fn new(config: EpollReactorConfig) -> CoreResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(CoreError::ReactorSetup(Errno::last() as i32));
        }

        let wake = match WakeFd::create() {
            Ok(w) => w,
            Err(e) => {
                unsafe { libc::close(epfd); }
                return Err(e);
            }
        };

        let inner = Arc::new(ReactorInner {
            epfd,
            handlers: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            wake,
        });

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let ret = unsafe {
            libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, inner.wake.fd(), &mut ev)
        };
        if ret < 0 {
            let errno = Errno::last() as i32;
            unsafe { libc::close(epfd); }
            return Err(CoreError::ReactorSetup(errno));
        }

        let reactor = EpollReactor {
            inner,
            handles: Mutex::new(Vec::new()),
        };

        let threads = config.dispatch_threads.max(1);
        let max_events = config.max_events.max(1);
        let timeout_ms = config.wait_timeout.as_millis().min(i32::MAX as u128) as i32;
        for id in 0..threads {
            let inner = Arc::clone(&reactor.inner);
            let spawned = thread::Builder::new()
                .name(format!("sockasync-epoll-{}", id))
                .spawn(move || dispatch_loop(inner, max_events, timeout_ms));
            match spawned {
                Ok(h) => reactor.join_handles().push(h),
                Err(e) => {
                    log_error!("dispatch thread {} spawn failed: {}", id, e);
                    // Drop stops and joins whatever already started.
                    return Err(CoreError::SpawnFailed);
                }
            }
        }

        log_debug!("epoll reactor started: epfd={} threads={}", epfd, threads);
        Ok(reactor)
    }

    /// Stop dispatching and join the dispatch threads. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.inner.wake.wake() {
            log_error!("reactor wake failed: {}", e);
        }
        let handles = std::mem::take(&mut *self.join_handles());
        for h in handles {
            if h.join().is_err() {
                log_error!("dispatch thread exited abnormally");
            }
        }
        log_debug!("epoll reactor stopped");
    }

    /// Number of descriptors with a handler installed.
    pub fn registered(&self) -> usize {
        self.inner.handlers().len()
    }

    fn join_handles(&self) -> MutexGuard<'_, Vec<thread::JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Reactor for EpollReactor {
    fn register(
        &self,
        fd: RawFd,
        interest: EventMask,
        handler: Weak<dyn EventHandler>,
    ) -> Result<(), Errno> {
        let events = to_epoll(interest);
        // Installed first so an event raised by the ADD finds its handler.
        let previous = self.inner.handlers().insert(fd, handler);

        let result = match self.inner.ctl(libc::EPOLL_CTL_ADD, fd, events) {
            Err(Errno::EEXIST) => self.inner.ctl(libc::EPOLL_CTL_MOD, fd, events),
            other => other,
        };
        if let Err(errno) = result {
            // A failed re-arm keeps the existing registration's handler.
            let mut handlers = self.inner.handlers();
            match previous {
                Some(prev) => handlers.insert(fd, prev),
                None => handlers.remove(&fd),
            };
            return Err(errno);
        }
        log_trace!("fd {}: registered {:?}", fd, interest);
        Ok(())
    }

    fn unregister(&self, fd: RawFd, remaining: EventMask) -> Result<(), Errno> {
        if remaining.readiness().is_empty() {
            self.inner.handlers().remove(&fd);
            let ret = unsafe {
                libc::epoll_ctl(self.inner.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            Errno::result(ret)?;
            log_trace!("fd {}: unregistered", fd);
            return Ok(());
        }
        self.inner.ctl(libc::EPOLL_CTL_MOD, fd, to_epoll(remaining))?;
        log_trace!("fd {}: interest narrowed to {:?}", fd, remaining);
        Ok(())
    }
}

impl Drop for EpollReactor {
    fn drop(&mut self) {
        self.shutdown();
        unsafe { libc::close(self.inner.epfd); }
    }
}

/// Dispatch thread main loop.
fn dispatch_loop(inner: Arc<ReactorInner>, max_events: usize, timeout_ms: i32) {
    let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; max_events];

    while !inner.shutdown.load(Ordering::Acquire) {
        let n = unsafe {
            libc::epoll_wait(inner.epfd, events.as_mut_ptr(), max_events as i32, timeout_ms)
        };
        if n < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                continue;
            }
            log_error!("epoll_wait failed: {}", errno);
            break;
        }

        for ev in &events[..n as usize] {
            let token = ev.u64;
            let bits = ev.events;
            if token == WAKE_TOKEN {
                continue;
            }
            let fd = token as RawFd;
            let handler = inner.handlers().get(&fd).and_then(Weak::upgrade);
            match handler {
                Some(h) => h.handle_events(from_epoll(bits)),
                None => log_trace!("fd {}: event without live handler", fd),
            }
        }
    }
}

fn to_epoll(mask: EventMask) -> u32 {
    let mut bits = 0u32;
    if mask.contains(EventMask::IN) {
        bits |= libc::EPOLLIN as u32;
    }
    if mask.contains(EventMask::OUT) {
        bits |= libc::EPOLLOUT as u32;
    }
    if mask.contains(EventMask::RDHUP) {
        bits |= libc::EPOLLRDHUP as u32;
    }
    if mask.contains(EventMask::ET) {
        bits |= libc::EPOLLET as u32;
    }
    bits
}

fn from_epoll(bits: u32) -> EventMask {
    let mut mask = EventMask::NONE;
    if bits & libc::EPOLLIN as u32 != 0 {
        mask |= EventMask::IN;
    }
    if bits & libc::EPOLLOUT as u32 != 0 {
        mask |= EventMask::OUT;
    }
    if bits & libc::EPOLLRDHUP as u32 != 0 {
        mask |= EventMask::RDHUP;
    }
    if bits & libc::EPOLLHUP as u32 != 0 {
        mask |= EventMask::HUP;
    }
    if bits & libc::EPOLLERR as u32 != 0 {
        mask |= EventMask::ERR;
    }
    mask
}
