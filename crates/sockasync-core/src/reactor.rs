//! Reactor abstraction.
//!
//! A `Reactor` is an edge-triggered readiness notifier keyed by descriptor.
//! The multiplexer only needs two calls from it, plus the promise that it
//! will invoke the registered `EventHandler` whenever readiness changes.
//!
//! # Implementors
//!
//! - `EpollReactor` (default): one epoll instance, N dispatch threads.
//!
//! - Test reactors: record register/unregister calls and let the test
//!   drive `handle_events` by hand.

use crate::event::EventMask;

use nix::errno::Errno;
use std::os::unix::io::RawFd;
use std::sync::Weak;

/// Receives readiness notifications for one descriptor.
///
/// **Contract:**
/// - May be called from any reactor dispatch thread.
/// - Calls for different descriptors run concurrently.
/// - The implementation serializes concurrent calls for its own descriptor.
pub trait EventHandler: Send + Sync {
    fn handle_events(&self, events: EventMask);
}

/// Edge-triggered readiness notifier.
///
/// **Contract:**
/// - `register()` on a descriptor that is already registered replaces its
///   interest and handler. With edge triggering this re-arms the
///   descriptor: if it is ready now, a fresh event is delivered.
/// - `unregister()` with an empty `remaining` mask removes the descriptor;
///   otherwise it narrows interest to `remaining`.
/// - The handler is held weakly. A dropped handler is skipped silently.
/// - Neither call blocks.
pub trait Reactor: Send + Sync {
    /// Start (or re-arm) delivery of `interest` events for `fd`.
    fn register(
        &self,
        fd: RawFd,
        interest: EventMask,
        handler: Weak<dyn EventHandler>,
    ) -> Result<(), Errno>;

    /// Narrow interest for `fd` to `remaining`, or remove it entirely.
    fn unregister(&self, fd: RawFd, remaining: EventMask) -> Result<(), Errno>;
}
