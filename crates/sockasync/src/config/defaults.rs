//! Library defaults. Every value can be overridden through the
//! environment; see `EngineConfig::from_env()`.

/// Completion pool workers. `0` means auto-size: min(8, max(2, nproc/2)).
pub const COMPLETION_WORKERS: usize = 0;

/// Reactor dispatch threads.
pub const DISPATCH_THREADS: usize = 1;

/// Events fetched per `epoll_wait()`.
pub const MAX_EVENTS: usize = 256;

/// Dispatch wait timeout.
pub const WAIT_TIMEOUT_MS: u64 = 100;

/// Idle completion worker park timeout.
pub const PARK_TIMEOUT_MS: u64 = 10;

/// Sockets try the blocking close path first.
pub const BLOCKING_CLOSE: bool = true;
