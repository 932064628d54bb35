//! # sockasync — Per-socket asynchronous I/O multiplexer
//!
//! Turns a non-blocking socket plus an edge-triggered reactor into
//! callback-based accept, connect, send and receive operations.
//!
//! Each socket gets an [`AsyncContext`] with three FIFO queues (receive,
//! send, accept/connect). A submission is attempted inline first; only a
//! not-ready result queues it. Readiness events drain the queues in
//! order, and every completion runs on the [`CompletionScheduler`], never
//! on the reactor thread.
//!
//! ```text
//!   Socket ──submit──► AsyncContext ──attempt──► syscall
//!                         │    ▲                    │ not ready
//!                         │    └── EventMask ◄── Reactor (epoll, ET)
//!                         ▼
//!               CompletionScheduler ──► callback
//! ```
//!
//! ## Modules
//!
//! - `socket` - Descriptor lifecycle and close policy
//! - `context` - Per-socket queues and readiness dispatch
//! - `operation` - Accept/connect/transfer operations and results
//! - `buffer` - Single and scatter/gather transfer buffers
//! - `addr` - Socket address storage
//! - `engine` - Reactor + scheduler bundle
//! - `config` - Engine configuration from defaults and environment
//!
//! [`CompletionScheduler`]: sockasync_core::CompletionScheduler

pub mod addr;
pub mod buffer;
pub mod config;
pub mod context;
pub mod engine;
pub mod operation;
pub mod queue;
pub mod socket;

mod attempt;
mod sys;

// Re-exports
pub use addr::SockAddrBuf;
pub use buffer::{Cursor, Segment, TransferBuffer};
pub use config::{ConfigError, EngineConfig};
pub use context::{AsyncContext, Submission};
pub use engine::Engine;
pub use operation::{
    AcceptCallback, AcceptResult, ConnectCallback, Direction, Operation, TransferCallback,
    TransferResult,
};
pub use queue::QueueState;
pub use socket::{release_descriptor, CloseOps, Socket, SysCloseOps};

pub use sockasync_core::{CoreError, CoreResult, SocketError};
