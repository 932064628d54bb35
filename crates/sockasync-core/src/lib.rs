//! # sockasync-core — Contracts for the sockasync multiplexer
//!
//! This crate defines the trait boundaries the per-socket multiplexer is
//! written against. Each trait models one external collaborator:
//!
//! | Trait                 | Role                                          | Default impl (sockasync-module) |
//! |-----------------------|-----------------------------------------------|---------------------------------|
//! | `Reactor`             | edge-triggered readiness notifier             | `EpollReactor`                  |
//! | `EventHandler`        | receives readiness masks from the reactor     | `AsyncContext` (sockasync)      |
//! | `CompletionScheduler` | runs completion callbacks off the reactor     | `FixedPool`, `InlineScheduler`  |
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."
//!
//! The multiplexer never names a concrete reactor or pool. Tests swap in a
//! recording reactor and an inline scheduler without touching the core.
//!
//! ## Modules
//!
//! - `event` - Readiness bit mask (`IN`, `OUT`, `RDHUP`, `HUP`, `ERR`, `ET`)
//! - `reactor` - Reactor and event-handler traits
//! - `scheduler` - Completion scheduler trait and lane keys
//! - `error` - Portable socket error taxonomy + setup errors
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod event;
pub mod reactor;
pub mod scheduler;
pub mod error;
pub mod log;
pub mod env;

// Re-exports for convenience
pub use event::EventMask;
pub use reactor::{EventHandler, Reactor};
pub use scheduler::{CompletionScheduler, Job, Lane};
pub use error::{CoreError, CoreResult, SocketError};
pub use env::{env_get, env_get_bool, env_get_opt};
