//! # sockasync-module — Default implementations
//!
//! This crate provides the default implementation for every sockasync-core
//! trait. Each impl prioritizes correctness and simplicity over performance.
//!
//! ## Default stack
//!
//! | Trait               | Default Impl     | Testing alternative |
//! |---------------------|------------------|---------------------|
//! | Reactor             | EpollReactor     | recording mocks     |
//! | CompletionScheduler | FixedPool        | InlineScheduler     |

pub mod epoll_reactor;
pub mod fixed_pool;
pub mod inline_scheduler;
pub mod wake_fd;

pub use epoll_reactor::{EpollReactor, EpollReactorConfig};
pub use fixed_pool::FixedPool;
pub use inline_scheduler::InlineScheduler;
