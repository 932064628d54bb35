//! `Engine` — the reactor and completion scheduler a socket binds to.
//!
//! Cheap to clone; every socket holds one. `Engine::start()` builds the
//! default stack (epoll reactor + fixed completion pool) from an
//! `EngineConfig`; `Engine::new()` accepts any implementations, which is
//! how tests plug in recording reactors and inline schedulers.

use crate::config::EngineConfig;

use sockasync_core::error::CoreResult;
use sockasync_core::{log_info, CompletionScheduler, Reactor};
use sockasync_module::{EpollReactor, EpollReactorConfig, FixedPool};
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
    reactor: Arc<dyn Reactor>,
    scheduler: Arc<dyn CompletionScheduler>,
    /// Set when this engine owns the epoll reactor and must stop it.
    epoll: Option<Arc<EpollReactor>>,
    blocking_close: bool,
}

impl Engine {
    pub fn new(reactor: Arc<dyn Reactor>, scheduler: Arc<dyn CompletionScheduler>) -> Self {
        Self {
            reactor,
            scheduler,
            epoll: None,
            blocking_close: crate::config::defaults::BLOCKING_CLOSE,
        }
    }

    /// Validate `config` and start the default reactor and pool.
    pub fn start(config: &EngineConfig) -> CoreResult<Self> {
        config.validate()?;

        let pool = Arc::new(FixedPool::new(config.completion_workers, config.park_timeout)?);
        let epoll = Arc::new(EpollReactor::new(EpollReactorConfig {
            dispatch_threads: config.dispatch_threads,
            max_events: config.max_events,
            wait_timeout: config.wait_timeout,
        })?);

        log_info!(
            "engine started: {} completion workers, {} dispatch threads",
            config.completion_workers,
            config.dispatch_threads
        );
        Ok(Self {
            reactor: epoll.clone(),
            scheduler: pool,
            epoll: Some(epoll),
            blocking_close: config.blocking_close,
        })
    }

    /// Default stack configured from the environment.
    pub fn from_env() -> CoreResult<Self> {
        Self::start(&EngineConfig::from_env())
    }

    #[inline]
    pub fn reactor(&self) -> &Arc<dyn Reactor> {
        &self.reactor
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<dyn CompletionScheduler> {
        &self.scheduler
    }

    /// Whether new sockets try the blocking close path first.
    #[inline]
    pub fn blocking_close(&self) -> bool {
        self.blocking_close
    }

    /// Stop dispatching readiness, then run every scheduled completion and
    /// stop the pool. Sockets still open afterwards only complete inline.
    pub fn shutdown(&self) {
        if let Some(epoll) = &self.epoll {
            epoll.shutdown();
        }
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockasync_core::CoreError;
    use std::time::Duration;

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = EngineConfig::new().dispatch_threads(0);
        match Engine::start(&config) {
            Err(CoreError::InvalidConfig(msg)) => assert!(msg.contains("dispatch_threads")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("invalid config accepted"),
        }
    }

    #[test]
    fn test_start_and_shutdown() {
        let config = EngineConfig::new()
            .completion_workers(2)
            .wait_timeout(Duration::from_millis(10))
            .blocking_close(false);
        let engine = Engine::start(&config).unwrap();
        assert!(!engine.blocking_close());
        engine.shutdown();
        engine.shutdown();
    }
}
