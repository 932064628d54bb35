//! `InlineScheduler` — runs each job on the thread that scheduled it.
//!
//! Only for tests and single-threaded tools. Completions are observable
//! immediately after the call that produced them, which makes assertions
//! deterministic. Never use it behind a real reactor: callbacks would run
//! on dispatch threads.

use sockasync_core::scheduler::{CompletionScheduler, Job, Lane};

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl InlineScheduler {
    pub fn new() -> Self {
        InlineScheduler
    }
}

impl CompletionScheduler for InlineScheduler {
    #[inline]
    fn schedule(&self, _lane: Lane, job: Job) {
        job();
    }

    fn shutdown(&self) {}
}
