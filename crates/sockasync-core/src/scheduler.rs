//! Completion scheduling abstraction.
//!
//! A `CompletionScheduler` runs completion callbacks away from the thread
//! that discovered the completion, so neither a caller nor a reactor
//! dispatch thread ever runs user code.
//!
//! # Implementors
//!
//! - `FixedPool` (default): N worker threads, one lane queue each.
//!   All jobs with the same `Lane` run on one worker, in schedule order.
//!
//! - `InlineScheduler` (testing): runs the job on the scheduling thread.
//!   Only for unit tests — it runs user callbacks on the caller!

/// A unit of completion work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Ordering key for scheduled jobs.
///
/// Jobs scheduled with equal lanes run in the order they were scheduled.
/// There is no ordering between different lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Lane(pub u64);

impl Lane {
    /// Lane for one direction of one descriptor.
    #[inline]
    pub fn for_direction(fd: i32, direction: u8) -> Self {
        Self(((fd as u32 as u64) << 8) | direction as u64)
    }

    /// Spread lanes over `n` workers.
    #[inline]
    pub fn bucket(self, n: usize) -> usize {
        debug_assert!(n > 0);
        // Fibonacci hashing: neighbouring descriptors land on different workers.
        (self.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize % n
    }
}

/// Hands completed operations to callback-running threads.
///
/// **Contract:**
/// - `schedule()` must NEVER block and never fails. A job handed in is run
///   exactly once, including when `shutdown()` races with it.
/// - Jobs on the same lane run sequentially in schedule order.
pub trait CompletionScheduler: Send + Sync {
    /// Queue `job` for execution on `lane`.
    fn schedule(&self, lane: Lane, job: Job);

    /// Run every queued job, then stop the workers. Blocks until drained.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_distinguishes_direction() {
        let a = Lane::for_direction(7, 0);
        let b = Lane::for_direction(7, 1);
        assert_ne!(a, b);
        assert_eq!(a, Lane::for_direction(7, 0));
    }

    #[test]
    fn test_bucket_in_range() {
        for fd in 0..64 {
            for dir in 0..3u8 {
                assert!(Lane::for_direction(fd, dir).bucket(5) < 5);
            }
        }
    }
}
