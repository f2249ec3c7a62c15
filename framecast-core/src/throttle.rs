//! Rate limiting for repetitive failure logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts failures and says when one is worth logging: the first, then
/// every `every`th.
#[derive(Debug)]
pub struct LogThrottle {
    every: u64,
    count: AtomicU64,
}

impl LogThrottle {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            count: AtomicU64::new(0),
        }
    }

    /// Record one failure. Returns the running total if this one should be
    /// logged.
    pub fn hit(&self) -> Option<u64> {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        ((n - 1) % self.every == 0).then_some(n)
    }

    /// Failures recorded so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_first_then_every_nth() {
        let t = LogThrottle::new(3);
        let logged: Vec<u64> = (0..10).filter_map(|_| t.hit()).collect();
        assert_eq!(logged, vec![1, 4, 7, 10]);
        assert_eq!(t.count(), 10);
    }

    #[test]
    fn zero_means_every_failure() {
        let t = LogThrottle::new(0);
        assert_eq!(t.hit(), Some(1));
        assert_eq!(t.hit(), Some(2));
    }
}
