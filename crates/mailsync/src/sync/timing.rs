//! Cooldown and failure-backoff arithmetic for the sync engine

use std::time::{Duration, Instant};

/// Whether enough time has passed since the last completed pass for an
/// opportunistic trigger to run again. A never-run engine is always
/// eligible.
pub fn cooldown_elapsed(last_completed: Option<Instant>, cooldown: Duration) -> bool {
    match last_completed {
        Some(at) => at.elapsed() >= cooldown,
        None => true,
    }
}

/// Delay before the next attempt after `failures` consecutive failed
/// passes: doubles per failure from `base`, capped at `max`.
pub fn failure_backoff(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let shift = (failures - 1).min(16);
    base.saturating_mul(1u32 << shift).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_without_prior_run() {
        assert!(cooldown_elapsed(None, Duration::from_secs(30)));
    }

    #[test]
    fn test_cooldown_blocks_recent_run() {
        assert!(!cooldown_elapsed(
            Some(Instant::now()),
            Duration::from_secs(30)
        ));
        assert!(cooldown_elapsed(Some(Instant::now()), Duration::ZERO));
    }

    #[test]
    fn test_failure_backoff_doubles_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(failure_backoff(0, base, max), Duration::ZERO);
        assert_eq!(failure_backoff(1, base, max), Duration::from_secs(5));
        assert_eq!(failure_backoff(2, base, max), Duration::from_secs(10));
        assert_eq!(failure_backoff(3, base, max), Duration::from_secs(20));
        assert_eq!(failure_backoff(10, base, max), max);
    }
}
