//! Quiet-period timer for coalescing bursts of scene events
//!
//! Time is always passed in by the caller, so the coordinator can be driven
//! by a real clock in the CLI and by fixed instants in tests.

use std::time::{Duration, Instant};

/// Single pending deadline; rescheduling replaces it instead of stacking
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self { delay, deadline: None }
    }

    /// Cancel any pending deadline and start a new quiet period at `now`
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the deadline if it has passed
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_delay() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        debounce.schedule(start);

        assert!(!debounce.fire(start + Duration::from_millis(99)));
        assert!(debounce.fire(start + Duration::from_millis(100)));
        assert!(!debounce.fire(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_burst_settles_after_last_event() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        for step in 0..5 {
            debounce.schedule(start + Duration::from_millis(step * 50));
        }

        // last event at +200ms, so +250ms is still inside the quiet period
        assert!(!debounce.fire(start + Duration::from_millis(250)));
        assert!(debounce.fire(start + Duration::from_millis(300)));
    }

    #[test]
    fn test_cancel_clears_pending() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(100));
        debounce.schedule(start);
        debounce.cancel();
        assert_eq!(debounce.deadline(), None);
        assert!(!debounce.fire(start + Duration::from_secs(1)));
    }
}
