//! Global scan debounce.

use std::time::{Duration, Instant};

/// Rejects scans that arrive within `window` of the previous outcome.
///
/// Starts open: the first scan is never debounced.
#[derive(Debug)]
pub struct CooldownGate {
    last_outcome: Option<Instant>,
    window: Duration,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            last_outcome: None,
            window,
        }
    }

    /// Check if a scan arriving now must be debounced
    pub fn is_cooling(&self) -> bool {
        self.remaining().is_some()
    }

    /// Time left until the gate reopens
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.last_outcome?.elapsed();
        self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Restart the window from now
    pub fn record_outcome(&mut self) {
        self.last_outcome = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_scan_passes() {
        let gate = CooldownGate::new(Duration::from_secs(2));
        assert!(!gate.is_cooling());
        assert!(gate.remaining().is_none());
    }

    #[test]
    fn test_gate_closes_then_reopens() {
        let mut gate = CooldownGate::new(Duration::from_millis(100));
        gate.record_outcome();
        assert!(gate.is_cooling());

        thread::sleep(Duration::from_millis(150));
        assert!(!gate.is_cooling());
    }

    #[test]
    fn test_outcome_restarts_window() {
        // Wide margins to avoid flaky behavior on slow CI runners.
        let mut gate = CooldownGate::new(Duration::from_millis(250));
        gate.record_outcome();

        thread::sleep(Duration::from_millis(150));
        gate.record_outcome();

        thread::sleep(Duration::from_millis(150));
        assert!(gate.is_cooling());

        thread::sleep(Duration::from_millis(200));
        assert!(!gate.is_cooling());
    }

    #[test]
    fn test_zero_window_never_cools() {
        let mut gate = CooldownGate::new(Duration::ZERO);
        gate.record_outcome();
        assert!(!gate.is_cooling());
    }
}
