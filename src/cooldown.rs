//! Cooldown gating between accepted detections.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the last accepted detection and suppresses candidates arriving
/// before the cooldown has elapsed. Rejected candidates are dropped, never
/// queued or retried.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_accepted: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: None,
        }
    }

    /// Non-mutating check, used as an early-out before pattern matching.
    pub fn would_accept(&self, now: Instant) -> bool {
        match self.last_accepted {
            Some(prev) => now.duration_since(prev) >= self.cooldown,
            None => true,
        }
    }

    /// Accepts the candidate and records `now`, or rejects it leaving state
    /// unchanged. A cooldown of zero accepts every candidate.
    pub fn accept(&mut self, now: Instant) -> bool {
        if !self.would_accept(now) {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_timeline() {
        let mut gate = CooldownGate::new(Duration::from_secs(5));

        // t=0: first candidate always accepted.
        assert!(gate.accept(Instant::now()));

        // t=2: inside the window, rejected.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!gate.would_accept(Instant::now()));
        assert!(!gate.accept(Instant::now()));

        // t=6: window elapsed, accepted again.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(gate.accept(Instant::now()));

        // t=7: the rejection at t=2 must not have moved the window.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!gate.accept(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cooldown_accepts_all() {
        let mut gate = CooldownGate::new(Duration::ZERO);
        assert!(gate.accept(Instant::now()));
        assert!(gate.accept(Instant::now()));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(gate.accept(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_is_inclusive() {
        let mut gate = CooldownGate::new(Duration::from_secs(5));
        assert!(gate.accept(Instant::now()));
        tokio::time::advance(Duration::from_secs(5)).await;
        // now - last == cooldown: accepted.
        assert!(gate.accept(Instant::now()));
    }
}
