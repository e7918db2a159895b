use std::time::Duration;

/// Exponential backoff for reconnect attempts.
///
/// Each failure is recorded with [`next_delay`](Self::next_delay), which hands
/// back how long to sleep before the next attempt. The first delay is the
/// configured initial delay and every following one doubles. Every failure,
/// including the last, is followed by its delay; once the configured number of
/// failures is reached the backoff is [`exhausted`](Self::exhausted) and the
/// caller gives up instead of attempting again.
///
/// # Example
///
/// ```
/// use remex_client::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_millis(100), 2);
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert!(!backoff.exhausted());
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// assert!(backoff.exhausted());
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            current: initial,
            max_attempts,
            attempts: 0,
        }
    }

    /// Records a failed attempt and returns the wait that follows it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        delay
    }

    /// Forgets previous failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.initial;
    }

    /// Failed attempts recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once no further attempt should be made.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_from_initial() {
        let mut backoff = Backoff::new(Duration::from_millis(100), 10);
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn test_sleeps_after_every_failure_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(5), 5);
        let mut delays = Vec::new();
        while !backoff.exhausted() {
            delays.push(backoff.next_delay());
        }

        assert_eq!(backoff.attempts(), 5);
        assert_eq!(delays.len(), 5);
        assert_eq!(delays[0], Duration::from_secs(5));
        for pair in delays.windows(2) {
            assert_eq!(pair[1], pair[0] * 2);
        }
    }

    #[test]
    fn test_reset_restores_initial_delay() {
        let mut backoff = Backoff::new(Duration::from_millis(10), 5);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert!(!backoff.exhausted());
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_max_gives_up_immediately() {
        let backoff = Backoff::new(Duration::from_millis(10), 0);
        assert!(backoff.exhausted());
    }
}
