use std::time::Duration;

use tokio::time::Instant;

/// PING counter plus the pong watchdog.
///
/// The watchdog is armed by the first unanswered PING and disarmed by a PONG.
/// When it expires it reports once and disarms; the next PING arms it again.
#[derive(Debug)]
pub struct Heartbeat {
    heart: u64,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(timeout: Duration) -> Self {
        Self {
            heart: 0,
            timeout,
            deadline: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Count a PING about to go out. Returns its sequence number.
    pub fn beat(&mut self, now: Instant) -> u64 {
        self.heart += 1;
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
        self.heart
    }

    pub fn pong(&mut self) {
        self.deadline = None;
    }

    /// True exactly once per armed window, when `now` is past the deadline.
    pub fn expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn message(&self) -> String {
        format!("no pong received in {}s", self.timeout.as_secs())
    }
}
