use std::time::Duration;

use rand::Rng;

use crate::config::BackoffPolicy;

/// Reconnection delay schedule. Persists across attempts, reset on open.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    delay: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let delay = Self::base(&policy);
        Self {
            policy,
            delay,
            retries: 0,
        }
    }

    fn base(policy: &BackoffPolicy) -> Duration {
        match policy {
            BackoffPolicy::Multiplicative { base, .. } | BackoffPolicy::Jittered { base, .. } => *base,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.delay = Self::base(&self.policy);
        self.retries = 0;
    }

    /// Delay before the next attempt, `None` once the policy gives up.
    pub fn next_delay(&mut self, rng: &mut impl Rng) -> Option<Duration> {
        match self.policy {
            BackoffPolicy::Multiplicative { factor, max, .. } => {
                let delay = self.delay;
                self.delay = self.delay.mul_f64(factor).min(max);
                self.retries = self.retries.saturating_add(1);
                Some(delay)
            }
            BackoffPolicy::Jittered {
                base,
                max,
                jitter,
                max_retries,
            } => {
                if self.retries >= max_retries {
                    return None;
                }
                let exp = base.saturating_mul(2u32.saturating_pow(self.retries)).min(max);
                let spread = exp.as_secs_f64() * jitter * rng.gen_range(-1.0..=1.0);
                let delay = Duration::from_secs_f64((exp.as_secs_f64() + spread).max(base.as_secs_f64()));
                self.retries += 1;
                Some(delay)
            }
        }
    }
}
