use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const PERIOD: Duration = Duration::from_secs(60);

/// Sliding-window cap on kill-class actions.
#[derive(Debug)]
pub struct RateLimiter {
    cap: usize,
    period: Duration,
    admitted: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(cap: usize) -> Self {
        Self::with_period(cap, PERIOD)
    }

    pub fn with_period(cap: usize, period: Duration) -> Self {
        Self {
            cap,
            period,
            admitted: VecDeque::with_capacity(cap),
        }
    }

    /// Admits and counts an action unless `cap` were already admitted within
    /// the trailing period. Refused actions are not counted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(first) = self.admitted.front() {
            if now.duration_since(*first) >= self.period {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
        if self.admitted.len() >= self.cap {
            return false;
        }
        self.admitted.push_back(now);
        true
    }

    pub fn in_window(&self) -> usize {
        self.admitted.len()
    }
}
