use std::thread;
use std::time::{Duration, Instant};

/// Fixed-period pacing for caller-owned resend loops.
///
/// Ticks are scheduled from the previous deadline rather than from when the caller
/// returned, so request latency does not accumulate as drift. When a caller falls more
/// than one period behind, the missed ticks are skipped and counted instead of being
/// replayed in a burst.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next: Option<Instant>,
    missed: u64,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: None,
            missed: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks skipped because the caller overran.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Start over; the next [`Cadence::wait`] returns immediately.
    pub fn reset(&mut self) {
        self.next = None;
    }

    /// Block until the next tick. The first call returns immediately.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let Some(next) = self.next else {
            self.next = Some(now + self.period);
            return;
        };
        if self.period.is_zero() {
            return;
        }
        if next > now {
            thread::sleep(next - now);
            self.next = Some(next + self.period);
            return;
        }
        let behind = now - next;
        let skipped = (behind.as_nanos() / self.period.as_nanos()) as u64;
        if skipped > 0 {
            tracing::debug!(skipped, period = ?self.period, "cadence overrun");
        }
        self.missed += skipped;
        self.next = Some(next + self.period * (skipped as u32 + 1));
    }
}
