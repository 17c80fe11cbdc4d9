use std::time::Duration;

pub const BACKOFF_CAP: u32 = 20;

/// Reconnect delay in units: 1, 2, 4 and so on up to the cap, back to 1 after
/// a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: u32,
    cap: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_cap(BACKOFF_CAP)
    }

    pub fn with_cap(cap: u32) -> Self {
        Self {
            next: 1,
            cap: cap.max(1),
        }
    }

    /// Records a failed attempt and returns how many units to wait.
    pub fn fail(&mut self) -> u32 {
        let wait = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        wait
    }

    pub fn reset(&mut self) {
        self.next = 1;
    }

    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Same as [`Backoff::fail`], scaled to a duration.
    pub fn delay(&mut self, unit: Duration) -> Duration {
        unit * self.fail()
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
