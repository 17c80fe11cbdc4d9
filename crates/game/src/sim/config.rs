use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::Speed;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub save_path: PathBuf,
    pub slow_ms: u64,
    pub fast_ms: u64,
    pub faster_ms: u64,
    /// How often a paused sim looks at its queues.
    pub idle_poll_ms: u64,
    /// Sim to peer ring size in bytes. Must hold at least one full state.
    pub state_ring_size: usize,
    /// Peer to sim ring size in bytes. Must hold the largest cmd, which is a
    /// `ModCompile` of [`MAX_SOURCE_LEN`](crate::protocol::MAX_SOURCE_LEN) bytes.
    pub cmd_ring_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("./legion.save"),
            slow_ms: 100,
            fast_ms: 10,
            faster_ms: 1,
            idle_poll_ms: 5,
            state_ring_size: 1 << 20,
            cmd_ring_size: 1 << 16,
        }
    }
}

impl SimConfig {
    /// Time between two ticks, `None` while paused.
    pub fn period(&self, speed: Speed) -> Option<Duration> {
        let ms = match speed {
            Speed::Paused => return None,
            Speed::Slow => self.slow_ms,
            Speed::Fast => self.fast_ms,
            Speed::Faster => self.faster_ms,
            Speed::Fastest => 0,
        };
        Some(Duration::from_millis(ms))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Cmd, HEADER_LEN, MAX_SOURCE_LEN};
    use crate::save::MemCursor;

    #[test]
    fn periods_shrink_with_speed() {
        let config = SimConfig::default();
        assert_eq!(config.period(Speed::Paused), None);
        let periods: Vec<Duration> = Speed::ALL[1..]
            .iter()
            .filter_map(|&speed| config.period(speed))
            .collect();
        assert_eq!(periods.len(), 4);
        assert!(periods.windows(2).all(|pair| pair[0] > pair[1]));
        assert_eq!(periods[3], Duration::ZERO);
    }

    #[test]
    fn default_cmd_ring_holds_the_largest_compile() {
        let cmd = Cmd::ModCompile {
            maj: 1,
            source: "x".repeat(MAX_SOURCE_LEN),
        };
        let mut payload = MemCursor::new();
        cmd.save(&mut payload).unwrap();
        assert!(HEADER_LEN + payload.as_slice().len() <= SimConfig::default().cmd_ring_size);
    }
}
