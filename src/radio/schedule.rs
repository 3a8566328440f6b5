use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::HoppingConfig;

/// Wall-clock frequency hopping table shared with the lights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopSchedule {
    dwell_ms: u64,
    channels: Vec<u8>,
}

impl HopSchedule {
    /// `None` for an empty table or zero dwell.
    pub fn new(dwell_ms: u64, channels: Vec<u8>) -> Option<Self> {
        if dwell_ms == 0 || channels.is_empty() {
            return None;
        }
        Some(Self { dwell_ms, channels })
    }

    pub fn from_config(config: &HoppingConfig) -> Option<Self> {
        Self::new(config.dwell_ms, config.channels.clone())
    }

    pub fn index_at(&self, unix_millis: u64) -> usize {
        ((unix_millis / self.dwell_ms) % self.channels.len() as u64) as usize
    }

    pub fn channel_at(&self, unix_millis: u64) -> u8 {
        self.channels[self.index_at(unix_millis)]
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Broadcast pacing: ticks no more often than `max_fps` per second. A late
/// tick pushes the following ones back instead of bursting to catch up.
pub struct FrameGate {
    ticker: Interval,
}

impl FrameGate {
    pub fn new(period: Duration) -> Self {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { ticker }
    }

    pub fn period(&self) -> Duration {
        self.ticker.period()
    }

    pub async fn wait(&mut self) {
        self.ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_channel_follows_dwell_windows() {
        let schedule = HopSchedule::new(100, vec![10, 40, 70]).unwrap();
        assert_eq!(schedule.channel_at(0), 10);
        assert_eq!(schedule.channel_at(99), 10);
        assert_eq!(schedule.channel_at(100), 40);
        assert_eq!(schedule.channel_at(250), 70);
        assert_eq!(schedule.channel_at(300), 10);
        assert_eq!(schedule.index_at(1_000_050), 1);
    }

    #[test]
    fn test_rejects_degenerate_tables() {
        assert!(HopSchedule::new(0, vec![1]).is_none());
        assert!(HopSchedule::new(10, vec![]).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_gate_caps_rate() {
        let mut gate = FrameGate::new(Duration::from_millis(100));
        let start = Instant::now();
        for _ in 0..4 {
            gate.wait().await;
        }
        // First tick is immediate.
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(gate.period(), Duration::from_millis(100));
    }
}
