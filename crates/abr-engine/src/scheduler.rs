// Scheduler: where the session's periodic estimation cycles come from.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior, interval};

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Sample the network estimator.
    Network,
    /// Recompute buffer health from playback telemetry.
    Buffer,
}

/// Source of estimation ticks for one session.
#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next tick. `None` means the source is finished.
    async fn next_tick(&mut self) -> Option<Tick>;
}

/// Wall-clock ticks on two independent intervals.
pub struct IntervalTicks {
    network: Interval,
    buffer: Interval,
}

impl IntervalTicks {
    pub fn new(network_every: Duration, buffer_every: Duration) -> Self {
        let mut network = interval(network_every);
        network.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buffer = interval(buffer_every);
        buffer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { network, buffer }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.network_interval(), config.buffer_interval())
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Option<Tick> {
        tokio::select! {
            biased;
            _ = self.buffer.tick() => Some(Tick::Buffer),
            _ = self.network.tick() => Some(Tick::Network),
        }
    }
}

/// Ticks injected by hand, for tests and step-by-step drivers.
pub struct ManualTicks {
    receiver: mpsc::UnboundedReceiver<Tick>,
}

/// Sending half of [`ManualTicks`]. The source finishes once every sender is dropped.
#[derive(Clone)]
pub struct TickSender {
    sender: mpsc::UnboundedSender<Tick>,
}

impl ManualTicks {
    pub fn channel() -> (TickSender, ManualTicks) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (TickSender { sender }, ManualTicks { receiver })
    }
}

impl TickSender {
    /// Returns `false` when the receiving session is gone.
    pub fn send(&self, tick: Tick) -> bool {
        self.sender.send(tick).is_ok()
    }

    pub fn network(&self) -> bool {
        self.send(Tick::Network)
    }

    pub fn buffer(&self) -> bool {
        self.send(Tick::Buffer)
    }
}

#[async_trait]
impl TickSource for ManualTicks {
    async fn next_tick(&mut self) -> Option<Tick> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn intervals_fire_at_their_own_cadence() {
        let mut ticks = IntervalTicks::new(Duration::from_secs(2), Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let mut seen = Vec::new();
        while start.elapsed() <= Duration::from_secs(4) {
            let tick = ticks.next_tick().await.unwrap();
            seen.push((tick, start.elapsed().as_secs()));
            if seen.len() == 8 {
                break;
            }
        }
        let network = seen.iter().filter(|(t, _)| *t == Tick::Network).count();
        let buffer = seen.iter().filter(|(t, _)| *t == Tick::Buffer).count();
        // t=0,1,2,3,4 for buffer and t=0,2,4 for network
        assert_eq!(buffer, 5);
        assert_eq!(network, 3);
    }

    #[tokio::test]
    async fn manual_ticks_arrive_in_order_and_finish() {
        let (sender, mut ticks) = ManualTicks::channel();
        assert!(sender.network());
        assert!(sender.buffer());
        drop(sender);

        assert_eq!(ticks.next_tick().await, Some(Tick::Network));
        assert_eq!(ticks.next_tick().await, Some(Tick::Buffer));
        assert_eq!(ticks.next_tick().await, None);
    }

    #[tokio::test]
    async fn send_reports_closed_receiver() {
        let (sender, ticks) = ManualTicks::channel();
        drop(ticks);
        assert!(!sender.buffer());
    }
}
