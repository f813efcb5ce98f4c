use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use super::{NetworkCondition, NetworkEstimator};

/// Outcome of one transfer attempt as seen by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferSample {
    pub bytes: u64,
    pub elapsed: Duration,
    pub success: bool,
}

/// Receives timing of every transfer attempt.
pub trait TransferObserver: Send + Sync {
    fn on_transfer(&self, sample: TransferSample);
}

#[derive(Debug, Default)]
struct MeasuredState {
    throughput_bps: Option<f64>,
    latency_ms: Option<f64>,
    outcomes: VecDeque<bool>,
}

/// Real estimator: derives the condition from transfers it observes.
///
/// Bandwidth and latency are exponential moving averages, packet loss is the
/// failure ratio over the last `window` attempts. Until something has been
/// observed the `fallback` condition is reported.
pub struct MeasuredEstimator {
    fallback: NetworkCondition,
    smoothing: f64,
    window: usize,
    state: Mutex<MeasuredState>,
}

impl MeasuredEstimator {
    pub fn new(fallback: NetworkCondition) -> Self {
        Self::with_window(fallback, 0.2, 20)
    }

    pub fn with_window(fallback: NetworkCondition, smoothing: f64, window: usize) -> Self {
        Self {
            fallback,
            smoothing: smoothing.clamp(0.0, 1.0),
            window: window.max(1),
            state: Mutex::new(MeasuredState::default()),
        }
    }

    fn blend(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
        match previous {
            Some(prev) => prev * (1.0 - alpha) + sample * alpha,
            None => sample,
        }
    }
}

impl TransferObserver for MeasuredEstimator {
    fn on_transfer(&self, sample: TransferSample) {
        let mut state = self.state.lock();

        if state.outcomes.len() >= self.window {
            state.outcomes.pop_front();
        }
        state.outcomes.push_back(sample.success);

        let elapsed_ms = sample.elapsed.as_secs_f64() * 1000.0;
        state.latency_ms = Some(Self::blend(state.latency_ms, elapsed_ms, self.smoothing));

        let secs = sample.elapsed.as_secs_f64();
        if sample.success && sample.bytes > 0 && secs > 0.0 {
            let throughput = sample.bytes as f64 * 8.0 / secs;
            state.throughput_bps = Some(Self::blend(
                state.throughput_bps,
                throughput,
                self.smoothing,
            ));
        }
    }
}

impl NetworkEstimator for MeasuredEstimator {
    fn sample(&self) -> NetworkCondition {
        let state = self.state.lock();
        if state.outcomes.is_empty() {
            return self.fallback;
        }

        let failures = state.outcomes.iter().filter(|ok| !**ok).count();
        let loss = failures as f64 / state.outcomes.len() as f64;
        let bandwidth = state
            .throughput_bps
            .map(|bps| bps.round() as u64)
            .unwrap_or(self.fallback.bandwidth_bps);
        let latency = state.latency_ms.unwrap_or(self.fallback.latency_ms);

        NetworkCondition::new(bandwidth, latency, loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> NetworkCondition {
        NetworkCondition::new(1_000_000, 100.0, 0.0)
    }

    #[test]
    fn reports_fallback_before_any_transfer() {
        let estimator = MeasuredEstimator::new(fallback());
        assert_eq!(estimator.sample(), fallback());
    }

    #[test]
    fn first_transfer_sets_throughput_and_latency() {
        let estimator = MeasuredEstimator::new(fallback());
        // 250_000 bytes in 500ms = 4 Mbit/s
        estimator.on_transfer(TransferSample {
            bytes: 250_000,
            elapsed: Duration::from_millis(500),
            success: true,
        });
        let c = estimator.sample();
        assert_eq!(c.bandwidth_bps, 4_000_000);
        assert!((c.latency_ms - 500.0).abs() < 1e-6);
        assert_eq!(c.packet_loss_ratio, 0.0);
    }

    #[test]
    fn throughput_is_smoothed() {
        let estimator = MeasuredEstimator::with_window(fallback(), 0.5, 10);
        for bytes in [100_000u64, 200_000] {
            estimator.on_transfer(TransferSample {
                bytes,
                elapsed: Duration::from_secs(1),
                success: true,
            });
        }
        // 800k then 1.6M bit/s blended at 0.5
        assert_eq!(estimator.sample().bandwidth_bps, 1_200_000);
    }

    #[test]
    fn loss_is_failure_ratio_over_window() {
        let estimator = MeasuredEstimator::with_window(fallback(), 0.2, 4);
        let outcomes = [false, false, true, true, true, false];
        for success in outcomes {
            estimator.on_transfer(TransferSample {
                bytes: if success { 10_000 } else { 0 },
                elapsed: Duration::from_millis(100),
                success,
            });
        }
        // window keeps [true, true, true, false]
        assert!((estimator.sample().packet_loss_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn failures_only_keep_fallback_bandwidth() {
        let estimator = MeasuredEstimator::new(fallback());
        estimator.on_transfer(TransferSample {
            bytes: 0,
            elapsed: Duration::from_millis(300),
            success: false,
        });
        let c = estimator.sample();
        assert_eq!(c.bandwidth_bps, fallback().bandwidth_bps);
        assert_eq!(c.packet_loss_ratio, 1.0);
    }
}
