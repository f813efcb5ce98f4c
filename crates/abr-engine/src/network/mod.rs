// Network Estimator: produces the network condition the selector reasons about.
//
// How a condition is obtained is a strategy: `SimulatedEstimator` draws it from
// named tiers, `MeasuredEstimator` derives it from observed transfers.

mod measured;
mod simulated;

pub use measured::{MeasuredEstimator, TransferObserver, TransferSample};
pub use simulated::{NetworkTier, SimulatedEstimator};

use serde::Serialize;

/// Snapshot of the network at one estimation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkCondition {
    pub bandwidth_bps: u64,
    pub latency_ms: f64,
    pub packet_loss_ratio: f64,
}

impl NetworkCondition {
    pub fn new(bandwidth_bps: u64, latency_ms: f64, packet_loss_ratio: f64) -> Self {
        Self {
            bandwidth_bps: bandwidth_bps.max(1),
            latency_ms: latency_ms.max(0.0),
            packet_loss_ratio: packet_loss_ratio.clamp(0.0, 1.0),
        }
    }

    /// Bandwidth left once lost packets are accounted for.
    pub fn available_bandwidth(&self) -> f64 {
        self.bandwidth_bps as f64 * (1.0 - self.packet_loss_ratio)
    }
}

pub trait NetworkEstimator: Send + Sync {
    /// Produce a fresh condition. Called once per network cycle.
    fn sample(&self) -> NetworkCondition;
}

/// Always reports the same condition.
#[derive(Debug, Clone)]
pub struct StaticEstimator {
    condition: NetworkCondition,
}

impl StaticEstimator {
    pub fn new(condition: NetworkCondition) -> Self {
        Self { condition }
    }
}

impl NetworkEstimator for StaticEstimator {
    fn sample(&self) -> NetworkCondition {
        self.condition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_is_normalised() {
        let c = NetworkCondition::new(0, -3.0, 1.5);
        assert_eq!(c.bandwidth_bps, 1);
        assert_eq!(c.latency_ms, 0.0);
        assert_eq!(c.packet_loss_ratio, 1.0);
    }

    #[test]
    fn available_bandwidth_discounts_loss() {
        let c = NetworkCondition::new(4_000_000, 20.0, 0.01);
        assert!((c.available_bandwidth() - 3_960_000.0).abs() < 1e-6);
    }

    #[test]
    fn static_estimator_repeats_its_condition() {
        let condition = NetworkCondition::new(2_000_000, 40.0, 0.0);
        let estimator = StaticEstimator::new(condition);
        assert_eq!(estimator.sample(), condition);
        assert_eq!(estimator.sample(), condition);
    }
}
