use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{NetworkCondition, NetworkEstimator};
use crate::config::SimulationConfig;
use crate::error::AbrError;

/// Named network quality tiers used by the simulated estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl NetworkTier {
    pub const ALL: [NetworkTier; 4] = [
        NetworkTier::Poor,
        NetworkTier::Fair,
        NetworkTier::Good,
        NetworkTier::Excellent,
    ];

    /// Baseline condition of the tier, before variance is applied.
    pub fn baseline(self) -> NetworkCondition {
        match self {
            Self::Poor => NetworkCondition::new(1_200_000, 300.0, 0.08),
            Self::Fair => NetworkCondition::new(3_000_000, 150.0, 0.03),
            Self::Good => NetworkCondition::new(6_000_000, 60.0, 0.01),
            Self::Excellent => NetworkCondition::new(12_000_000, 20.0, 0.002),
        }
    }
}

impl fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        };
        f.write_str(name)
    }
}

impl FromStr for NetworkTier {
    type Err = AbrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poor" => Ok(Self::Poor),
            "fair" => Ok(Self::Fair),
            "good" => Ok(Self::Good),
            "excellent" => Ok(Self::Excellent),
            other => Err(AbrError::configuration(format!(
                "unknown network tier `{other}`"
            ))),
        }
    }
}

/// Fake estimator: a random tier with random bandwidth variance and jitter.
///
/// Seedable so tests and demos can replay the same sequence of conditions.
pub struct SimulatedEstimator {
    config: SimulationConfig,
    pinned_tier: Option<NetworkTier>,
    rng: Mutex<StdRng>,
}

impl SimulatedEstimator {
    pub fn new(config: SimulationConfig) -> Self {
        Self::seeded(config, rand::random())
    }

    pub fn seeded(config: SimulationConfig, seed: u64) -> Self {
        Self {
            config,
            pinned_tier: None,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Always draw from `tier` instead of a random one.
    pub fn pinned(mut self, tier: NetworkTier) -> Self {
        self.pinned_tier = Some(tier);
        self
    }
}

impl NetworkEstimator for SimulatedEstimator {
    fn sample(&self) -> NetworkCondition {
        let mut rng = self.rng.lock();
        let tier = match self.pinned_tier {
            Some(tier) => tier,
            None => NetworkTier::ALL[rng.random_range(0..NetworkTier::ALL.len())],
        };
        let base = tier.baseline();

        let factor = rng.random_range(
            self.config.min_bandwidth_factor..=self.config.max_bandwidth_factor,
        );
        let bandwidth = (base.bandwidth_bps as f64 * factor).round() as u64;
        let latency = base.latency_ms + rng.random_range(0.0..=self.config.latency_jitter_ms);
        let loss = base.packet_loss_ratio + rng.random_range(0.0..=self.config.loss_jitter);

        let condition = NetworkCondition::new(bandwidth, latency, loss);
        trace!(
            %tier,
            bandwidth_bps = condition.bandwidth_bps,
            latency_ms = condition.latency_ms,
            loss = condition.packet_loss_ratio,
            "Simulated network sample"
        );
        condition
    }
}
