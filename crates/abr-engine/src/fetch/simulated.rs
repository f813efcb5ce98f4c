use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::trace;

use super::SegmentTransport;
use crate::config::SimulationConfig;
use crate::error::{AbrError, Result};
use crate::manifest::SegmentRef;
use crate::network::NetworkCondition;

/// When a simulated transfer fails.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultPolicy {
    Never,
    Always,
    /// Each attempt fails independently with this probability.
    Probability(f64),
}

impl FaultPolicy {
    fn fails(&self, rng: &mut StdRng) -> bool {
        match *self {
            Self::Never => false,
            Self::Always => true,
            Self::Probability(p) if p.is_nan() || p <= 0.0 => false,
            Self::Probability(p) if p >= 1.0 => true,
            Self::Probability(p) => rng.random_bool(p),
        }
    }
}

/// Fake transport: waits out the latency of the given network condition plus
/// the payload's transfer time and returns synthetic bytes.
pub struct SimulatedTransport {
    policy: FaultPolicy,
    transfer_jitter_ms: u64,
    payload_bytes: usize,
    missing: HashSet<String>,
    rng: Mutex<StdRng>,
}

impl SimulatedTransport {
    pub fn new(config: &SimulationConfig, policy: FaultPolicy) -> Self {
        Self::seeded(config, policy, rand::random())
    }

    pub fn seeded(config: &SimulationConfig, policy: FaultPolicy, seed: u64) -> Self {
        Self {
            policy,
            transfer_jitter_ms: config.transfer_jitter_ms,
            payload_bytes: config.payload_bytes,
            missing: HashSet::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Answer requests for `uri` with [`AbrError::ResourceNotFound`].
    pub fn with_missing(mut self, uri: impl Into<String>) -> Self {
        self.missing.insert(uri.into());
        self
    }

    fn transfer_time(&self, network: &NetworkCondition) -> Duration {
        let bits = self.payload_bytes as f64 * 8.0;
        let secs = bits / network.available_bandwidth().max(1.0);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}

#[async_trait]
impl SegmentTransport for SimulatedTransport {
    async fn fetch(&self, segment: &SegmentRef, network: &NetworkCondition) -> Result<Bytes> {
        // The rng guard must be released before awaiting.
        let (jitter_ms, fails) = {
            let mut rng = self.rng.lock();
            let jitter_ms = rng.random_range(0..=self.transfer_jitter_ms);
            (jitter_ms, self.policy.fails(&mut rng))
        };

        // Conditions built field by field may carry negative or NaN latency.
        let latency = Duration::try_from_secs_f64(network.latency_ms / 1000.0)
            .unwrap_or_default()
            + Duration::from_millis(jitter_ms);

        if self.missing.contains(&segment.uri) {
            tokio::time::sleep(latency).await;
            return Err(AbrError::not_found(segment.uri.clone()));
        }
        if fails {
            tokio::time::sleep(latency).await;
            return Err(AbrError::transient(
                segment.uri.clone(),
                "simulated transfer failure",
            ));
        }

        let delay = latency + self.transfer_time(network);
        trace!(uri = %segment.uri, delay_ms = delay.as_millis() as u64, "Simulated transfer");
        tokio::time::sleep(delay).await;

        let fill = (segment.sequence % 251) as u8;
        Ok(Bytes::from(vec![fill; self.payload_bytes]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn segment(uri: &str) -> SegmentRef {
        SegmentRef {
            uri: uri.to_string(),
            duration_secs: 4.0,
            sequence: 3,
        }
    }

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            transfer_jitter_ms: 0,
            payload_bytes: 1000,
            ..SimulationConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_waits_latency_plus_transfer_time() {
        let transport = SimulatedTransport::seeded(&quiet_config(), FaultPolicy::Never, 1);
        // 8000 bits over 800 kbit/s = 10ms
        let network = NetworkCondition::new(800_000, 50.0, 0.0);
        let start = Instant::now();
        let payload = transport.fetch(&segment("a.ts"), &network).await.unwrap();
        assert_eq!(payload.len(), 1000);
        assert!(payload.iter().all(|b| *b == 3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(59) && elapsed <= Duration::from_millis(61));
    }

    #[tokio::test(start_paused = true)]
    async fn always_policy_fails_with_transient_error() {
        let transport = SimulatedTransport::seeded(&quiet_config(), FaultPolicy::Always, 1);
        let network = NetworkCondition::new(800_000, 50.0, 0.0);
        let err = transport.fetch(&segment("a.ts"), &network).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_uri_is_not_found() {
        let transport = SimulatedTransport::seeded(&quiet_config(), FaultPolicy::Never, 1)
            .with_missing("gone.ts");
        let network = NetworkCondition::new(800_000, 50.0, 0.0);
        let err = transport.fetch(&segment("gone.ts"), &network).await.unwrap_err();
        assert!(matches!(err, AbrError::ResourceNotFound { .. }));
        assert!(transport.fetch(&segment("a.ts"), &network).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unclamped_latency_is_treated_as_zero() {
        let transport = SimulatedTransport::seeded(&quiet_config(), FaultPolicy::Never, 1);
        for latency_ms in [-50.0, f64::NAN] {
            let network = NetworkCondition {
                bandwidth_bps: 800_000,
                latency_ms,
                packet_loss_ratio: 0.0,
            };
            let start = Instant::now();
            assert!(transport.fetch(&segment("a.ts"), &network).await.is_ok());
            // transfer time alone: 8000 bits over 800 kbit/s
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(9) && elapsed <= Duration::from_millis(11));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn seeded_fault_sequence_is_reproducible() {
        let network = NetworkCondition::new(8_000_000, 10.0, 0.0);
        let mut runs = Vec::new();
        for _ in 0..2 {
            let transport =
                SimulatedTransport::seeded(&quiet_config(), FaultPolicy::Probability(0.5), 42);
            let mut outcomes = Vec::new();
            for i in 0..32 {
                let uri = format!("seg-{i}.ts");
                outcomes.push(transport.fetch(&segment(&uri), &network).await.is_ok());
            }
            runs.push(outcomes);
        }
        assert_eq!(runs[0], runs[1]);
        assert!(runs[0].iter().any(|ok| *ok));
        assert!(runs[0].iter().any(|ok| !*ok));
    }
}
