use std::time::Duration;

use serde::Deserialize;

use crate::error::{AbrError, Result};

/// Buffered seconds below which playback is considered starving.
pub const STARVATION_THRESHOLD_SECONDS: f64 = 5.0;

// --- Selector Configuration ---
/// Hysteresis thresholds of the quality selector.
///
/// Holding or stepping down to a tier requires `sustain_factor` × its bandwidth,
/// committing to a higher tier requires `upgrade_factor` × its bandwidth and a
/// buffer ratio above `upgrade_buffer_ratio`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub sustain_factor: f64,
    pub upgrade_factor: f64,
    pub upgrade_buffer_ratio: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            sustain_factor: 0.8,
            upgrade_factor: 1.4,
            upgrade_buffer_ratio: 1.2,
        }
    }
}

// --- Buffer Configuration ---
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub target_buffer_secs: f64,
    pub starvation_threshold_secs: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            target_buffer_secs: 30.0,
            starvation_threshold_secs: STARVATION_THRESHOLD_SECONDS,
        }
    }
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Network sampling cadence
    pub network_interval_ms: u64,
    /// Buffer sampling cadence
    pub buffer_interval_ms: u64,
    /// Capacity of the session event channel
    pub event_channel_capacity: usize,
}

impl SchedulerConfig {
    pub fn network_interval(&self) -> Duration {
        Duration::from_millis(self.network_interval_ms)
    }

    pub fn buffer_interval(&self) -> Duration {
        Duration::from_millis(self.buffer_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            network_interval_ms: 2000,
            buffer_interval_ms: 1000,
            event_channel_capacity: 64,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Total attempts per segment, the first one included.
    pub max_retries: u32,
    /// Base for exponential backoff: delay = base * 2^attempt
    pub backoff_base_ms: u64,
    /// Hard cap on a single backoff delay
    pub max_backoff_ms: u64,
}

impl FetcherConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

// --- Telemetry Configuration ---
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_capacity: usize,
    pub buffer_event_capacity: usize,
    /// Weight of the newest sample in the rolling bandwidth average
    pub bandwidth_smoothing: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_capacity: 50,
            buffer_event_capacity: 20,
            bandwidth_smoothing: 0.2,
        }
    }
}

// --- Simulation Configuration ---
/// Knobs of the simulated estimator and transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Lower bound of the bandwidth variance multiplier
    pub min_bandwidth_factor: f64,
    /// Upper bound of the bandwidth variance multiplier
    pub max_bandwidth_factor: f64,
    pub latency_jitter_ms: f64,
    pub loss_jitter: f64,
    /// Extra random delay added to each simulated transfer
    pub transfer_jitter_ms: u64,
    /// Size of the synthetic payload returned per segment
    pub payload_bytes: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_bandwidth_factor: 0.3,
            max_bandwidth_factor: 0.7,
            latency_jitter_ms: 50.0,
            loss_jitter: 0.02,
            transfer_jitter_ms: 100,
            payload_bytes: 16 * 1024,
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AbrConfig {
    pub selector: SelectorConfig,
    pub buffer: BufferConfig,
    pub scheduler: SchedulerConfig,
    pub fetcher: FetcherConfig,
    pub telemetry: TelemetryConfig,
    pub simulation: SimulationConfig,
}

impl AbrConfig {
    /// Reject configurations the control loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.selector;
        let sim = &self.simulation;
        for (name, value) in [
            ("sustain_factor", s.sustain_factor),
            ("upgrade_factor", s.upgrade_factor),
            ("upgrade_buffer_ratio", s.upgrade_buffer_ratio),
            ("target_buffer_secs", self.buffer.target_buffer_secs),
            ("starvation_threshold_secs", self.buffer.starvation_threshold_secs),
            ("bandwidth_smoothing", self.telemetry.bandwidth_smoothing),
            ("min_bandwidth_factor", sim.min_bandwidth_factor),
            ("max_bandwidth_factor", sim.max_bandwidth_factor),
            ("latency_jitter_ms", sim.latency_jitter_ms),
            ("loss_jitter", sim.loss_jitter),
        ] {
            if !value.is_finite() {
                return Err(AbrError::configuration(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        if s.sustain_factor <= 0.0 || s.upgrade_factor <= 0.0 {
            return Err(AbrError::configuration(
                "selector bandwidth factors must be positive",
            ));
        }
        if s.upgrade_factor < s.sustain_factor {
            return Err(AbrError::configuration(format!(
                "upgrade_factor ({}) must not be below sustain_factor ({})",
                s.upgrade_factor, s.sustain_factor
            )));
        }
        if self.buffer.target_buffer_secs <= 0.0 {
            return Err(AbrError::configuration(
                "target_buffer_secs must be positive",
            ));
        }
        if self.buffer.starvation_threshold_secs < 0.0 {
            return Err(AbrError::configuration(
                "starvation_threshold_secs must not be negative",
            ));
        }
        if self.scheduler.network_interval_ms == 0 || self.scheduler.buffer_interval_ms == 0 {
            return Err(AbrError::configuration("tick intervals must be non-zero"));
        }
        if self.scheduler.event_channel_capacity == 0 {
            return Err(AbrError::configuration(
                "event_channel_capacity must be non-zero",
            ));
        }
        if self.fetcher.max_retries == 0 {
            return Err(AbrError::configuration(
                "max_retries must allow at least one attempt",
            ));
        }
        if self.telemetry.log_capacity == 0 || self.telemetry.buffer_event_capacity == 0 {
            return Err(AbrError::configuration("ring capacities must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.telemetry.bandwidth_smoothing) {
            return Err(AbrError::configuration(
                "bandwidth_smoothing must be within [0, 1]",
            ));
        }
        if sim.min_bandwidth_factor <= 0.0 || sim.max_bandwidth_factor < sim.min_bandwidth_factor
        {
            return Err(AbrError::configuration(
                "bandwidth factor range must be positive and ordered",
            ));
        }
        if sim.latency_jitter_ms < 0.0 || !(0.0..=1.0).contains(&sim.loss_jitter) {
            return Err(AbrError::configuration("jitter bounds out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let config = AbrConfig::default();
        assert_eq!(config.selector.sustain_factor, 0.8);
        assert_eq!(config.selector.upgrade_factor, 1.4);
        assert_eq!(config.selector.upgrade_buffer_ratio, 1.2);
        assert_eq!(config.buffer.starvation_threshold_secs, 5.0);
        assert_eq!(config.scheduler.network_interval(), Duration::from_secs(2));
        assert_eq!(config.scheduler.buffer_interval(), Duration::from_secs(1));
        assert_eq!(config.fetcher.max_retries, 3);
        assert_eq!(config.fetcher.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.telemetry.log_capacity, 50);
        assert_eq!(config.telemetry.buffer_event_capacity, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_hysteresis_is_rejected() {
        let mut config = AbrConfig::default();
        config.selector.upgrade_factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(AbrError::Configuration { .. })
        ));
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let mut config = AbrConfig::default();
        config.fetcher.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_finite_knobs_are_rejected() {
        let knobs: [fn(&mut AbrConfig); 6] = [
            |c| c.selector.sustain_factor = f64::NAN,
            |c| c.selector.upgrade_factor = f64::NAN,
            |c| c.buffer.target_buffer_secs = f64::INFINITY,
            |c| c.simulation.max_bandwidth_factor = f64::INFINITY,
            |c| c.simulation.latency_jitter_ms = f64::NAN,
            |c| c.simulation.loss_jitter = f64::NAN,
        ];
        for set in knobs {
            let mut config = AbrConfig::default();
            set(&mut config);
            assert!(matches!(
                config.validate(),
                Err(AbrError::Configuration { .. })
            ));
        }
    }
}
