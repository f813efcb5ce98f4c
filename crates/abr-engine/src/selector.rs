// Quality Selector: the hysteresis-based ABR decision.
//
// Downgrades need only `sustain_factor` headroom and react immediately, upgrades
// need `upgrade_factor` headroom plus a buffer surplus. The gap between the two
// thresholds keeps the active quality from oscillating.

use serde::Serialize;
use tracing::trace;

use crate::buffer::BufferHealth;
use crate::config::SelectorConfig;
use crate::error::{AbrError, Result};
use crate::manifest::QualityLevel;
use crate::network::NetworkCondition;

#[derive(Debug, Clone, Default)]
pub struct QualitySelector {
    config: SelectorConfig,
}

impl QualitySelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Enough bandwidth to keep playing `level` once selected.
    pub fn can_sustain(&self, available_bps: f64, level: &QualityLevel) -> bool {
        available_bps > level.bandwidth_bps() as f64 * self.config.sustain_factor
    }

    /// Enough bandwidth to commit to `level` from a lower tier.
    pub fn can_upgrade(&self, available_bps: f64, level: &QualityLevel) -> bool {
        available_bps > level.bandwidth_bps() as f64 * self.config.upgrade_factor
    }

    /// Pick the quality index to fetch next.
    ///
    /// Pure in its inputs: the same ladder, network, buffer and current index
    /// always produce the same result. `current_index` is clamped into the
    /// ladder; an empty ladder yields 0.
    pub fn select(
        &self,
        ladder: &[QualityLevel],
        network: &NetworkCondition,
        buffer: &BufferHealth,
        current_index: usize,
    ) -> usize {
        if ladder.is_empty() {
            return 0;
        }
        let current = current_index.min(ladder.len() - 1);

        let available = network.available_bandwidth();
        let buffer_ratio = buffer.buffer_ratio();

        // Starvation recovery steps down one tier per decision, never straight to the floor.
        if buffer.is_starving && current > 0 {
            trace!(current, "Emergency downgrade on starving buffer");
            return current - 1;
        }

        for (i, level) in ladder.iter().enumerate().rev() {
            if i == current && self.can_sustain(available, level) {
                return i;
            }
            if i > current
                && self.can_upgrade(available, level)
                && buffer_ratio > self.config.upgrade_buffer_ratio
            {
                return i;
            }
            if i < current && self.can_sustain(available, level) {
                return i;
            }
        }

        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    Automatic,
    ManualOverride,
}

/// An observable change of the active quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualitySwitch {
    pub from: usize,
    pub to: usize,
    pub reason: SwitchReason,
}

/// Active quality plus the optional manual override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionState {
    active_index: usize,
    manual_override: Option<usize>,
}

impl SelectionState {
    pub fn new(active_index: usize) -> Self {
        Self {
            active_index,
            manual_override: None,
        }
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn manual_override(&self) -> Option<usize> {
        self.manual_override
    }

    /// Set or clear the manual override. The index must exist in the ladder.
    pub fn set_override(&mut self, index: Option<usize>, ladder_len: usize) -> Result<()> {
        if let Some(index) = index
            && index >= ladder_len
        {
            return Err(AbrError::InvalidOverride {
                index,
                len: ladder_len,
            });
        }
        self.manual_override = index;
        Ok(())
    }

    /// Move to `target`, unless an override is set, in which case the override wins.
    ///
    /// Returns the switch when the active index actually changes.
    pub fn transition(&mut self, target: usize, ladder_len: usize) -> Option<QualitySwitch> {
        if ladder_len == 0 {
            return None;
        }
        let (target, reason) = match self.manual_override {
            Some(index) => (index, SwitchReason::ManualOverride),
            None => (target, SwitchReason::Automatic),
        };
        let target = target.min(ladder_len - 1);
        if target == self.active_index {
            return None;
        }

        let switch = QualitySwitch {
            from: self.active_index,
            to: target,
            reason,
        };
        self.active_index = target;
        Some(switch)
    }
}
