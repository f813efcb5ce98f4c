use serde::Serialize;

use crate::config::BufferConfig;

/// A contiguous buffered time range reported by the player, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferHealth {
    pub current_buffer_secs: f64,
    pub target_buffer_secs: f64,
    pub is_starving: bool,
}

impl BufferHealth {
    /// Current buffered seconds relative to the target.
    pub fn buffer_ratio(&self) -> f64 {
        if self.target_buffer_secs > 0.0 {
            self.current_buffer_secs / self.target_buffer_secs
        } else {
            0.0
        }
    }

    pub fn below_target(&self) -> bool {
        self.current_buffer_secs < self.target_buffer_secs
    }
}

/// Tracks how much playable media is buffered ahead of the play cursor.
#[derive(Debug, Clone)]
pub struct BufferModel {
    target_buffer_secs: f64,
    starvation_threshold_secs: f64,
    health: BufferHealth,
}

impl BufferModel {
    pub fn new(config: &BufferConfig) -> Self {
        let target = config.target_buffer_secs;
        let threshold = config.starvation_threshold_secs;
        Self {
            target_buffer_secs: target,
            starvation_threshold_secs: threshold,
            health: BufferHealth {
                current_buffer_secs: 0.0,
                target_buffer_secs: target,
                is_starving: 0.0 < threshold,
            },
        }
    }

    /// Recompute health from playback telemetry.
    ///
    /// The buffer is the distance from the cursor to the end of the range that
    /// contains it, or zero when the cursor sits in no buffered range.
    pub fn update(&mut self, cursor_secs: f64, ranges: &[BufferedRange]) -> BufferHealth {
        let current = ranges
            .iter()
            .find(|range| range.contains(cursor_secs))
            .map(|range| (range.end - cursor_secs).max(0.0))
            .unwrap_or(0.0);
        self.set_current(current)
    }

    /// Credit a freshly loaded segment to the expected buffer until the next
    /// telemetry update replaces the estimate.
    pub fn credit(&mut self, duration_secs: f64) -> BufferHealth {
        let current = self.health.current_buffer_secs + duration_secs.max(0.0);
        self.set_current(current)
    }

    pub fn health(&self) -> BufferHealth {
        self.health
    }

    fn set_current(&mut self, current: f64) -> BufferHealth {
        self.health = BufferHealth {
            current_buffer_secs: current,
            target_buffer_secs: self.target_buffer_secs,
            is_starving: current < self.starvation_threshold_secs,
        };
        self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> BufferModel {
        BufferModel::new(&BufferConfig::default())
    }

    #[test]
    fn buffer_is_distance_to_end_of_containing_range() {
        let mut model = model();
        let ranges = [BufferedRange::new(0.0, 4.0), BufferedRange::new(10.0, 42.0)];
        let health = model.update(12.0, &ranges);
        assert_eq!(health.current_buffer_secs, 30.0);
        assert_eq!(health.target_buffer_secs, 30.0);
        assert!(!health.is_starving);
        assert!((health.buffer_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cursor_outside_ranges_means_empty_buffer() {
        let mut model = model();
        let health = model.update(6.0, &[BufferedRange::new(0.0, 4.0)]);
        assert_eq!(health.current_buffer_secs, 0.0);
        assert!(health.is_starving);

        let health = model.update(0.0, &[]);
        assert_eq!(health.current_buffer_secs, 0.0);
    }

    #[test]
    fn starvation_threshold_is_strict() {
        let mut model = model();
        assert!(model.update(0.0, &[BufferedRange::new(0.0, 4.99)]).is_starving);
        assert!(!model.update(0.0, &[BufferedRange::new(0.0, 5.0)]).is_starving);
    }

    #[test]
    fn credit_accumulates_until_next_update() {
        let mut model = model();
        model.update(0.0, &[BufferedRange::new(0.0, 2.0)]);
        let health = model.credit(4.0);
        assert_eq!(health.current_buffer_secs, 6.0);
        assert!(!health.is_starving);

        let health = model.update(1.0, &[BufferedRange::new(0.0, 2.0)]);
        assert_eq!(health.current_buffer_secs, 1.0);
        assert!(health.is_starving);
    }
}
