// Telemetry Sink: bounded event logs and derived player metrics.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::TelemetryConfig;
use crate::network::NetworkCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    /// Offset from the creation of the sink
    pub timestamp: Duration,
    pub severity: Severity,
    pub message: String,
}

/// Fixed-capacity FIFO. Pushing into a full ring evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, returning the evicted one when the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items in append order, oldest first.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Items newest first.
    pub fn recent(&self) -> Vec<T> {
        self.items.iter().rev().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerMetrics {
    pub current_quality_index: usize,
    pub rolling_average_bandwidth: f64,
    pub dropped_segment_count: u64,
    pub quality_switch_count: u64,
    pub segments_loaded: u64,
    pub bytes_loaded: u64,
    /// Warning and error events, newest first
    pub recent_buffer_events: Vec<LogEntry>,
}

/// Owner of the session's log rings and counters.
///
/// Nothing else mutates the rings; every write goes through [`TelemetrySink::record`].
#[derive(Debug)]
pub struct TelemetrySink {
    log: RingBuffer<LogEntry>,
    buffer_events: RingBuffer<LogEntry>,
    next_id: u64,
    started: Instant,
    smoothing: f64,
    rolling_average_bandwidth: f64,
    current_quality_index: usize,
    dropped_segment_count: u64,
    quality_switch_count: u64,
    segments_loaded: u64,
    bytes_loaded: u64,
}

impl TelemetrySink {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            log: RingBuffer::new(config.log_capacity),
            buffer_events: RingBuffer::new(config.buffer_event_capacity),
            next_id: 0,
            started: Instant::now(),
            smoothing: config.bandwidth_smoothing,
            rolling_average_bandwidth: 0.0,
            current_quality_index: 0,
            dropped_segment_count: 0,
            quality_switch_count: 0,
            segments_loaded: 0,
            bytes_loaded: 0,
        }
    }

    /// Append an entry to the log; warnings and errors also land in the
    /// buffer-event ring. Returns the entry id.
    pub fn record(&mut self, severity: Severity, message: impl Into<String>) -> u64 {
        let message = message.into();
        let id = self.next_id;
        self.next_id += 1;

        match severity {
            Severity::Info => info!(entry_id = id, "{message}"),
            Severity::Warning => warn!(entry_id = id, "{message}"),
            Severity::Error => error!(entry_id = id, "{message}"),
        }

        let entry = LogEntry {
            id,
            timestamp: self.started.elapsed(),
            severity,
            message,
        };
        if severity >= Severity::Warning {
            self.buffer_events.push(entry.clone());
        }
        self.log.push(entry);
        id
    }

    pub fn info(&mut self, message: impl Into<String>) -> u64 {
        self.record(Severity::Info, message)
    }

    pub fn warning(&mut self, message: impl Into<String>) -> u64 {
        self.record(Severity::Warning, message)
    }

    pub fn error(&mut self, message: impl Into<String>) -> u64 {
        self.record(Severity::Error, message)
    }

    /// Fold a network sample into the rolling bandwidth average.
    pub fn observe_network(&mut self, condition: &NetworkCondition) -> f64 {
        self.rolling_average_bandwidth = self.rolling_average_bandwidth * (1.0 - self.smoothing)
            + condition.bandwidth_bps as f64 * self.smoothing;
        self.rolling_average_bandwidth
    }

    pub fn record_switch(&mut self, to: usize) {
        self.quality_switch_count += 1;
        self.current_quality_index = to;
    }

    pub fn record_dropped_segment(&mut self) {
        self.dropped_segment_count += 1;
    }

    pub fn record_segment_loaded(&mut self, bytes: usize) {
        self.segments_loaded += 1;
        self.bytes_loaded += bytes as u64;
    }

    /// General log, newest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.log.recent()
    }

    /// Warning and error events, newest first.
    pub fn buffer_events(&self) -> Vec<LogEntry> {
        self.buffer_events.recent()
    }

    pub fn log_ring(&self) -> &RingBuffer<LogEntry> {
        &self.log
    }

    pub fn buffer_event_ring(&self) -> &RingBuffer<LogEntry> {
        &self.buffer_events
    }

    pub fn metrics(&self) -> PlayerMetrics {
        PlayerMetrics {
            current_quality_index: self.current_quality_index,
            rolling_average_bandwidth: self.rolling_average_bandwidth,
            dropped_segment_count: self.dropped_segment_count,
            quality_switch_count: self.quality_switch_count,
            segments_loaded: self.segments_loaded,
            bytes_loaded: self.bytes_loaded,
            recent_buffer_events: self.buffer_events.recent(),
        }
    }
}
