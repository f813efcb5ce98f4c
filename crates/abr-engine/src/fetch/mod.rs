// Segment Fetch Pipeline: drives segment retrieval through the retry state machine.
//
// The transport is a trait so the session can run against a simulated network,
// a recorded one in tests, or anything else that produces bytes for a segment.

mod attempt;
mod simulated;

pub use attempt::{FetchAttempt, FetchState};
pub use simulated::{FaultPolicy, SimulatedTransport};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::FetcherConfig;
use crate::error::{AbrError, Result};
use crate::manifest::SegmentRef;
use crate::network::{NetworkCondition, TransferObserver, TransferSample};

/// Retrieves the bytes of one segment in one attempt.
#[async_trait]
pub trait SegmentTransport: Send + Sync {
    async fn fetch(&self, segment: &SegmentRef, network: &NetworkCondition) -> Result<Bytes>;
}

/// A segment that made it through the pipeline.
#[derive(Debug, Clone)]
pub struct FetchedSegment {
    pub payload: Bytes,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Emitted when a failed attempt is about to be retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// Number of the attempt that just failed, starting at 1
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub reason: String,
}

#[derive(Clone)]
pub struct SegmentFetcher {
    transport: Arc<dyn SegmentTransport>,
    config: FetcherConfig,
    observer: Option<Arc<dyn TransferObserver>>,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn SegmentTransport>, config: FetcherConfig) -> Self {
        Self {
            transport,
            config,
            observer: None,
        }
    }

    /// Report every attempt's timing to `observer`, e.g. a measured estimator.
    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch `segment`, retrying transient failures with exponential backoff.
    ///
    /// Fails with [`AbrError::Cancelled`] as soon as `token` fires, with the
    /// transport's error for non-retryable failures, and with
    /// [`AbrError::RetriesExhausted`] once the attempt budget is spent.
    pub async fn fetch_segment(
        &self,
        segment: &SegmentRef,
        network: &NetworkCondition,
        token: &CancellationToken,
    ) -> Result<FetchedSegment> {
        self.fetch_segment_with(segment, network, token, |_| {}).await
    }

    /// Like [`SegmentFetcher::fetch_segment`], calling `on_retry` before each backoff.
    pub async fn fetch_segment_with<F>(
        &self,
        segment: &SegmentRef,
        network: &NetworkCondition,
        token: &CancellationToken,
        mut on_retry: F,
    ) -> Result<FetchedSegment>
    where
        F: FnMut(RetryNotice) + Send,
    {
        let mut machine = FetchAttempt::new(&self.config);
        let started = Instant::now();

        while let Some(attempt) = machine.begin_attempt() {
            if token.is_cancelled() {
                return Err(AbrError::Cancelled);
            }

            let attempt_started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AbrError::Cancelled),
                outcome = self.transport.fetch(segment, network) => outcome,
            };
            let attempt_elapsed = attempt_started.elapsed();

            match outcome {
                Ok(payload) => {
                    self.observe(payload.len() as u64, attempt_elapsed, true);
                    machine.record_success();
                    debug!(
                        uri = %segment.uri,
                        attempt = attempt + 1,
                        bytes = payload.len(),
                        "Segment fetched"
                    );
                    return Ok(FetchedSegment {
                        payload,
                        attempts: attempt + 1,
                        elapsed: started.elapsed(),
                    });
                }
                Err(err) => {
                    self.observe(0, attempt_elapsed, false);
                    let FetchState::Retry { backoff, .. } = machine.record_failure(err) else {
                        continue;
                    };
                    let reason = machine
                        .last_error()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    warn!(
                        uri = %segment.uri,
                        attempt = attempt + 1,
                        max = machine.max_attempts(),
                        delay_ms = backoff.as_millis() as u64,
                        error = %reason,
                        "Retrying segment after transient error"
                    );
                    on_retry(RetryNotice {
                        attempt: attempt + 1,
                        max_attempts: machine.max_attempts(),
                        backoff,
                        reason,
                    });
                    tokio::select! {
                        _ = token.cancelled() => return Err(AbrError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        Err(machine.into_error(&segment.uri))
    }

    fn observe(&self, bytes: u64, elapsed: Duration, success: bool) {
        if let Some(observer) = &self.observer {
            observer.on_transfer(TransferSample {
                bytes,
                elapsed,
                success,
            });
        }
    }
}
