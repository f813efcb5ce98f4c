// Playback Session: the per-playback control loop.
//
// One task owns every piece of mutable state (buffer model, selection, cursors,
// telemetry). Ticks, commands and fetch completions are serialized through a
// single `select!` loop, so no two selection decisions ever run concurrently.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info_span, trace};

use crate::buffer::{BufferHealth, BufferModel, BufferedRange};
use crate::config::AbrConfig;
use crate::error::{AbrError, Result};
use crate::fetch::{FetchedSegment, RetryNotice, SegmentFetcher};
use crate::manifest::{PlaylistResolver, QualityId, QualityLadder, SegmentRef};
use crate::network::{NetworkCondition, NetworkEstimator};
use crate::scheduler::{Tick, TickSource};
use crate::selector::{QualitySelector, QualitySwitch, SelectionState, SwitchReason};
use crate::telemetry::{LogEntry, PlayerMetrics, TelemetrySink};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Playback cursor and buffered ranges as reported by the player.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackPosition {
    pub cursor_secs: f64,
    pub ranges: Vec<BufferedRange>,
}

/// Read side of the player's playback telemetry.
pub trait PlaybackProbe: Send + Sync {
    fn position(&self) -> PlaybackPosition;
}

/// Playback telemetry the UI layer writes and the session reads.
#[derive(Debug, Default)]
pub struct SharedPlayback {
    inner: RwLock<PlaybackPosition>,
}

impl SharedPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, cursor_secs: f64, ranges: Vec<BufferedRange>) {
        *self.inner.write() = PlaybackPosition {
            cursor_secs,
            ranges,
        };
    }

    pub fn set_cursor(&self, cursor_secs: f64) {
        self.inner.write().cursor_secs = cursor_secs;
    }
}

impl PlaybackProbe for SharedPlayback {
    fn position(&self) -> PlaybackPosition {
        self.inner.read().clone()
    }
}

/// Something the UI layer may want to react to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    QualityChanged {
        switch: QualitySwitch,
        quality: QualityId,
    },
    SegmentLoaded {
        quality: usize,
        sequence: u64,
        uri: String,
        duration_secs: f64,
        payload: Bytes,
    },
    SegmentDropped {
        quality: usize,
        uri: String,
        reason: String,
    },
    /// The active quality has no more segments to fetch.
    EndOfStream { quality: usize },
}

/// Read-only view of the session, republished after every processed input.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub active_index: usize,
    pub active_quality: Option<QualityId>,
    pub manual_override: Option<usize>,
    pub network: Option<NetworkCondition>,
    pub buffer: BufferHealth,
    pub fetch_in_flight: bool,
    pub metrics: PlayerMetrics,
    /// General log, newest first
    pub logs: Vec<LogEntry>,
}

enum SessionCommand {
    SetOverride {
        index: Option<usize>,
        reply: oneshot::Sender<Result<()>>,
    },
}

enum FetchReport {
    Retry {
        generation: u64,
        uri: String,
        notice: RetryNotice,
    },
    Done {
        generation: u64,
        quality: usize,
        segment: SegmentRef,
        result: Result<FetchedSegment>,
    },
}

struct InFlight {
    generation: u64,
    quality: usize,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State of one playback. Built once, then driven by [`PlaybackSession::spawn`].
pub struct PlaybackSession {
    ladder: Arc<QualityLadder>,
    estimator: Arc<dyn NetworkEstimator>,
    fetcher: SegmentFetcher,
    probe: Arc<dyn PlaybackProbe>,
    selector: QualitySelector,
    buffer: BufferModel,
    selection: SelectionState,
    telemetry: TelemetrySink,
    event_capacity: usize,
    /// Next segment index per quality
    cursors: Vec<usize>,
    /// Qualities whose end of stream has already been reported
    ended: Vec<bool>,
    network: Option<NetworkCondition>,
    in_flight: Option<InFlight>,
    generation: u64,
    token: CancellationToken,
    pending: Vec<SessionEvent>,
    /// Set while the event queue is full; cleared by the next delivered event
    events_overflowing: bool,
}

impl PlaybackSession {
    pub fn new(
        config: AbrConfig,
        ladder: QualityLadder,
        estimator: Arc<dyn NetworkEstimator>,
        fetcher: SegmentFetcher,
        probe: Arc<dyn PlaybackProbe>,
    ) -> Result<Self> {
        config.validate()?;
        if ladder.is_empty() {
            return Err(AbrError::parse("quality ladder is empty"));
        }

        let len = ladder.len();
        let mut telemetry = TelemetrySink::new(&config.telemetry);
        telemetry.info(format!("Session started with {len} quality levels"));

        Ok(Self {
            ladder: Arc::new(ladder),
            estimator,
            fetcher,
            probe,
            selector: QualitySelector::new(config.selector),
            buffer: BufferModel::new(&config.buffer),
            selection: SelectionState::new(0),
            telemetry,
            event_capacity: config.scheduler.event_channel_capacity.max(1),
            cursors: vec![0; len],
            ended: vec![false; len],
            network: None,
            in_flight: None,
            generation: 0,
            token: CancellationToken::new(),
            pending: Vec::new(),
            events_overflowing: false,
        })
    }

    /// Build a session straight from a master playlist.
    ///
    /// Skipped renditions end up as warnings in the session log; a manifest
    /// without any usable rendition fails with [`AbrError::Parse`].
    pub fn from_manifest(
        config: AbrConfig,
        master_text: &str,
        resolver: &dyn PlaylistResolver,
        estimator: Arc<dyn NetworkEstimator>,
        fetcher: SegmentFetcher,
        probe: Arc<dyn PlaybackProbe>,
    ) -> Result<Self> {
        let load = QualityLadder::load(master_text, resolver)?;
        let mut session = Self::new(config, load.ladder, estimator, fetcher, probe)?;
        for warning in load.warnings {
            session.telemetry.warning(warning);
        }
        Ok(session)
    }

    pub fn ladder(&self) -> &Arc<QualityLadder> {
        &self.ladder
    }

    /// Start the control loop on the current runtime.
    pub fn spawn<T>(self, ticks: T) -> SessionHandle
    where
        T: TickSource + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(self.event_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(self.snapshot());
        let token = self.token.clone();
        let ladder = Arc::clone(&self.ladder);

        let span = info_span!("abr_session", levels = ladder.len());
        let task = tokio::spawn(
            self.run(Box::new(ticks), command_rx, event_tx, snapshot_tx)
                .instrument(span),
        );

        SessionHandle {
            commands: command_tx,
            events: event_rx,
            snapshot: snapshot_rx,
            ladder,
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            task,
        }
    }

    async fn run(
        mut self,
        mut ticks: Box<dyn TickSource>,
        mut commands: mpsc::Receiver<SessionCommand>,
        events: mpsc::Sender<SessionEvent>,
        snapshots: watch::Sender<SessionSnapshot>,
    ) -> PlayerMetrics {
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<FetchReport>();
        let token = self.token.clone();
        let mut ticks_open = true;

        self.sample_network();
        self.sample_buffer();
        self.reevaluate();

        loop {
            self.admit_fetch(&report_tx);
            self.deliver_events(&events);
            snapshots.send_replace(self.snapshot());

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                Some(report) = report_rx.recv() => self.handle_report(report),
                tick = ticks.next_tick(), if ticks_open => match tick {
                    Some(tick) => self.handle_tick(tick),
                    None => {
                        debug!("Tick source finished");
                        ticks_open = false;
                    }
                },
            }
        }

        // Teardown: the in-flight fetch is abandoned and its report never applied.
        self.cancel_in_flight();
        drop(report_rx);
        self.pending.clear();
        self.telemetry.info("Session stopped");
        snapshots.send_replace(self.snapshot());
        self.telemetry.metrics()
    }

    fn handle_tick(&mut self, tick: Tick) {
        trace!(?tick, "Tick");
        match tick {
            Tick::Network => self.sample_network(),
            Tick::Buffer => self.sample_buffer(),
        }
        self.reevaluate();
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SetOverride { index, reply } => {
                let result = self.selection.set_override(index, self.ladder.len());
                match (&result, index) {
                    (Ok(()), Some(index)) => {
                        self.telemetry
                            .info(format!("Manual quality override set to {index}"));
                    }
                    (Ok(()), None) => {
                        self.telemetry.info("Manual quality override cleared");
                    }
                    (Err(e), _) => {
                        self.telemetry.warning(format!("Rejected quality override: {e}"));
                    }
                }
                if result.is_ok() {
                    self.reevaluate();
                }
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
        }
    }

    fn handle_report(&mut self, report: FetchReport) {
        match report {
            FetchReport::Retry {
                generation,
                uri,
                notice,
            } => {
                if !self.is_current(generation) {
                    return;
                }
                self.telemetry.warning(format!(
                    "Retrying segment {uri} in {}ms (attempt {}/{}): {}",
                    notice.backoff.as_millis(),
                    notice.attempt,
                    notice.max_attempts,
                    notice.reason
                ));
            }
            FetchReport::Done {
                generation,
                quality,
                segment,
                result,
            } => {
                if !self.is_current(generation) {
                    debug!(generation, uri = %segment.uri, "Discarding stale fetch report");
                    return;
                }
                self.in_flight = None;
                self.complete_fetch(quality, segment, result);
                self.reevaluate();
            }
        }
    }

    fn complete_fetch(
        &mut self,
        quality: usize,
        segment: SegmentRef,
        result: Result<FetchedSegment>,
    ) {
        let Some(segment_count) = self.ladder.get(quality).map(|l| l.segments().len()) else {
            return;
        };

        match result {
            Ok(fetched) => {
                self.cursors[quality] += 1;
                self.buffer.credit(segment.duration_secs);
                self.telemetry.record_segment_loaded(fetched.payload.len());
                debug!(
                    quality,
                    sequence = segment.sequence,
                    attempts = fetched.attempts,
                    "Segment loaded"
                );
                self.pending.push(SessionEvent::SegmentLoaded {
                    quality,
                    sequence: segment.sequence,
                    uri: segment.uri,
                    duration_secs: segment.duration_secs,
                    payload: fetched.payload,
                });
            }
            Err(AbrError::Cancelled) => {}
            Err(e) if e.is_end_of_stream() => {
                self.telemetry.warning(format!(
                    "Segment {} not found, ending stream for quality {quality}",
                    segment.uri
                ));
                self.cursors[quality] = segment_count;
            }
            Err(e) => {
                self.cursors[quality] += 1;
                self.telemetry.record_dropped_segment();
                self.telemetry
                    .error(format!("Dropped segment {}: {e}", segment.uri));
                self.pending.push(SessionEvent::SegmentDropped {
                    quality,
                    uri: segment.uri,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn sample_network(&mut self) {
        let condition = self.estimator.sample();
        let average = self.telemetry.observe_network(&condition);
        trace!(
            bandwidth_bps = condition.bandwidth_bps,
            latency_ms = condition.latency_ms,
            loss = condition.packet_loss_ratio,
            average,
            "Network sampled"
        );
        self.network = Some(condition);
    }

    fn sample_buffer(&mut self) {
        let was_starving = self.buffer.health().is_starving;
        let position = self.probe.position();
        let health = self.buffer.update(position.cursor_secs, &position.ranges);
        if health.is_starving && !was_starving {
            self.telemetry.warning(format!(
                "Buffer starving: {:.1}s buffered at {:.1}s",
                health.current_buffer_secs, position.cursor_secs
            ));
        }
    }

    /// Run the selector against the latest state and apply any resulting switch.
    fn reevaluate(&mut self) {
        let current = self.selection.active_index();
        let target = match &self.network {
            Some(network) => self.selector.select(
                self.ladder.levels(),
                network,
                &self.buffer.health(),
                current,
            ),
            None => current,
        };
        if let Some(switch) = self.selection.transition(target, self.ladder.len()) {
            self.apply_switch(switch);
        }
    }

    fn apply_switch(&mut self, switch: QualitySwitch) {
        let (Some(from), Some(to)) = (self.ladder.get(switch.from), self.ladder.get(switch.to))
        else {
            return;
        };
        let reason = match switch.reason {
            SwitchReason::Automatic => "automatic",
            SwitchReason::ManualOverride => "manual override",
        };
        let message = format!(
            "Quality switched from {} @ {} bps to {} @ {} bps ({reason})",
            from.resolution(),
            from.bandwidth_bps(),
            to.resolution(),
            to.bandwidth_bps()
        );
        let quality = to.id().clone();

        self.telemetry.record_switch(switch.to);
        self.telemetry.info(message);
        self.cancel_in_flight();
        self.pending
            .push(SessionEvent::QualityChanged { switch, quality });
    }

    /// Start the next fetch for the active quality when the single slot is free
    /// and the buffer is below target.
    fn admit_fetch(&mut self, reports: &mpsc::UnboundedSender<FetchReport>) {
        if self.in_flight.is_some() || !self.buffer.health().below_target() {
            return;
        }
        let Some(network) = self.network else {
            return;
        };
        let quality = self.selection.active_index();
        let Some(level) = self.ladder.get(quality) else {
            return;
        };

        let Some(segment) = level.segments().get(self.cursors[quality]).cloned() else {
            if !self.ended[quality] {
                self.ended[quality] = true;
                self.telemetry
                    .info(format!("End of stream reached for {}", level.id()));
                self.pending.push(SessionEvent::EndOfStream { quality });
            }
            return;
        };

        self.generation += 1;
        let generation = self.generation;
        let token = self.token.child_token();
        let fetcher = self.fetcher.clone();
        let reports = reports.clone();
        let fetch_token = token.clone();

        trace!(generation, quality, uri = %segment.uri, "Starting fetch");
        let handle = tokio::spawn(async move {
            let retry_reports = reports.clone();
            let uri = segment.uri.clone();
            let result = fetcher
                .fetch_segment_with(&segment, &network, &fetch_token, |notice| {
                    let _ = retry_reports.send(FetchReport::Retry {
                        generation,
                        uri: uri.clone(),
                        notice,
                    });
                })
                .await;
            // The session may already be gone.
            let _ = reports.send(FetchReport::Done {
                generation,
                quality,
                segment,
                result,
            });
        });

        self.in_flight = Some(InFlight {
            generation,
            quality,
            token,
            handle,
        });
    }

    fn cancel_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            debug!(
                generation = in_flight.generation,
                quality = in_flight.quality,
                "Cancelling in-flight fetch"
            );
            in_flight.token.cancel();
            in_flight.handle.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
    }

    /// Hand queued events to the UI layer without waiting on it.
    ///
    /// Events that do not fit into the queue are dropped; the snapshot still
    /// carries the state they described.
    fn deliver_events(&mut self, events: &mpsc::Sender<SessionEvent>) {
        for event in std::mem::take(&mut self.pending) {
            match events.try_send(event) {
                Ok(()) => self.events_overflowing = false,
                Err(TrySendError::Full(_)) => {
                    if !self.events_overflowing {
                        self.events_overflowing = true;
                        self.telemetry.warning(format!(
                            "Event queue full (capacity {}), dropping session events",
                            events.max_capacity()
                        ));
                    } else {
                        trace!("Event queue still full, event dropped");
                    }
                }
                Err(TrySendError::Closed(_)) => trace!("Event receiver dropped"),
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let active_index = self.selection.active_index();
        SessionSnapshot {
            active_index,
            active_quality: self.ladder.get(active_index).map(|l| l.id().clone()),
            manual_override: self.selection.manual_override(),
            network: self.network,
            buffer: self.buffer.health(),
            fetch_in_flight: self.in_flight.is_some(),
            metrics: self.telemetry.metrics(),
            logs: self.telemetry.logs(),
        }
    }
}

/// Control surface of a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
    ladder: Arc<QualityLadder>,
    token: CancellationToken,
    /// Stops the session when the handle is dropped without `shutdown`
    _cancel_on_drop: DropGuard,
    task: JoinHandle<PlayerMetrics>,
}

impl SessionHandle {
    pub fn ladder(&self) -> &QualityLadder {
        &self.ladder
    }

    /// Pin the session to `index`, or hand control back to the selector with `None`.
    pub async fn set_override(&self, index: Option<usize>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::SetOverride { index, reply })
            .await
            .map_err(|_| AbrError::SessionClosed)?;
        response.await.map_err(|_| AbrError::SessionClosed)?
    }

    /// Next event, or `None` once the session has stopped and the queue is drained.
    ///
    /// The session never waits for this queue: while it is full, new events are
    /// dropped and a warning is logged.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that is notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and return its final metrics.
    pub async fn shutdown(self) -> Result<PlayerMetrics> {
        self.token.cancel();
        self.task.await.map_err(|e| {
            error!(error = %e, "Session task failed");
            AbrError::SessionClosed
        })
    }
}
