use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use abr_engine::{
    AbrConfig, BufferedRange, FaultPolicy, IntervalTicks, MeasuredEstimator, NetworkCondition,
    NetworkEstimator, NetworkTier, PlaybackSession, QualitySwitch, SegmentFetcher, SegmentRef,
    SegmentTransport, SessionEvent, SharedPlayback, SimulatedEstimator, SimulatedTransport,
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::open_master;
use crate::cli::OutputFormat;
use crate::error::{AppError, Result};
use crate::output::{SimulationSummary, render};

/// How often the simulated player advances its playhead.
const PLAYER_TICK: Duration = Duration::from_millis(250);
/// Recent log lines carried into the summary.
const SUMMARY_LOG_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub duration: Duration,
    pub seed: Option<u64>,
    pub fault_rate: f64,
    pub tier: Option<NetworkTier>,
    pub measured: bool,
    pub override_index: Option<usize>,
    pub output: OutputFormat,
}

impl SimulateOptions {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fault_rate) {
            return Err(AppError::InvalidInput(format!(
                "fault rate must be within [0, 1], got {}",
                self.fault_rate
            )));
        }
        if self.duration.is_zero() {
            return Err(AppError::InvalidInput(
                "duration must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Derive an independent seed per random source so one `--seed` replays the whole run.
    fn seed_for(&self, stream: u64) -> Option<u64> {
        self.seed
            .map(|seed| seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

/// Transport whose link condition is drawn independently of what the session believes.
///
/// Used with the measured estimator, which must learn the link from transfer timings.
struct ShapedTransport {
    inner: SimulatedTransport,
    link: SimulatedEstimator,
}

#[async_trait]
impl SegmentTransport for ShapedTransport {
    async fn fetch(
        &self,
        segment: &SegmentRef,
        _believed: &NetworkCondition,
    ) -> abr_engine::Result<Bytes> {
        let actual = self.link.sample();
        self.inner.fetch(segment, &actual).await
    }
}

fn simulated_estimator(
    config: &AbrConfig,
    options: &SimulateOptions,
    stream: u64,
) -> SimulatedEstimator {
    let estimator = match options.seed_for(stream) {
        Some(seed) => SimulatedEstimator::seeded(config.simulation.clone(), seed),
        None => SimulatedEstimator::new(config.simulation.clone()),
    };
    match options.tier {
        Some(tier) => estimator.pinned(tier),
        None => estimator,
    }
}

fn simulated_transport(config: &AbrConfig, options: &SimulateOptions) -> SimulatedTransport {
    let policy = FaultPolicy::Probability(options.fault_rate);
    match options.seed_for(1) {
        Some(seed) => SimulatedTransport::seeded(&config.simulation, policy, seed),
        None => SimulatedTransport::new(&config.simulation, policy),
    }
}

/// Playhead of the simulated player.
#[derive(Debug, Default)]
struct Player {
    position_secs: f64,
    buffered_end_secs: f64,
    stalled_secs: f64,
    end_of_stream: bool,
    switches: Vec<QualitySwitch>,
}

impl Player {
    fn on_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SegmentLoaded {
                quality,
                sequence,
                duration_secs,
                ..
            } => {
                self.buffered_end_secs += duration_secs;
                debug!(
                    quality,
                    sequence,
                    buffered_end = self.buffered_end_secs,
                    "Segment appended"
                );
            }
            SessionEvent::QualityChanged { switch, quality } => {
                info!(from = switch.from, to = switch.to, %quality, "Quality changed");
                self.switches.push(switch);
            }
            SessionEvent::SegmentDropped { uri, reason, .. } => {
                warn!(%uri, %reason, "Segment dropped");
            }
            SessionEvent::EndOfStream { quality } => {
                info!(quality, "End of stream");
                self.end_of_stream = true;
            }
        }
    }

    fn advance(&mut self, elapsed: Duration) {
        let step = elapsed.as_secs_f64();
        let available = (self.buffered_end_secs - self.position_secs).max(0.0);
        let played = step.min(available);
        self.position_secs += played;
        if !self.end_of_stream {
            self.stalled_secs += step - played;
        }
    }

    fn finished(&self) -> bool {
        self.end_of_stream && self.position_secs >= self.buffered_end_secs
    }
}

pub async fn simulate(config: AbrConfig, master: &Path, options: SimulateOptions) -> Result<()> {
    options.validate()?;
    let (text, resolver) = open_master(master)?;

    let fallback = options.tier.unwrap_or(NetworkTier::Fair).baseline();
    let transport = simulated_transport(&config, &options);
    let (estimator, fetcher): (Arc<dyn NetworkEstimator>, SegmentFetcher) = if options.measured {
        let measured = Arc::new(MeasuredEstimator::new(fallback));
        let shaped = ShapedTransport {
            inner: transport,
            link: simulated_estimator(&config, &options, 2),
        };
        let fetcher = SegmentFetcher::new(Arc::new(shaped), config.fetcher.clone())
            .with_observer(measured.clone());
        (measured as Arc<dyn NetworkEstimator>, fetcher)
    } else {
        let fetcher = SegmentFetcher::new(Arc::new(transport), config.fetcher.clone());
        let estimator = Arc::new(simulated_estimator(&config, &options, 0));
        (estimator as Arc<dyn NetworkEstimator>, fetcher)
    };

    let playback = Arc::new(SharedPlayback::new());
    let ticks = IntervalTicks::from_config(&config.scheduler);
    let session = PlaybackSession::from_manifest(
        config,
        &text,
        &resolver,
        estimator,
        fetcher,
        playback.clone(),
    )?;
    info!(
        levels = session.ladder().len(),
        measured = options.measured,
        seed = ?options.seed,
        "Starting simulated playback"
    );

    let mut handle = session.spawn(ticks);
    if let Some(index) = options.override_index {
        handle.set_override(Some(index)).await?;
    }

    let mut player = Player::default();
    let deadline = tokio::time::sleep(options.duration);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(PLAYER_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut ctrl_c => {
                warn!("Interrupted, stopping playback");
                break;
            }
            event = handle.next_event() => match event {
                Some(event) => player.on_event(event),
                None => break,
            },
            _ = tick.tick() => {
                let now = Instant::now();
                player.advance(now - last_tick);
                last_tick = now;
                playback.update(
                    player.position_secs,
                    vec![BufferedRange::new(0.0, player.buffered_end_secs)],
                );
                if player.finished() {
                    info!("Playback finished");
                    break;
                }
            }
        }
    }

    let snapshot = handle.snapshot();
    let metrics = handle.shutdown().await?;
    let summary = SimulationSummary {
        seed: options.seed,
        requested_secs: options.duration.as_secs_f64(),
        played_secs: player.position_secs,
        stalled_secs: player.stalled_secs,
        end_of_stream: player.end_of_stream,
        final_index: snapshot.active_index,
        final_quality: snapshot.active_quality,
        switches: player.switches,
        metrics,
        recent_logs: snapshot.logs.into_iter().take(SUMMARY_LOG_LINES).collect(),
    };
    println!("{}", render(&summary, options.output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SimulateOptions {
        SimulateOptions {
            duration: Duration::from_secs(5),
            seed: Some(7),
            fault_rate: 0.0,
            tier: None,
            measured: false,
            override_index: None,
            output: OutputFormat::Json,
        }
    }

    #[test]
    fn fault_rate_outside_unit_interval_is_rejected() {
        let mut opts = options();
        opts.fault_rate = 1.5;
        assert!(matches!(opts.validate(), Err(AppError::InvalidInput(_))));
        opts.fault_rate = f64::NAN;
        assert!(opts.validate().is_err());
        opts.fault_rate = 1.0;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn seeds_differ_per_stream() {
        let opts = options();
        assert_ne!(opts.seed_for(0), opts.seed_for(1));
        assert_eq!(opts.seed_for(2), options().seed_for(2));
        assert_eq!(SimulateOptions { seed: None, ..opts }.seed_for(0), None);
    }

    #[test]
    fn player_stalls_without_buffer() {
        let mut player = Player::default();
        player.advance(Duration::from_secs(1));
        assert_eq!(player.stalled_secs, 1.0);

        player.on_event(SessionEvent::SegmentLoaded {
            quality: 0,
            sequence: 0,
            uri: "a.ts".to_string(),
            duration_secs: 4.0,
            payload: Bytes::new(),
        });
        player.advance(Duration::from_secs(3));
        assert_eq!(player.position_secs, 3.0);
        player.advance(Duration::from_secs(2));
        assert_eq!(player.position_secs, 4.0);
        assert_eq!(player.stalled_secs, 2.0);
    }

    #[test]
    fn player_finishes_after_draining_final_segment() {
        let mut player = Player::default();
        player.on_event(SessionEvent::SegmentLoaded {
            quality: 0,
            sequence: 0,
            uri: "a.ts".to_string(),
            duration_secs: 2.0,
            payload: Bytes::new(),
        });
        player.on_event(SessionEvent::EndOfStream { quality: 0 });
        assert!(!player.finished());
        player.advance(Duration::from_secs(5));
        assert!(player.finished());
        assert_eq!(player.stalled_secs, 0.0);
    }
}
