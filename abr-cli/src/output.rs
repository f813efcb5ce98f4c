use std::fmt::Write as _;

use abr_engine::{LadderLoad, LogEntry, PlayerMetrics, QualityId, QualitySwitch};
use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::Result;

/// Something the CLI prints either for humans or as JSON.
pub trait Report: Serialize {
    fn pretty(&self) -> String;
}

pub fn render<R: Report>(report: &R, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Pretty => report.pretty(),
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::JsonCompact => serde_json::to_string(report)?,
    })
}

#[derive(Debug, Serialize)]
pub struct LevelReport {
    pub index: usize,
    pub id: QualityId,
    pub resolution: String,
    pub bandwidth_bps: u64,
    pub playlist: String,
    pub segments: usize,
    pub duration_secs: f64,
}

#[derive(Debug, Serialize)]
pub struct LadderReport {
    pub levels: Vec<LevelReport>,
    pub warnings: Vec<String>,
}

impl LadderReport {
    pub fn from_load(load: &LadderLoad) -> Self {
        let levels = load
            .ladder
            .iter()
            .enumerate()
            .map(|(index, level)| LevelReport {
                index,
                id: level.id().clone(),
                resolution: level.resolution().to_string(),
                bandwidth_bps: level.bandwidth_bps(),
                playlist: level.playlist_ref().to_string(),
                segments: level.segments().len(),
                duration_secs: level.segments().iter().map(|s| s.duration_secs).sum(),
            })
            .collect();
        Self {
            levels,
            warnings: load.warnings.clone(),
        }
    }
}

impl Report for LadderReport {
    fn pretty(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Quality ladder ({} levels)", self.levels.len());
        for level in &self.levels {
            let _ = writeln!(
                out,
                "  [{}] {:>10} {:>9} kbps  {:>4} segments  {:>7.1}s  {}",
                level.index,
                level.resolution,
                level.bandwidth_bps / 1000,
                level.segments,
                level.duration_secs,
                level.playlist
            );
        }
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "Warnings:");
            for warning in &self.warnings {
                let _ = writeln!(out, "  - {warning}");
            }
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub seed: Option<u64>,
    pub requested_secs: f64,
    pub played_secs: f64,
    pub stalled_secs: f64,
    pub end_of_stream: bool,
    pub final_index: usize,
    pub final_quality: Option<QualityId>,
    pub switches: Vec<QualitySwitch>,
    pub metrics: PlayerMetrics,
    /// Newest first
    pub recent_logs: Vec<LogEntry>,
}

impl Report for SimulationSummary {
    fn pretty(&self) -> String {
        let mut out = String::new();
        let m = &self.metrics;
        let _ = writeln!(out, "Simulation summary");
        if let Some(seed) = self.seed {
            let _ = writeln!(out, "  seed:              {seed}");
        }
        let _ = writeln!(
            out,
            "  played:            {:.1}s of {:.1}s ({:.1}s stalled)",
            self.played_secs, self.requested_secs, self.stalled_secs
        );
        let quality = self
            .final_quality
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "  final quality:     [{}] {quality}", self.final_index);
        let _ = writeln!(out, "  quality switches:  {}", m.quality_switch_count);
        let _ = writeln!(
            out,
            "  segments loaded:   {} ({} bytes)",
            m.segments_loaded, m.bytes_loaded
        );
        let _ = writeln!(out, "  segments dropped:  {}", m.dropped_segment_count);
        let _ = writeln!(
            out,
            "  avg bandwidth:     {:.0} kbps",
            m.rolling_average_bandwidth / 1000.0
        );
        let _ = writeln!(out, "  end of stream:     {}", self.end_of_stream);

        if !self.switches.is_empty() {
            let _ = writeln!(out, "Switches:");
            for switch in &self.switches {
                let _ = writeln!(
                    out,
                    "  {} -> {} ({:?})",
                    switch.from, switch.to, switch.reason
                );
            }
        }
        if !m.recent_buffer_events.is_empty() {
            let _ = writeln!(out, "Recent buffer events:");
            for event in m.recent_buffer_events.iter().take(10) {
                let _ = writeln!(
                    out,
                    "  {:>8.2}s {:<7} {}",
                    event.timestamp.as_secs_f64(),
                    event.severity,
                    event.message
                );
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abr_engine::{InMemoryPlaylists, QualityLadder};

    fn load() -> LadderLoad {
        let master = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1400000,RESOLUTION=842x480
480p.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
360p.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720
missing.m3u8
";
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\na.ts\n#EXTINF:2.5,\nb.ts\n#EXT-X-ENDLIST\n";
        let resolver = InMemoryPlaylists::new()
            .with("360p.m3u8", media)
            .with("480p.m3u8", media);
        QualityLadder::load(master, &resolver).unwrap()
    }

    #[test]
    fn ladder_report_lists_levels_in_ladder_order() {
        let report = LadderReport::from_load(&load());
        assert_eq!(report.levels.len(), 2);
        assert_eq!(report.levels[0].resolution, "640x360");
        assert_eq!(report.levels[1].id.as_str(), "1400000@842x480");
        assert_eq!(report.levels[0].duration_secs, 6.5);
        assert_eq!(report.warnings.len(), 1);

        let pretty = render(&report, OutputFormat::Pretty).unwrap();
        assert!(pretty.starts_with("Quality ladder (2 levels)"));
        assert!(pretty.contains("missing.m3u8"));
    }

    #[test]
    fn json_output_is_machine_readable() {
        let report = LadderReport::from_load(&load());
        let json = render(&report, OutputFormat::JsonCompact).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["levels"][1]["bandwidth_bps"], 1_400_000);
        assert!(!json.contains('\n'));
    }
}
