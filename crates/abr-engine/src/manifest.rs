// Manifest Parser: turns a master playlist plus per-rendition media playlists into a quality ladder.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AbrError, Result};

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";

/// Video resolution of a rendition, written as `WxH` in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = AbrError;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| AbrError::parse(format!("resolution `{s}` is not WxH")))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| AbrError::parse(format!("invalid resolution width in `{s}`")))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| AbrError::parse(format!("invalid resolution height in `{s}`")))?;
        if width == 0 || height == 0 {
            return Err(AbrError::parse(format!("resolution `{s}` has a zero dimension")));
        }
        Ok(Self { width, height })
    }
}

/// Stable identity of a quality level, derived from bandwidth and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualityId(String);

impl QualityId {
    pub fn new(bandwidth_bps: u64, resolution: Resolution) -> Self {
        Self(format!("{bandwidth_bps}@{resolution}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QualityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `#EXTINF` + URI pair of a media playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentRef {
    pub uri: String,
    pub duration_secs: f64,
    pub sequence: u64,
}

/// A `#EXT-X-STREAM-INF` entry that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    pub id: QualityId,
    pub bandwidth_bps: u64,
    pub resolution: Resolution,
    pub playlist_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingBandwidth,
    InvalidBandwidth(String),
    MissingResolution,
    InvalidResolution(String),
    MissingUri,
    Duplicate(QualityId),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBandwidth => f.write_str("missing BANDWIDTH attribute"),
            Self::InvalidBandwidth(v) => write!(f, "invalid BANDWIDTH `{v}`"),
            Self::MissingResolution => f.write_str("missing RESOLUTION attribute"),
            Self::InvalidResolution(v) => write!(f, "invalid RESOLUTION `{v}`"),
            Self::MissingUri => f.write_str("no playlist URI follows the stream-info tag"),
            Self::Duplicate(id) => write!(f, "duplicate rendition {id}"),
        }
    }
}

/// A stream-info entry that was ignored while parsing the master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedVariant {
    /// 1-based line number of the `#EXT-X-STREAM-INF` tag
    pub line: usize,
    pub reason: SkipReason,
}

impl fmt::Display for SkippedVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

/// Result of parsing a master playlist: valid renditions ascending by bandwidth,
/// plus the entries that were skipped so the caller can report them.
#[derive(Debug, Clone)]
pub struct MasterManifest {
    pub renditions: Vec<Rendition>,
    pub skipped: Vec<SkippedVariant>,
}

/// Parse a master playlist.
///
/// Entries missing `BANDWIDTH` or `RESOLUTION` (or their playlist URI) are skipped,
/// not fatal. Fails with [`AbrError::Parse`] when no valid entry remains.
pub fn parse_master_manifest(text: &str) -> Result<MasterManifest> {
    let mut renditions = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = HashSet::new();
    let mut pending: Option<(usize, std::result::Result<(u64, Resolution), SkipReason>)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(attributes) = line.strip_prefix(STREAM_INF_TAG) {
            if let Some((entry_line, _)) = pending.take() {
                skipped.push(SkippedVariant {
                    line: entry_line,
                    reason: SkipReason::MissingUri,
                });
            }
            pending = Some((idx + 1, parse_stream_inf(attributes)));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let Some((entry_line, parsed)) = pending.take() else {
            debug!(line = idx + 1, uri = line, "Ignoring URI without stream-info tag");
            continue;
        };

        match parsed {
            Ok((bandwidth_bps, resolution)) => {
                let id = QualityId::new(bandwidth_bps, resolution);
                if !seen.insert(id.clone()) {
                    skipped.push(SkippedVariant {
                        line: entry_line,
                        reason: SkipReason::Duplicate(id),
                    });
                    continue;
                }
                renditions.push(Rendition {
                    id,
                    bandwidth_bps,
                    resolution,
                    playlist_ref: line.to_string(),
                });
            }
            Err(reason) => skipped.push(SkippedVariant {
                line: entry_line,
                reason,
            }),
        }
    }

    if let Some((entry_line, _)) = pending {
        skipped.push(SkippedVariant {
            line: entry_line,
            reason: SkipReason::MissingUri,
        });
    }

    if renditions.is_empty() {
        return Err(AbrError::parse(format!(
            "master playlist has no valid stream-info entries ({} skipped)",
            skipped.len()
        )));
    }

    renditions.sort_by(|a, b| {
        a.bandwidth_bps
            .cmp(&b.bandwidth_bps)
            .then_with(|| a.resolution.pixels().cmp(&b.resolution.pixels()))
    });

    Ok(MasterManifest {
        renditions,
        skipped,
    })
}

fn parse_stream_inf(attributes: &str) -> std::result::Result<(u64, Resolution), SkipReason> {
    let attrs = split_attributes(attributes);

    let bandwidth = attrs
        .get("BANDWIDTH")
        .ok_or(SkipReason::MissingBandwidth)?;
    let bandwidth_bps = match bandwidth.parse::<u64>() {
        Ok(bw) if bw > 0 => bw,
        _ => return Err(SkipReason::InvalidBandwidth(bandwidth.to_string())),
    };

    let resolution = attrs
        .get("RESOLUTION")
        .ok_or(SkipReason::MissingResolution)?;
    let resolution = resolution
        .parse::<Resolution>()
        .map_err(|_| SkipReason::InvalidResolution(resolution.to_string()))?;

    Ok((bandwidth_bps, resolution))
}

/// Split an attribute list on commas that are not inside a quoted string.
fn split_attributes(input: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut in_quotes = false;
    let mut start = 0;

    let mut push = |part: &str| {
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            attrs.insert(key.trim().to_ascii_uppercase(), value.to_string());
        }
    };

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push(&input[start..]);

    attrs
}

/// Resolves a playlist reference to its text.
pub trait PlaylistResolver: Send + Sync {
    fn resolve(&self, playlist_ref: &str) -> Option<String>;
}

/// Playlists held in memory, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlaylists {
    playlists: HashMap<String, String>,
}

impl InMemoryPlaylists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, playlist_ref: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(playlist_ref, text);
        self
    }

    pub fn insert(&mut self, playlist_ref: impl Into<String>, text: impl Into<String>) {
        self.playlists.insert(playlist_ref.into(), text.into());
    }
}

impl PlaylistResolver for InMemoryPlaylists {
    fn resolve(&self, playlist_ref: &str) -> Option<String> {
        self.playlists.get(playlist_ref).cloned()
    }
}

/// Playlists read from files relative to a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryPlaylists {
    root: PathBuf,
}

impl DirectoryPlaylists {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PlaylistResolver for DirectoryPlaylists {
    fn resolve(&self, playlist_ref: &str) -> Option<String> {
        let path = self.root.join(playlist_ref);
        match std::fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Playlist file unavailable");
                None
            }
        }
    }
}

/// Resolve and parse one media playlist into its ordered segment references.
pub fn parse_media_playlist(
    resolver: &dyn PlaylistResolver,
    playlist_ref: &str,
) -> Result<Vec<SegmentRef>> {
    let text = resolver
        .resolve(playlist_ref)
        .ok_or_else(|| AbrError::not_found(playlist_ref))?;

    let playlist = m3u8_rs::parse_media_playlist_res(text.as_bytes()).map_err(|e| {
        AbrError::parse(format!("invalid media playlist `{playlist_ref}`: {e}"))
    })?;

    if !playlist.end_list {
        debug!(playlist_ref, "Media playlist has no #EXT-X-ENDLIST");
    }

    let base_sequence = playlist.media_sequence;
    Ok(playlist
        .segments
        .iter()
        .zip(base_sequence..)
        .map(|(segment, sequence)| SegmentRef {
            uri: segment.uri.clone(),
            duration_secs: f64::from(segment.duration),
            sequence,
        })
        .collect())
}

/// One encoding of the stream. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityLevel {
    id: QualityId,
    bandwidth_bps: u64,
    resolution: Resolution,
    playlist_ref: String,
    segments: Arc<[SegmentRef]>,
}

impl QualityLevel {
    pub fn new(rendition: Rendition, segments: Vec<SegmentRef>) -> Self {
        Self {
            id: rendition.id,
            bandwidth_bps: rendition.bandwidth_bps,
            resolution: rendition.resolution,
            playlist_ref: rendition.playlist_ref,
            segments: segments.into(),
        }
    }

    pub fn id(&self) -> &QualityId {
        &self.id
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn playlist_ref(&self) -> &str {
        &self.playlist_ref
    }

    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }
}

/// Ladder of quality levels ascending by bandwidth.
#[derive(Debug, Clone, Default)]
pub struct QualityLadder {
    levels: Vec<QualityLevel>,
}

/// A loaded ladder together with the problems that were skipped over.
#[derive(Debug, Clone)]
pub struct LadderLoad {
    pub ladder: QualityLadder,
    pub warnings: Vec<String>,
}

impl QualityLadder {
    pub fn from_levels(mut levels: Vec<QualityLevel>) -> Self {
        levels.sort_by(|a, b| {
            a.bandwidth_bps
                .cmp(&b.bandwidth_bps)
                .then_with(|| a.resolution.pixels().cmp(&b.resolution.pixels()))
        });
        Self { levels }
    }

    /// Parse the master playlist and every rendition's media playlist.
    ///
    /// Renditions whose media playlist is missing, malformed or empty are dropped
    /// and reported in [`LadderLoad::warnings`].
    pub fn load(master_text: &str, resolver: &dyn PlaylistResolver) -> Result<LadderLoad> {
        let master = parse_master_manifest(master_text)?;
        let mut warnings: Vec<String> = master
            .skipped
            .iter()
            .map(|s| format!("Skipped stream-info entry at {s}"))
            .collect();

        let mut levels = Vec::with_capacity(master.renditions.len());
        for rendition in master.renditions {
            match parse_media_playlist(resolver, &rendition.playlist_ref) {
                Ok(segments) if segments.is_empty() => {
                    warnings.push(format!(
                        "Skipped rendition {}: media playlist `{}` has no segments",
                        rendition.id, rendition.playlist_ref
                    ));
                }
                Ok(segments) => levels.push(QualityLevel::new(rendition, segments)),
                Err(e) => {
                    warnings.push(format!("Skipped rendition {}: {e}", rendition.id));
                }
            }
        }

        for warning in &warnings {
            warn!("{warning}");
        }

        if levels.is_empty() {
            return Err(AbrError::parse(
                "no rendition with a usable media playlist",
            ));
        }

        Ok(LadderLoad {
            ladder: Self::from_levels(levels),
            warnings,
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QualityLevel> {
        self.levels.get(index)
    }

    pub fn levels(&self) -> &[QualityLevel] {
        &self.levels
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QualityLevel> {
        self.levels.iter()
    }

    /// Clamp an index into the ladder's valid range (0 for an empty ladder).
    pub fn clamp_index(&self, index: usize) -> usize {
        index.min(self.levels.len().saturating_sub(1))
    }
}
