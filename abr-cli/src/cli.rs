use std::path::PathBuf;

use abr_engine::NetworkTier;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "abr-sim",
    version,
    about = "Adaptive bitrate engine simulator",
    long_about = "Inspect HLS quality ladders and run simulated adaptive bitrate playback sessions against them."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "ABR_SIM_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a master playlist and print the resulting quality ladder
    Inspect {
        /// Path to the master playlist; media playlists are resolved next to it
        master: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Play a simulated session and print the final metrics
    Simulate {
        /// Path to the master playlist; media playlists are resolved next to it
        master: PathBuf,

        /// How long to play, in seconds
        #[arg(short, long, default_value_t = 30)]
        duration: u64,

        /// Seed for the simulated network and transport
        #[arg(long)]
        seed: Option<u64>,

        /// Probability that a single segment transfer fails
        #[arg(long, default_value_t = 0.05)]
        fault_rate: f64,

        /// Pin the simulated network to one tier
        #[arg(long, value_parser = parse_tier)]
        tier: Option<NetworkTier>,

        /// Estimate the network from observed transfers instead of sampling tiers
        #[arg(long)]
        measured: bool,

        /// Force a quality index instead of letting the selector decide
        #[arg(long = "override")]
        override_index: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        output: OutputFormat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonCompact)
    }
}

fn parse_tier(s: &str) -> Result<NetworkTier, String> {
    s.parse().map_err(|e: abr_engine::AbrError| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_arguments_parse() {
        let args = Args::try_parse_from([
            "abr-sim",
            "simulate",
            "demos/vod/master.m3u8",
            "--duration",
            "10",
            "--seed",
            "7",
            "--tier",
            "good",
            "--override",
            "1",
            "-o",
            "json",
        ])
        .unwrap();

        match args.command {
            Commands::Simulate {
                duration,
                seed,
                tier,
                override_index,
                output,
                measured,
                ..
            } => {
                assert_eq!(duration, 10);
                assert_eq!(seed, Some(7));
                assert_eq!(tier, Some(NetworkTier::Good));
                assert_eq!(override_index, Some(1));
                assert_eq!(output, OutputFormat::Json);
                assert!(!measured);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let result = Args::try_parse_from(["abr-sim", "simulate", "m.m3u8", "--tier", "warp"]);
        assert!(result.is_err());
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        let result = Args::try_parse_from(["abr-sim", "-v", "-q", "inspect", "m.m3u8"]);
        assert!(result.is_err());
    }
}
