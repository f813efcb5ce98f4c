use std::path::Path;

use abr_engine::QualityLadder;
use tracing::debug;

use super::open_master;
use crate::cli::OutputFormat;
use crate::error::Result;
use crate::output::{LadderReport, render};

pub fn inspect(master: &Path, format: OutputFormat) -> Result<()> {
    let (text, resolver) = open_master(master)?;
    let load = QualityLadder::load(&text, &resolver)?;
    debug!(
        levels = load.ladder.len(),
        warnings = load.warnings.len(),
        "Ladder loaded"
    );

    let report = LadderReport::from_load(&load);
    println!("{}", render(&report, format)?);
    Ok(())
}
