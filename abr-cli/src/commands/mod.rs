mod inspect;
mod simulate;

pub use inspect::inspect;
pub use simulate::{SimulateOptions, simulate};

use std::path::Path;

use abr_engine::DirectoryPlaylists;

use crate::error::{AppError, Result};

/// Read a master playlist and build a resolver for the media playlists next to it.
fn open_master(master: &Path) -> Result<(String, DirectoryPlaylists)> {
    let text = std::fs::read_to_string(master).map_err(|e| {
        AppError::InvalidInput(format!("cannot read `{}`: {e}", master.display()))
    })?;
    let root = master
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((text, DirectoryPlaylists::new(root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use abr_engine::QualityLadder;

    #[test]
    fn demo_ladder_resolves_next_to_master() {
        let master = Path::new(env!("CARGO_MANIFEST_DIR")).join("../demos/vod/master.m3u8");
        let (text, resolver) = open_master(&master).unwrap();
        let load = QualityLadder::load(&text, &resolver).unwrap();
        assert_eq!(load.ladder.len(), 3);
        assert!(load.warnings.is_empty());
        assert_eq!(load.ladder.levels()[2].segments().len(), 15);
    }

    #[test]
    fn unreadable_master_is_invalid_input() {
        let result = open_master(Path::new("does/not/exist.m3u8"));
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
