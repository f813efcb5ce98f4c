use std::path::Path;

use abr_engine::AbrConfig;
use tracing::debug;

use crate::error::Result;

/// Load the engine configuration, falling back to defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<AbrConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let config: AbrConfig = toml::from_str(&text)?;
            debug!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => AbrConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
