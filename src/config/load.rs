use super::{ConfigError, Settings};
use std::path::Path;

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let settings = Settings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}
