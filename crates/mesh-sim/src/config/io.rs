//! YAML configuration loading

use serde::de::DeserializeOwned;
use std::path::Path;

/// Load configuration from a YAML file
///
/// A missing file yields the default config. A file that cannot be read or
/// parsed is logged and also yields the default config.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: Failed to read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    serde_yaml::from_str::<T>(&contents).unwrap_or_else(|e| {
        log::warn!("load_config: Failed to parse {:?}: {}, using defaults", path, e);
        T::default()
    })
}
