//! Path utilities for simulator configuration
//!
//! The simulator keeps its settings next to the other mesh configuration
//! files in the collection folder.

use std::path::PathBuf;

/// File name of the simulator settings
pub const SIMULATOR_CONFIG_FILE: &str = "simulator.yaml";

/// Get the default collection path
///
/// Returns: `~/Music/mesh-collection`
pub fn default_collection_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
        .join("mesh-collection")
}

/// Get the default simulator config path
///
/// Returns: `~/Music/mesh-collection/simulator.yaml`
pub fn default_simulator_config_path() -> PathBuf {
    default_collection_path().join(SIMULATOR_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_config_path() {
        let path = default_simulator_config_path();
        assert!(path.ends_with("mesh-collection/simulator.yaml"));
    }
}
