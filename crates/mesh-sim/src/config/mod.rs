//! Simulator configuration
//!
//! Timing thresholds and scheduler cadence, stored as YAML in the mesh
//! collection folder. Every field has a default so a partial file is valid.
//!
//! ```yaml
//! active_tick_ms: 1
//! idle_tick_ms: 250
//! status_interval_ms: 50.0
//! beat_tolerance_ms: 10.0
//! pitch_range: 0.5
//! ```

mod io;
mod paths;

pub use io::load_config;
pub use paths::{default_collection_path, default_simulator_config_path, SIMULATOR_CONFIG_FILE};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Scheduler interval while at least one simulator exists
    pub active_tick_ms: u64,
    /// Scheduler interval while the registry is empty
    pub idle_tick_ms: u64,
    /// Minimum wall time between status events of one simulator
    pub status_interval_ms: f64,
    /// How far past a beat's grid position a beat event may still fire
    pub beat_tolerance_ms: f64,
    /// Maximum deviation of pitch from 1.0 (0.5 = ±50%)
    pub pitch_range: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            active_tick_ms: 1,
            idle_tick_ms: 250,
            status_interval_ms: 50.0,
            beat_tolerance_ms: 10.0,
            pitch_range: 0.5,
        }
    }
}

impl SimulatorConfig {
    /// Load from a YAML file, falling back to defaults
    pub fn load(path: &Path) -> Self {
        let config: Self = load_config(path);
        config.sanitized()
    }

    /// Load from `~/Music/mesh-collection/simulator.yaml`
    pub fn load_default() -> Self {
        Self::load(&default_simulator_config_path())
    }

    /// Scheduler interval for the current registry population
    pub fn tick_interval(&self, has_simulators: bool) -> Duration {
        if has_simulators {
            Duration::from_millis(self.active_tick_ms)
        } else {
            Duration::from_millis(self.idle_tick_ms)
        }
    }

    /// Clamp a pitch multiplier into the configured range
    pub fn clamp_pitch(&self, pitch: f64) -> f64 {
        if !pitch.is_finite() {
            return crate::types::DEFAULT_PITCH;
        }
        pitch.clamp(1.0 - self.pitch_range, 1.0 + self.pitch_range)
    }

    /// Replace nonsensical values with defaults
    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.active_tick_ms == 0 {
            self.active_tick_ms = defaults.active_tick_ms;
        }
        if self.idle_tick_ms == 0 {
            self.idle_tick_ms = defaults.idle_tick_ms;
        }
        if !(self.status_interval_ms > 0.0) {
            self.status_interval_ms = defaults.status_interval_ms;
        }
        if !(self.beat_tolerance_ms > 0.0) {
            self.beat_tolerance_ms = defaults.beat_tolerance_ms;
        }
        if !(0.0..1.0).contains(&self.pitch_range) {
            log::warn!("pitch_range {} out of bounds, using default", self.pitch_range);
            self.pitch_range = defaults.pitch_range;
        }
        self
    }
}
