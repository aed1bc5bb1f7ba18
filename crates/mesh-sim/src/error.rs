//! Simulator error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving a track selector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    /// Built-in sample index out of range
    #[error("No built-in sample track {0}")]
    UnknownSample(usize),

    /// Show does not reference a track with this signature
    #[error("Track {signature} not found in show {}", show.display())]
    UnknownShowTrack { show: PathBuf, signature: String },

    /// The provider failed to load the track data
    #[error("Failed to load track data: {0}")]
    LoadFailed(String),
}

/// Errors surfaced by registry operations
///
/// Operations addressing a simulator that no longer exists are not errors;
/// they complete as no-ops because close notifications race with the
/// scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Every player number is claimed by a live simulator
    #[error("All player numbers are in use")]
    NoFreePlayer,

    /// Requested player number is claimed by another live simulator
    #[error("Player {0} is already simulated")]
    PlayerInUse(u8),

    /// Requested player number is outside the simulated range
    #[error("Player number {0} is out of range")]
    InvalidPlayer(u8),

    /// Track resolution failed; the simulator keeps its previous track
    #[error("Track resolution failed: {0}")]
    Track(#[from] TrackError),

    /// A simulator without a track reached the scheduler
    #[error("Simulator {0} has no track attached")]
    NoTrack(crate::types::SimId),
}

/// Result type for simulator operations
pub type SimResult<T> = Result<T, SimError>;
