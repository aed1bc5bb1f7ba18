//! Track descriptors consumed by the simulator
//!
//! A [`TrackDescriptor`] is the immutable bundle of analysis data a simulated
//! player needs: beat grid, duration, cue points, phrase structure and the
//! waveform preview. Descriptors come from a [`TrackProvider`]; loading them
//! from files is the provider's business.

mod library;

pub use library::{TrackLibrary, SAMPLE_COUNT};

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TrackError;

/// One beat in a grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBeat {
    /// Position within the track in milliseconds
    pub time_ms: u64,
    /// Position within the bar (1-4)
    pub beat_within_bar: u8,
    /// Tempo from this beat onwards
    pub bpm: f64,
}

/// Beat grid information
///
/// Beat numbers are 1-based as on the players; beat number 0 means the
/// playhead is before the first beat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeatGrid {
    beats: Vec<GridBeat>,
}

impl BeatGrid {
    /// Create a grid from beats sorted by time
    pub fn new(mut beats: Vec<GridBeat>) -> Self {
        beats.sort_by_key(|b| b.time_ms);
        Self { beats }
    }

    /// Create a constant-tempo grid covering `[first_beat_ms, duration_ms)`
    pub fn constant(bpm: f64, first_beat_ms: u64, duration_ms: u64) -> Self {
        let mut beats = Vec::new();
        if bpm > 0.0 {
            let interval = 60_000.0 / bpm;
            let mut time = first_beat_ms as f64;
            while time < duration_ms as f64 {
                beats.push(GridBeat {
                    time_ms: time.round() as u64,
                    beat_within_bar: (beats.len() % 4) as u8 + 1,
                    bpm,
                });
                time += interval;
            }
        }
        Self { beats }
    }

    pub fn beat_count(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    /// Beat number the playhead is on (last beat at or before `time_ms`)
    pub fn beat_number_at(&self, time_ms: f64) -> usize {
        self.beats.partition_point(|b| (b.time_ms as f64) <= time_ms)
    }

    /// Grid position of a beat
    pub fn time_of_beat(&self, beat: usize) -> Option<u64> {
        self.beat(beat).map(|b| b.time_ms)
    }

    /// Position within the bar, 0 before the first beat
    pub fn beat_within_bar(&self, beat: usize) -> u8 {
        self.beat(beat).map(|b| b.beat_within_bar).unwrap_or(0)
    }

    /// Grid tempo at a beat; beat 0 uses the first beat's tempo
    pub fn bpm_at(&self, beat: usize) -> f64 {
        self.beat(beat.max(1)).map(|b| b.bpm).unwrap_or(0.0)
    }

    /// Beat number of the next downbeat after `beat`
    pub fn next_bar_start(&self, beat: usize) -> Option<usize> {
        (beat + 1..=self.beats.len()).find(|&n| self.beat_within_bar(n) == 1)
    }

    fn beat(&self, beat: usize) -> Option<&GridBeat> {
        beat.checked_sub(1).and_then(|idx| self.beats.get(idx))
    }
}

/// A memory or hot cue
#[derive(Debug, Clone, PartialEq)]
pub struct CuePoint {
    /// Position within the track in milliseconds
    pub time_ms: u64,
    /// Hot cue slot, `None` for memory points
    pub hot_cue: Option<u8>,
    pub label: String,
    /// Color as hex string (e.g., "#FF5500")
    pub color: Option<String>,
}

/// Phrase analysis markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseKind {
    Intro,
    Verse,
    Bridge,
    Chorus,
    Up,
    Down,
    Outro,
}

/// Start of an analysed phrase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructureMarker {
    /// First beat number of the phrase
    pub beat: usize,
    pub kind: PhraseKind,
}

/// Opaque waveform preview bytes, shared with whatever draws them
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformPreview {
    pub data: Arc<[u8]>,
}

/// Immutable analysis bundle for one track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    /// Stable identifier of the analysis data
    pub signature: String,
    pub title: String,
    pub artist: String,
    pub duration_ms: u64,
    pub grid: Arc<BeatGrid>,
    pub cue_points: Vec<CuePoint>,
    pub structure: Vec<StructureMarker>,
    pub preview: Option<WaveformPreview>,
}

impl TrackDescriptor {
    /// Where playback starts after loading: the earliest cue, or the top
    pub fn initial_position(&self) -> f64 {
        self.cue_points
            .iter()
            .map(|cue| cue.time_ms)
            .min()
            .unwrap_or(0)
            .min(self.duration_ms) as f64
    }
}

/// Which track a simulator should load
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackSelector {
    /// Built-in sample track by index
    Sample(usize),
    /// Track referenced by an open show
    Show { show: PathBuf, signature: String },
}

/// A track referenced by an open show
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShowTrack {
    /// Show file the track belongs to
    pub show: PathBuf,
    pub signature: String,
}

/// Supplies track descriptors to the registry
pub trait TrackProvider: Send + Sync {
    /// Resolve a selector to its analysis data
    fn resolve(&self, selector: &TrackSelector) -> Result<Arc<TrackDescriptor>, TrackError>;

    /// Tracks referenced by all open shows, in show order
    fn show_tracks(&self) -> Vec<ShowTrack> {
        Vec::new()
    }
}
