//! In-memory track library with built-in samples
//!
//! Hosts register the descriptors of tracks their open shows reference; two
//! synthetic sample tracks are always available so the simulator works with
//! no show loaded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use super::{
    BeatGrid, CuePoint, GridBeat, PhraseKind, ShowTrack, StructureMarker, TrackDescriptor,
    TrackProvider, TrackSelector,
};
use crate::error::TrackError;

/// Number of built-in sample tracks
pub const SAMPLE_COUNT: usize = 2;

/// Track provider backed by registered descriptors
pub struct TrackLibrary {
    samples: [Arc<TrackDescriptor>; SAMPLE_COUNT],
    /// Show tracks in registration order
    shows: RwLock<Vec<(PathBuf, Arc<TrackDescriptor>)>>,
}

impl TrackLibrary {
    pub fn new() -> Self {
        Self {
            samples: [Arc::new(sample_one()), Arc::new(sample_two())],
            shows: RwLock::new(Vec::new()),
        }
    }

    /// Built-in sample descriptor
    pub fn sample(&self, index: usize) -> Option<Arc<TrackDescriptor>> {
        self.samples.get(index).cloned()
    }

    /// Make a show's track available for simulation
    ///
    /// Re-registering the same signature for the same show replaces it.
    pub fn register_show_track(&self, show: impl Into<PathBuf>, track: TrackDescriptor) {
        let show = show.into();
        let mut shows = self.shows.write().unwrap_or_else(PoisonError::into_inner);
        shows.retain(|(path, existing)| !(path == &show && existing.signature == track.signature));
        log::debug!("Registered track {} from show {:?}", track.signature, show);
        shows.push((show, Arc::new(track)));
    }

    /// Forget every track of a closed show
    pub fn remove_show(&self, show: &Path) {
        let mut shows = self.shows.write().unwrap_or_else(PoisonError::into_inner);
        shows.retain(|(path, _)| path != show);
    }
}

impl Default for TrackLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackProvider for TrackLibrary {
    fn resolve(&self, selector: &TrackSelector) -> Result<Arc<TrackDescriptor>, TrackError> {
        match selector {
            TrackSelector::Sample(index) => {
                self.sample(*index).ok_or(TrackError::UnknownSample(*index))
            }
            TrackSelector::Show { show, signature } => {
                let shows = self.shows.read().unwrap_or_else(PoisonError::into_inner);
                shows
                    .iter()
                    .find(|(path, track)| path == show && &track.signature == signature)
                    .map(|(_, track)| Arc::clone(track))
                    .ok_or_else(|| TrackError::UnknownShowTrack {
                        show: show.clone(),
                        signature: signature.clone(),
                    })
            }
        }
    }

    fn show_tracks(&self) -> Vec<ShowTrack> {
        let shows = self.shows.read().unwrap_or_else(PoisonError::into_inner);
        shows
            .iter()
            .map(|(show, track)| ShowTrack {
                show: show.clone(),
                signature: track.signature.clone(),
            })
            .collect()
    }
}

/// Phrase markers every `phrase_beats` beats, cycling through a typical layout
fn phrases(beat_count: usize, phrase_beats: usize) -> Vec<StructureMarker> {
    const LAYOUT: [PhraseKind; 6] = [
        PhraseKind::Intro,
        PhraseKind::Up,
        PhraseKind::Chorus,
        PhraseKind::Down,
        PhraseKind::Chorus,
        PhraseKind::Outro,
    ];
    (0..beat_count)
        .step_by(phrase_beats)
        .enumerate()
        .map(|(i, start)| StructureMarker {
            beat: start + 1,
            kind: LAYOUT[i.min(LAYOUT.len() - 1)],
        })
        .collect()
}

/// Deterministic preview bytes shaped like a bar-pulsing waveform
fn preview(duration_ms: u64) -> super::WaveformPreview {
    let columns = 400u64;
    let data: Vec<u8> = (0..columns)
        .map(|col| {
            let pulse = if col % 8 == 0 { 31 } else { 12 + (col * 7 % 13) as u8 };
            let fade = if col * duration_ms / columns < 8_000 { pulse / 2 } else { pulse };
            fade.min(31)
        })
        .collect();
    super::WaveformPreview { data: data.into() }
}

/// 128 BPM, three minutes, cue on the first downbeat
fn sample_one() -> TrackDescriptor {
    let duration_ms = 180_000;
    let grid = BeatGrid::constant(128.0, 120, duration_ms);
    TrackDescriptor {
        signature: "sample-0a9c6f1e".to_string(),
        title: "Sample Track 1".to_string(),
        artist: "Mesh".to_string(),
        duration_ms,
        structure: phrases(grid.beat_count(), 64),
        grid: Arc::new(grid),
        cue_points: vec![CuePoint {
            time_ms: 120,
            hot_cue: None,
            label: "Start".to_string(),
            color: None,
        }],
        preview: Some(preview(duration_ms)),
    }
}

/// Starts at 120 BPM and steps up to 124 BPM after 64 bars, no cues
fn sample_two() -> TrackDescriptor {
    let duration_ms = 240_000;
    let first = BeatGrid::constant(120.0, 0, 128_000);
    let switch_ms = 128_000;
    let second = BeatGrid::constant(124.0, switch_ms, duration_ms);

    let beats: Vec<GridBeat> = (1..=first.beat_count())
        .map(|n| GridBeat {
            time_ms: first.time_of_beat(n).unwrap_or_default(),
            beat_within_bar: first.beat_within_bar(n),
            bpm: 120.0,
        })
        .chain((1..=second.beat_count()).map(|n| GridBeat {
            time_ms: second.time_of_beat(n).unwrap_or_default(),
            beat_within_bar: second.beat_within_bar(n),
            bpm: 124.0,
        }))
        .collect();
    let grid = BeatGrid::new(beats);

    TrackDescriptor {
        signature: "sample-5d27b3c4".to_string(),
        title: "Sample Track 2".to_string(),
        artist: "Mesh".to_string(),
        duration_ms,
        structure: phrases(grid.beat_count(), 32),
        grid: Arc::new(grid),
        cue_points: Vec::new(),
        preview: Some(preview(duration_ms)),
    }
}
