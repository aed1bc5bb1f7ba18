//! Synthetic player events
//!
//! Pure builders turning a simulator's state into the beat and status events
//! downstream engines expect from real players, plus the position companion
//! those engines use for sub-beat interpolation.

use std::sync::Arc;

use crate::track::{BeatGrid, TrackDescriptor};
use crate::types::encode_pitch;

/// Set in every status packet
pub const FLAG_BASE: u8 = 0x80;
/// Player is playing
pub const FLAG_PLAYING: u8 = 0x40;
/// Player is the tempo master
pub const FLAG_MASTER: u8 = 0x20;
/// Player is synced to the master
pub const FLAG_SYNC: u8 = 0x10;
/// Player's channel is on air at the mixer
pub const FLAG_ON_AIR: u8 = 0x08;

/// Media slot a player loaded its track from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSourceSlot {
    NoTrack,
    CdSlot,
    SdSlot,
    UsbSlot,
    Collection,
}

/// Kind of track a player has loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    NoTrack,
    Rekordbox,
    Unanalyzed,
    CdDigitalAudio,
}

/// Slot reported by simulated players
pub const SIMULATED_SOURCE_SLOT: TrackSourceSlot = TrackSourceSlot::Collection;

/// Track type reported by simulated players
pub const SIMULATED_TRACK_TYPE: TrackType = TrackType::Rekordbox;

/// Everything the builders read from a simulator
///
/// Borrowed from the registry entry while its lock is held.
#[derive(Debug, Clone, Copy)]
pub struct PlayerState<'a> {
    pub player: u8,
    pub track: &'a TrackDescriptor,
    pub time_ms: f64,
    pub pitch: f64,
    pub playing: bool,
    pub master: bool,
    pub sync: bool,
    pub on_air: bool,
}

impl PlayerState<'_> {
    /// Beat number the playhead is on (0 before the first beat)
    pub fn beat_number(&self) -> usize {
        self.track.grid.beat_number_at(self.time_ms)
    }

    /// Effective tempo: grid tempo scaled by pitch
    pub fn bpm(&self) -> f64 {
        self.pitch * self.track.grid.bpm_at(self.beat_number())
    }
}

/// Position snapshot for consumers that interpolate between events
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPosition {
    /// Wall time the snapshot was taken
    pub timestamp_ms: f64,
    /// Playhead within the track
    pub time_ms: f64,
    /// Beat number at `time_ms`
    pub beat_number: usize,
    pub playing: bool,
    pub pitch: f64,
    /// Track length, used to clamp interpolation
    pub duration_ms: u64,
    pub grid: Arc<BeatGrid>,
}

impl TrackPosition {
    /// Interpolated playhead at a later wall time
    pub fn time_at(&self, now_ms: f64) -> f64 {
        if !self.playing {
            return self.time_ms;
        }
        let elapsed = (now_ms - self.timestamp_ms).max(0.0);
        (self.time_ms + elapsed * self.pitch).min(self.duration_ms as f64)
    }

    /// Interpolated beat number at a later wall time
    pub fn beat_at(&self, now_ms: f64) -> usize {
        self.grid.beat_number_at(self.time_at(now_ms))
    }
}

/// Beat packet equivalent
#[derive(Debug, Clone, PartialEq)]
pub struct BeatEvent {
    pub player: u8,
    /// Position within the bar, 0 before the first beat
    pub beat_within_bar: u8,
    pub bpm: f64,
    /// Pitch as fixed point, 0x100000 = normal speed
    pub pitch: i32,
    /// Wall milliseconds until the next beat, if the grid has one
    pub next_beat_ms: Option<u64>,
    /// Wall milliseconds until the next downbeat, if the grid has one
    pub next_bar_ms: Option<u64>,
}

/// Status packet equivalent
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub player: u8,
    pub beat_within_bar: u8,
    /// Absolute beat number, 0 before the first beat
    pub beat_number: usize,
    pub bpm: f64,
    pub pitch: i32,
    /// Player the track was loaded from; simulated players load their own
    pub track_source_player: u8,
    pub track_source_slot: TrackSourceSlot,
    pub track_type: TrackType,
    pub signature: String,
    pub flags: u8,
}

impl StatusEvent {
    pub fn is_playing(&self) -> bool {
        self.flags & FLAG_PLAYING != 0
    }

    pub fn is_master(&self) -> bool {
        self.flags & FLAG_MASTER != 0
    }

    pub fn is_synced(&self) -> bool {
        self.flags & FLAG_SYNC != 0
    }

    pub fn is_on_air(&self) -> bool {
        self.flags & FLAG_ON_AIR != 0
    }
}

/// Assemble the status flags byte
pub fn status_flags(playing: bool, master: bool, sync: bool, on_air: bool) -> u8 {
    let mut flags = FLAG_BASE;
    if playing {
        flags |= FLAG_PLAYING;
    }
    if master {
        flags |= FLAG_MASTER;
    }
    if sync {
        flags |= FLAG_SYNC;
    }
    if on_air {
        flags |= FLAG_ON_AIR;
    }
    flags
}

/// Build the position companion for a state at wall time `now_ms`
pub fn track_position(state: &PlayerState<'_>, now_ms: f64) -> TrackPosition {
    TrackPosition {
        timestamp_ms: now_ms,
        time_ms: state.time_ms,
        beat_number: state.beat_number(),
        playing: state.playing,
        pitch: state.pitch,
        duration_ms: state.track.duration_ms,
        grid: Arc::clone(&state.track.grid),
    }
}

/// Wall time until a grid position at the current pitch
fn wall_ms_until(state: &PlayerState<'_>, grid_ms: Option<u64>) -> Option<u64> {
    let target = grid_ms? as f64;
    if state.pitch <= 0.0 {
        return None;
    }
    Some(((target - state.time_ms).max(0.0) / state.pitch).round() as u64)
}

/// Build a beat event and its position companion
pub fn build_beat(state: &PlayerState<'_>, now_ms: f64) -> (BeatEvent, TrackPosition) {
    let grid = &state.track.grid;
    let beat = state.beat_number();
    let event = BeatEvent {
        player: state.player,
        beat_within_bar: grid.beat_within_bar(beat),
        bpm: state.bpm(),
        pitch: encode_pitch(state.pitch),
        next_beat_ms: wall_ms_until(state, grid.time_of_beat(beat + 1)),
        next_bar_ms: wall_ms_until(
            state,
            grid.next_bar_start(beat).and_then(|n| grid.time_of_beat(n)),
        ),
    };
    (event, track_position(state, now_ms))
}

/// Build a status event and its position companion
pub fn build_status(state: &PlayerState<'_>, now_ms: f64) -> (StatusEvent, TrackPosition) {
    let beat = state.beat_number();
    let event = StatusEvent {
        player: state.player,
        beat_within_bar: state.track.grid.beat_within_bar(beat),
        beat_number: beat,
        bpm: state.bpm(),
        pitch: encode_pitch(state.pitch),
        track_source_player: state.player,
        track_source_slot: SIMULATED_SOURCE_SLOT,
        track_type: SIMULATED_TRACK_TYPE,
        signature: state.track.signature.clone(),
        flags: status_flags(state.playing, state.master, state.sync, state.on_air),
    };
    (event, track_position(state, now_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> TrackDescriptor {
        TrackDescriptor {
            signature: "sig".to_string(),
            title: "Test".to_string(),
            artist: String::new(),
            duration_ms: 10_000,
            // 120 BPM from 500ms: beats at 500, 1000, 1500, ...
            grid: Arc::new(BeatGrid::constant(120.0, 500, 10_000)),
            cue_points: Vec::new(),
            structure: Vec::new(),
            preview: None,
        }
    }

    fn state(track: &TrackDescriptor, time_ms: f64) -> PlayerState<'_> {
        PlayerState {
            player: 3,
            track,
            time_ms,
            pitch: 1.0,
            playing: true,
            master: false,
            sync: false,
            on_air: false,
        }
    }

    #[test]
    fn test_status_flags() {
        assert_eq!(status_flags(false, false, false, false), 0x80);
        assert_eq!(status_flags(true, false, false, false), 0xC0);
        assert_eq!(status_flags(true, true, true, true), 0xF8);
        assert_eq!(status_flags(false, true, false, true), 0xA8);
    }

    #[test]
    fn test_beat_event_fields() {
        let track = track();
        let mut s = state(&track, 1502.0);
        s.pitch = 1.1;
        let (beat, position) = build_beat(&s, 42.0);

        assert_eq!(beat.player, 3);
        assert_eq!(beat.beat_within_bar, 3);
        assert!((beat.bpm - 132.0).abs() < 1e-9);
        assert_eq!(beat.pitch, encode_pitch(1.1));
        // Next beat at 2000ms track time, 498ms away at 1.1x
        assert_eq!(beat.next_beat_ms, Some(453));
        // Next downbeat is beat 5 at 2500ms
        assert_eq!(beat.next_bar_ms, Some(907));
        assert_eq!(position.beat_number, 3);
        assert_eq!(position.timestamp_ms, 42.0);
    }

    #[test]
    fn test_status_before_first_beat() {
        let track = track();
        let (status, _) = build_status(&state(&track, 100.0), 0.0);
        assert_eq!(status.beat_number, 0);
        assert_eq!(status.beat_within_bar, 0);
        assert_eq!(status.bpm, 120.0);
        assert_eq!(status.track_source_player, 3);
        assert_eq!(status.track_source_slot, TrackSourceSlot::Collection);
        assert_eq!(status.track_type, TrackType::Rekordbox);
        assert!(status.is_playing());
        assert!(!status.is_master());
    }

    #[test]
    fn test_position_interpolation() {
        let track = track();
        let mut s = state(&track, 9_900.0);
        s.pitch = 2.0;
        let position = track_position(&s, 1000.0);
        assert_eq!(position.time_at(1010.0), 9_920.0);
        // Clamped to the track end
        assert_eq!(position.time_at(2000.0), 10_000.0);

        s.playing = false;
        let position = track_position(&s, 1000.0);
        assert_eq!(position.time_at(5000.0), 9_900.0);
        assert_eq!(position.beat_at(5000.0), track.grid.beat_number_at(9_900.0));
    }
}
