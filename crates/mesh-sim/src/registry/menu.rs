//! Player and track choices offered by the presentation surface

use std::collections::{BTreeMap, HashSet};

use super::Simulator;
use crate::track::{ShowTrack, TrackProvider, TrackSelector, SAMPLE_COUNT};
use crate::types::{player_numbers, SimId};

/// An entry of the track menu
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackChoice {
    /// Built-in sample by index
    Sample(usize),
    /// Track referenced by an open show
    Show(ShowTrack),
}

impl TrackChoice {
    /// Selector that loads this choice
    pub fn selector(&self) -> TrackSelector {
        match self {
            TrackChoice::Sample(index) => TrackSelector::Sample(*index),
            TrackChoice::Show(track) => TrackSelector::Show {
                show: track.show.clone(),
                signature: track.signature.clone(),
            },
        }
    }
}

/// Player numbers not claimed by a live simulator other than `excluding`
///
/// Passing the simulator whose menu is being built keeps its own number in
/// the list.
pub fn available_players(sims: &BTreeMap<SimId, Simulator>, excluding: Option<SimId>) -> Vec<u8> {
    let taken: HashSet<u8> = sims
        .iter()
        .filter(|(id, sim)| Some(**id) != excluding && !sim.closing)
        .map(|(_, sim)| sim.player)
        .collect();
    player_numbers().filter(|p| !taken.contains(p)).collect()
}

/// Show tracks deduplicated by signature, followed by the built-in samples
pub fn available_tracks(provider: &dyn TrackProvider) -> Vec<TrackChoice> {
    let mut seen = HashSet::new();
    provider
        .show_tracks()
        .into_iter()
        .filter(|track| seen.insert(track.signature.clone()))
        .map(TrackChoice::Show)
        .chain((0..SAMPLE_COUNT).map(TrackChoice::Sample))
        .collect()
}

/// Menu text for a track choice
pub fn choice_label(choice: &TrackChoice, provider: &dyn TrackProvider) -> String {
    let descriptor = provider.resolve(&choice.selector());
    match (choice, descriptor) {
        (TrackChoice::Sample(index), Ok(track)) => format!("Sample {}: {}", index + 1, track.title),
        (TrackChoice::Sample(index), Err(_)) => format!("Sample {}", index + 1),
        (TrackChoice::Show(show_track), Ok(track)) => {
            let show_name = show_track
                .show
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if track.artist.is_empty() {
                format!("{} [{}]", track.title, show_name)
            } else {
                format!("{} - {} [{}]", track.title, track.artist, show_name)
            }
        }
        (TrackChoice::Show(show_track), Err(_)) => {
            format!("Missing track {}", show_track.signature)
        }
    }
}
