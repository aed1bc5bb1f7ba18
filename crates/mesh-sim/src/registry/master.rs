//! Master handoff rules
//!
//! Which simulator is master is never stored separately; it is the one entry
//! with `master` set. These transitions keep that count at zero or one and
//! are the only code that starts or stops a simulator's playback.

use std::collections::BTreeMap;

use super::Simulator;
use crate::types::SimId;

/// Whether stopping playback may move master to another simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Normal stop: master passes to another playing simulator
    Normal,
    /// Bulk shutdown: no master bookkeeping at all
    Suppressed,
}

/// Make `id` master, clearing the flag everywhere else
pub fn claim(sims: &mut BTreeMap<SimId, Simulator>, id: SimId) {
    if !sims.contains_key(&id) {
        return;
    }
    for (other_id, sim) in sims.iter_mut() {
        sim.master = *other_id == id;
    }
    log::debug!("{} is now tempo master", id);
}

/// First simulator other than `id` that is playing, in registry order
pub fn first_other_playing(sims: &BTreeMap<SimId, Simulator>, id: SimId) -> Option<SimId> {
    sims.iter()
        .find(|(other_id, sim)| **other_id != id && sim.playing && !sim.closing)
        .map(|(other_id, _)| *other_id)
}

/// Whether a simulator other than `id` is both playing and master
pub fn other_playing_master(sims: &BTreeMap<SimId, Simulator>, id: SimId) -> bool {
    sims.iter()
        .any(|(other_id, sim)| *other_id != id && sim.playing && sim.master)
}

/// Start playback; a player starting with no playing master takes master
pub fn start_playing(sims: &mut BTreeMap<SimId, Simulator>, id: SimId, now: f64) {
    let needs_master = match sims.get_mut(&id) {
        Some(sim) if !sim.playing => {
            sim.clock.start(now);
            sim.playing = true;
            !sim.master
        }
        _ => return,
    };

    if needs_master && !other_playing_master(sims, id) {
        claim(sims, id);
    }
}

/// Stop playback at the current clock position
///
/// A master that stops hands master to the first other playing simulator,
/// or releases it when nobody else is playing.
pub fn stop_playing(sims: &mut BTreeMap<SimId, Simulator>, id: SimId, now: f64, handoff: Handoff) {
    let was_master = match sims.get_mut(&id) {
        Some(sim) if sim.playing => {
            sim.clock.stop(now);
            let position = sim.clock.position(now).max(0.0);
            sim.time_ms = match &sim.track {
                Some(track) => position.min(track.duration_ms as f64),
                None => position,
            };
            sim.clock.jump(sim.time_ms, now);
            sim.playing = false;
            sim.master
        }
        _ => return,
    };

    if handoff == Handoff::Suppressed || !was_master {
        return;
    }

    match first_other_playing(sims, id) {
        Some(successor) => {
            log::info!("Master handed off from {} to {}", id, successor);
            claim(sims, successor);
        }
        None => {
            if let Some(sim) = sims.get_mut(&id) {
                sim.master = false;
            }
            log::debug!("{} stopped; no simulator is master", id);
        }
    }
}
