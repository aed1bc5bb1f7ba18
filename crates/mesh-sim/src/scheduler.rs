//! Tick scheduler
//!
//! One background thread drives every simulator. Each cycle advances the
//! playing simulators, emits beat and status events and finishes the teardown
//! of closing simulators, all inside a single registry transaction.
//!
//! The thread sleeps between cycles by waiting on its shutdown channel, so
//! stopping it never waits out a full idle interval.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::config::SimulatorConfig;
use crate::error::{SimError, SimResult};
use crate::events::{build_beat, build_status};
use crate::registry::{master, Handoff, Registry, RegistryState, Simulator};
use crate::sink::SimEvent;
use crate::types::SimId;

impl Registry {
    /// Run one scheduler cycle over every simulator
    ///
    /// Returns how many simulators remain afterwards.
    pub fn tick(&self) -> usize {
        let config = self.config().clone();
        self.transact(|state, now, events| tick_state(state, now, &config, events))
    }
}

/// Update every simulator in registry order
///
/// A simulator whose update fails or panics is skipped for this cycle only.
fn tick_state(
    state: &mut RegistryState,
    now: f64,
    config: &SimulatorConfig,
    events: &mut Vec<SimEvent>,
) -> usize {
    let ids: Vec<SimId> = state.sims.keys().copied().collect();
    for id in ids {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tick_simulator(&mut state.sims, id, now, config, events)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Skipping {} this cycle: {}", id, e),
            Err(_) => log::error!("Simulator {} panicked during its update", id),
        }
    }
    state.sims.len()
}

fn tick_simulator(
    sims: &mut BTreeMap<SimId, Simulator>,
    id: SimId,
    now: f64,
    config: &SimulatorConfig,
    events: &mut Vec<SimEvent>,
) -> SimResult<()> {
    let Some(sim) = sims.get_mut(&id) else {
        return Ok(());
    };
    if sim.partial {
        return Ok(());
    }
    let track = sim.track.clone().ok_or(SimError::NoTrack(id))?;
    let end = track.duration_ms as f64;

    if sim.playing {
        sim.time_ms = sim.clock.position(now).clamp(0.0, end);
        if sim.time_ms >= end {
            log::info!("{} reached the end of {}", id, track.signature);
            master::stop_playing(sims, id, now, Handoff::Normal);
        }
    }

    let Some(sim) = sims.get_mut(&id) else {
        return Ok(());
    };

    let beat = track.grid.beat_number_at(sim.time_ms);
    sim.display_tempo = sim.pitch * track.grid.bpm_at(beat);

    if sim.playing && beat > 0 && beat != sim.sent_beat {
        let in_window = track
            .grid
            .time_of_beat(beat)
            .is_some_and(|beat_ms| sim.time_ms - (beat_ms as f64) < config.beat_tolerance_ms);
        if in_window {
            let (event, position) = build_beat(&sim.player_state(&track), now);
            log::trace!("{} beat {} ({}/4)", id, beat, event.beat_within_bar);
            sim.sent_beat = beat;
            sim.last_beat = Some(event.clone());
            events.push(SimEvent::Beat { event, position });
        }
    }

    let status_due = sim
        .last_status_ms
        .map_or(true, |last| now - last >= config.status_interval_ms);
    if status_due || sim.closing {
        let (event, position) = build_status(&sim.player_state(&track), now);
        sim.last_status_ms = Some(now);
        events.push(SimEvent::Status { event, position });
    }

    if sim.closing {
        teardown(sims, id, events);
    }
    Ok(())
}

/// Remove a closing simulator after its final status
fn teardown(sims: &mut BTreeMap<SimId, Simulator>, id: SimId, events: &mut Vec<SimEvent>) {
    let Some(sim) = sims.remove(&id) else {
        return;
    };

    // A successor that already announced its own track keeps the number
    let reassigned = sims
        .values()
        .any(|other| other.player == sim.player && !other.closing && !other.partial);
    if sim.track.is_some() && !reassigned {
        events.push(SimEvent::TrackChanged { player: sim.player, signature: None });
    }
    events.push(SimEvent::RegistryChanged);
    log::info!("Simulator {} (player {}) shut down", id, sim.player);
}

/// Background thread running [`Registry::tick`]
///
/// Ticks every `active_tick_ms` while simulators exist and every
/// `idle_tick_ms` otherwise. Dropping the scheduler stops the thread.
pub struct Scheduler {
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start the scheduler thread for a registry
    pub fn spawn(registry: Registry) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("sim-scheduler".into())
            .spawn(move || {
                log::info!("Simulator scheduler started");
                loop {
                    let remaining = registry.tick();
                    let interval = registry.config().tick_interval(remaining > 0);
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("Simulator scheduler stopped");
            })?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Whether the thread is still looping
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and wait for its current cycle to finish
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Simulator scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
