//! Simulator registry
//!
//! The registry owns every simulated player. All mutation, from the
//! presentation surface and from the scheduler alike, happens inside one
//! short critical section per operation, so nobody can observe a
//! half-updated simulator. Events produced by an operation are queued
//! while the lock is held and handed to the sinks after it is released.
//!
//! Sinks see events in the order their transactions committed. One thread
//! at a time drains the queue; a thread that finds another one draining
//! leaves its events to it.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mesh_sim::{Registry, SimFlag, TrackLibrary, TrackSelector};
//!
//! let registry = Registry::builder(Arc::new(TrackLibrary::new())).build();
//! let id = registry.create(None).unwrap();
//! registry.attach_track(id, &TrackSelector::Sample(0)).unwrap();
//! registry.set_flag(id, SimFlag::Playing, true);
//! ```

pub mod master;
pub mod menu;

pub use master::Handoff;
pub use menu::{choice_label, TrackChoice};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use crossbeam::channel::{Receiver, Sender};

use crate::clock::{MonotonicClock, PlayClock, TimeSource};
use crate::config::SimulatorConfig;
use crate::error::{SimError, SimResult};
use crate::events::{BeatEvent, PlayerState};
use crate::sink::{deliver, EventSink, SimEvent};
use crate::track::{TrackDescriptor, TrackProvider, TrackSelector};
use crate::types::{is_valid_player, player_numbers, SimFlag, SimId, DEFAULT_PITCH};

/// One simulated player
#[derive(Debug, Clone)]
pub struct Simulator {
    pub(crate) id: SimId,
    pub(crate) player: u8,
    pub(crate) track: Option<Arc<TrackDescriptor>>,
    pub(crate) clock: PlayClock,
    /// Playhead within the track, refreshed from `clock` every tick
    pub(crate) time_ms: f64,
    pub(crate) pitch: f64,
    pub(crate) playing: bool,
    pub(crate) master: bool,
    pub(crate) on_air: bool,
    pub(crate) sync: bool,
    /// Last beat number a beat event went out for
    pub(crate) sent_beat: usize,
    /// Wall time of the last status event
    pub(crate) last_status_ms: Option<f64>,
    pub(crate) closing: bool,
    /// No track attached yet; the scheduler ignores the entry
    pub(crate) partial: bool,
    /// Pitch-scaled tempo at the playhead, for display
    pub(crate) display_tempo: f64,
    pub(crate) last_beat: Option<BeatEvent>,
}

impl Simulator {
    pub(crate) fn new(id: SimId, player: u8, pitch: f64) -> Self {
        Self {
            id,
            player,
            track: None,
            clock: PlayClock::new(pitch),
            time_ms: 0.0,
            pitch,
            playing: false,
            master: false,
            on_air: false,
            sync: false,
            sent_beat: 0,
            last_status_ms: None,
            closing: false,
            partial: true,
            display_tempo: 0.0,
            last_beat: None,
        }
    }

    /// Builder input for the current state
    pub(crate) fn player_state<'a>(&self, track: &'a TrackDescriptor) -> PlayerState<'a> {
        PlayerState {
            player: self.player,
            track,
            time_ms: self.time_ms,
            pitch: self.pitch,
            playing: self.playing,
            master: self.master,
            sync: self.sync,
            on_air: self.on_air,
        }
    }

    /// Refresh the displayed tempo from the grid at the playhead
    pub(crate) fn recompute_tempo(&mut self) {
        if let Some(track) = &self.track {
            let beat = track.grid.beat_number_at(self.time_ms);
            self.display_tempo = self.pitch * track.grid.bpm_at(beat);
        }
    }

    fn snapshot(&self) -> SimulatorSnapshot {
        SimulatorSnapshot {
            id: self.id,
            player: self.player,
            signature: self.track.as_ref().map(|t| t.signature.clone()),
            title: self.track.as_ref().map(|t| t.title.clone()),
            duration_ms: self.track.as_ref().map_or(0, |t| t.duration_ms),
            time_ms: self.time_ms,
            beat_number: self
                .track
                .as_ref()
                .map_or(0, |t| t.grid.beat_number_at(self.time_ms)),
            pitch: self.pitch,
            display_tempo: self.display_tempo,
            playing: self.playing,
            master: self.master,
            on_air: self.on_air,
            sync: self.sync,
            closing: self.closing,
            partial: self.partial,
            last_beat: self.last_beat.clone(),
        }
    }
}

/// Read-only copy of a simulator for the presentation surface
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorSnapshot {
    pub id: SimId,
    pub player: u8,
    pub signature: Option<String>,
    pub title: Option<String>,
    pub duration_ms: u64,
    pub time_ms: f64,
    pub beat_number: usize,
    pub pitch: f64,
    pub display_tempo: f64,
    pub playing: bool,
    pub master: bool,
    pub on_air: bool,
    pub sync: bool,
    pub closing: bool,
    pub partial: bool,
    pub last_beat: Option<BeatEvent>,
}

/// State guarded by the registry lock
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    /// Ordered by id, which is creation order
    pub(crate) sims: BTreeMap<SimId, Simulator>,
    next_id: u64,
}

impl RegistryState {
    /// Simulator that accepts user mutations (exists and is not closing)
    fn live_mut(&mut self, id: SimId) -> Option<&mut Simulator> {
        self.sims.get_mut(&id).filter(|sim| !sim.closing)
    }

    fn player_taken(&self, player: u8, excluding: Option<SimId>) -> bool {
        self.sims
            .iter()
            .any(|(id, sim)| Some(*id) != excluding && !sim.closing && sim.player == player)
    }
}

struct Inner {
    state: Mutex<RegistryState>,
    provider: Arc<dyn TrackProvider>,
    sinks: Vec<Arc<dyn EventSink>>,
    time: Arc<dyn TimeSource>,
    config: SimulatorConfig,
    /// Committed events awaiting delivery, in commit order
    outbox_tx: Sender<SimEvent>,
    outbox_rx: Receiver<SimEvent>,
    /// Held by the thread currently draining the outbox
    dispatch: Mutex<()>,
}

/// Builds a [`Registry`] with its collaborators
pub struct RegistryBuilder {
    provider: Arc<dyn TrackProvider>,
    sinks: Vec<Arc<dyn EventSink>>,
    time: Arc<dyn TimeSource>,
    config: SimulatorConfig,
}

impl RegistryBuilder {
    /// Use these settings instead of the defaults
    pub fn config(mut self, config: SimulatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a receiver of simulator events
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replace the monotonic wall clock
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn build(self) -> Registry {
        log::info!("Simulator registry created with {} event sink(s)", self.sinks.len());
        let (outbox_tx, outbox_rx) = crossbeam::channel::unbounded();
        Registry {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState::default()),
                provider: self.provider,
                sinks: self.sinks,
                time: self.time,
                config: self.config,
                outbox_tx,
                outbox_rx,
                dispatch: Mutex::new(()),
            }),
        }
    }
}

/// Process-wide collection of simulated players
///
/// Cheap to clone; clones share the same simulators.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Start building a registry around a track provider
    pub fn builder(provider: Arc<dyn TrackProvider>) -> RegistryBuilder {
        RegistryBuilder {
            provider,
            sinks: Vec::new(),
            time: Arc::new(MonotonicClock::new()),
            config: SimulatorConfig::default(),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &dyn TrackProvider {
        self.inner.provider.as_ref()
    }

    /// Run one all-or-nothing update, then deliver the events it produced
    pub(crate) fn transact<R>(
        &self,
        f: impl FnOnce(&mut RegistryState, f64, &mut Vec<SimEvent>) -> R,
    ) -> R {
        let mut events = Vec::new();
        let result = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = self.inner.time.now_ms();
            let result = f(&mut state, now, &mut events);
            // Enqueued before unlocking so queue order is commit order
            for event in events.drain(..) {
                let _ = self.inner.outbox_tx.send(event);
            }
            result
        };
        self.dispatch();
        result
    }

    /// Deliver queued events unless another thread is already doing so
    fn dispatch(&self) {
        loop {
            let guard = match self.inner.dispatch.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let batch: Vec<SimEvent> = self.inner.outbox_rx.try_iter().collect();
                if batch.is_empty() {
                    break;
                }
                deliver(&self.inner.sinks, &batch);
            }
            drop(guard);

            // Events queued while the guard was being released
            if self.inner.outbox_rx.is_empty() {
                return;
            }
        }
    }

    /// Read under the lock without producing events
    fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Create a simulator without a track
    ///
    /// Takes the lowest free player number unless one is requested.
    pub fn create(&self, player: Option<u8>) -> SimResult<SimId> {
        self.transact(|state, _now, events| {
            let player = match player {
                Some(p) if !is_valid_player(p) => return Err(SimError::InvalidPlayer(p)),
                Some(p) if state.player_taken(p, None) => return Err(SimError::PlayerInUse(p)),
                Some(p) => p,
                None => player_numbers()
                    .find(|p| !state.player_taken(*p, None))
                    .ok_or(SimError::NoFreePlayer)?,
            };

            let id = SimId(state.next_id);
            state.next_id += 1;
            state
                .sims
                .insert(id, Simulator::new(id, player, DEFAULT_PITCH));
            events.push(SimEvent::RegistryChanged);

            log::info!("Created simulator {} as player {}", id, player);
            Ok(id)
        })
    }

    /// Load a track into a simulator
    ///
    /// The selector is resolved before the simulator is touched, so a
    /// resolution failure leaves the previous track in place.
    pub fn attach_track(&self, id: SimId, selector: &TrackSelector) -> SimResult<()> {
        let track = self.inner.provider.resolve(selector)?;

        self.transact(|state, now, events| {
            let Some(sim) = state.live_mut(id) else {
                log::debug!("attach_track: {} is gone, ignoring", id);
                return Ok(());
            };

            let start = track.initial_position();
            sim.clock.jump(start, now);
            sim.time_ms = start;
            sim.sent_beat = 0;
            sim.partial = false;
            events.push(SimEvent::TrackChanged {
                player: sim.player,
                signature: Some(track.signature.clone()),
            });
            log::info!("{} (player {}) loaded track {}", id, sim.player, track.signature);
            sim.track = Some(track);
            sim.recompute_tempo();
            Ok(())
        })
    }

    /// Set one of the simulator's flags
    ///
    /// `Playing` and `Master` changes go through the master handoff rules.
    pub fn set_flag(&self, id: SimId, flag: SimFlag, value: bool) {
        self.transact(|state, now, _events| {
            let Some(sim) = state.live_mut(id) else {
                return;
            };
            match flag {
                SimFlag::OnAir => sim.on_air = value,
                SimFlag::Sync => sim.sync = value,
                SimFlag::Master if !value => sim.master = false,
                SimFlag::Master => master::claim(&mut state.sims, id),
                SimFlag::Playing if value => master::start_playing(&mut state.sims, id, now),
                SimFlag::Playing => master::stop_playing(&mut state.sims, id, now, Handoff::Normal),
            }
            log::debug!("{}: {} = {}", id, flag.name(), value);
        })
    }

    /// Change playback speed, clamped to the configured pitch range
    pub fn set_pitch(&self, id: SimId, pitch: f64) {
        let pitch = self.inner.config.clamp_pitch(pitch);
        self.transact(|state, now, _events| {
            if let Some(sim) = state.live_mut(id) {
                sim.clock.set_pitch(pitch, now);
                sim.pitch = pitch;
                sim.recompute_tempo();
            }
        })
    }

    /// Move the playhead, clamped to the track
    pub fn seek(&self, id: SimId, time_ms: f64) {
        self.transact(|state, now, _events| {
            let Some(sim) = state.live_mut(id) else {
                return;
            };
            let Some(track) = &sim.track else {
                log::debug!("seek: {} has no track yet", id);
                return;
            };
            let end = track.duration_ms as f64;
            let target = if time_ms.is_nan() { 0.0 } else { time_ms.clamp(0.0, end) };
            sim.clock.jump(target, now);
            sim.time_ms = target;
            sim.sent_beat = 0;
            sim.recompute_tempo();
        })
    }

    /// Give a simulator a different player number
    pub fn set_player(&self, id: SimId, player: u8) -> SimResult<()> {
        if !is_valid_player(player) {
            return Err(SimError::InvalidPlayer(player));
        }
        self.transact(|state, _now, events| {
            if state.live_mut(id).is_none() {
                return Ok(());
            }
            if state.player_taken(player, Some(id)) {
                return Err(SimError::PlayerInUse(player));
            }
            let Some(sim) = state.live_mut(id) else {
                return Ok(());
            };
            if sim.player == player {
                return Ok(());
            }

            let old = std::mem::replace(&mut sim.player, player);
            if let Some(track) = &sim.track {
                events.push(SimEvent::TrackChanged { player: old, signature: None });
                events.push(SimEvent::TrackChanged {
                    player,
                    signature: Some(track.signature.clone()),
                });
            }
            events.push(SimEvent::RegistryChanged);
            log::info!("{} moved from player {} to {}", id, old, player);
            Ok(())
        })
    }

    /// Begin shutting a simulator down
    ///
    /// Stops playback through the normal handoff path and releases master.
    /// The scheduler sends the final status and removes the entry on its
    /// next cycle. Closing an already closing or removed simulator does
    /// nothing.
    pub fn close(&self, id: SimId) {
        self.transact(|state, now, events| {
            let partial = match state.live_mut(id) {
                Some(sim) => sim.partial,
                None => return,
            };

            if partial {
                // Nothing was announced for it, so there is nothing to retract
                state.sims.remove(&id);
                events.push(SimEvent::RegistryChanged);
                log::info!("Removed simulator {} before a track was loaded", id);
                return;
            }

            master::stop_playing(&mut state.sims, id, now, Handoff::Normal);
            if let Some(sim) = state.sims.get_mut(&id) {
                sim.master = false;
                sim.closing = true;
                log::info!("Closing simulator {} (player {})", id, sim.player);
            }
        })
    }

    /// Shut every simulator down at once
    ///
    /// Used when the host goes online and real players take over. Each
    /// simulator is stopped on its own with master handoff suppressed.
    pub fn close_all(&self) {
        self.transact(|state, now, events| {
            let ids: Vec<SimId> = state.sims.keys().copied().collect();
            let mut removed = 0;
            for id in ids {
                let partial = match state.sims.get(&id) {
                    Some(sim) => sim.partial,
                    None => continue,
                };
                if partial {
                    state.sims.remove(&id);
                    removed += 1;
                    continue;
                }
                master::stop_playing(&mut state.sims, id, now, Handoff::Suppressed);
                if let Some(sim) = state.sims.get_mut(&id) {
                    sim.closing = true;
                }
            }
            if removed > 0 {
                events.push(SimEvent::RegistryChanged);
            }
            log::info!("Closing all {} simulator(s)", state.sims.len() + removed);
        })
    }

    /// Player numbers the given simulator could switch to (its own included)
    pub fn available_players(&self, excluding: Option<SimId>) -> Vec<u8> {
        self.read(|state| menu::available_players(&state.sims, excluding))
    }

    /// Player numbers no live simulator holds
    pub fn free_players(&self) -> Vec<u8> {
        self.available_players(None)
    }

    /// Tracks offered for loading
    pub fn available_tracks(&self) -> Vec<TrackChoice> {
        menu::available_tracks(self.provider())
    }

    /// Menu text for a track choice
    pub fn track_label(&self, choice: &TrackChoice) -> String {
        choice_label(choice, self.provider())
    }

    pub fn snapshot(&self, id: SimId) -> Option<SimulatorSnapshot> {
        self.read(|state| state.sims.get(&id).map(Simulator::snapshot))
    }

    /// Every simulator, in creation order
    pub fn snapshots(&self) -> Vec<SimulatorSnapshot> {
        self.read(|state| state.sims.values().map(Simulator::snapshot).collect())
    }

    pub fn has_simulators(&self) -> bool {
        self.read(|state| !state.sims.is_empty())
    }

    pub fn len(&self) -> usize {
        self.read(|state| state.sims.len())
    }

    pub fn is_empty(&self) -> bool {
        !self.has_simulators()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TrackError;
    use crate::sink::ChannelSink;
    use crate::track::TrackLibrary;
    use crossbeam::channel::Receiver;

    struct Fixture {
        registry: Registry,
        clock: Arc<ManualClock>,
        events: Receiver<SimEvent>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let (sink, events) = ChannelSink::unbounded("test");
        let registry = Registry::builder(Arc::new(TrackLibrary::new()))
            .sink(Arc::new(sink))
            .time_source(clock.clone())
            .build();
        Fixture { registry, clock, events }
    }

    fn loaded(registry: &Registry) -> SimId {
        let id = registry.create(None).unwrap();
        registry.attach_track(id, &TrackSelector::Sample(0)).unwrap();
        id
    }

    fn master_count(registry: &Registry) -> usize {
        registry.snapshots().iter().filter(|s| s.master).count()
    }

    #[test]
    fn test_create_assigns_lowest_free_player() {
        let f = fixture();
        let a = f.registry.create(None).unwrap();
        let b = f.registry.create(None).unwrap();
        assert_eq!(f.registry.snapshot(a).unwrap().player, 1);
        assert_eq!(f.registry.snapshot(b).unwrap().player, 2);
        assert!(f.registry.snapshot(a).unwrap().partial);

        f.registry.close(a);
        let c = f.registry.create(None).unwrap();
        assert_eq!(f.registry.snapshot(c).unwrap().player, 1);
    }

    #[test]
    fn test_seventh_create_fails() {
        let f = fixture();
        let ids: Vec<SimId> = (0..6).map(|_| f.registry.create(None).unwrap()).collect();
        let mut players: Vec<u8> = f.registry.snapshots().iter().map(|s| s.player).collect();
        players.sort();
        assert_eq!(players, vec![1, 2, 3, 4, 5, 6]);

        assert_eq!(f.registry.create(None), Err(SimError::NoFreePlayer));
        assert_eq!(f.registry.len(), 6);
        assert!(f.registry.free_players().is_empty());

        f.registry.close(ids[3]);
        assert_eq!(f.registry.free_players(), vec![4]);
    }

    #[test]
    fn test_create_with_requested_player() {
        let f = fixture();
        f.registry.create(Some(4)).unwrap();
        assert_eq!(f.registry.create(Some(4)), Err(SimError::PlayerInUse(4)));
        assert_eq!(f.registry.create(Some(0)), Err(SimError::InvalidPlayer(0)));
        assert_eq!(f.registry.create(Some(7)), Err(SimError::InvalidPlayer(7)));
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn test_closing_player_number_is_reusable() {
        let f = fixture();
        let a = loaded(&f.registry);
        f.registry.close(a);
        assert!(f.registry.snapshot(a).unwrap().closing);

        let b = f.registry.create(Some(1)).unwrap();
        assert_eq!(f.registry.snapshot(b).unwrap().player, 1);
    }

    #[test]
    fn test_attach_track_starts_at_first_cue() {
        let f = fixture();
        let id = loaded(&f.registry);
        let snap = f.registry.snapshot(id).unwrap();
        assert!(!snap.partial);
        assert_eq!(snap.time_ms, 120.0);
        assert_eq!(snap.display_tempo, 128.0);
        assert_eq!(snap.duration_ms, 180_000);

        let announced: Vec<SimEvent> = f.events.try_iter().collect();
        assert!(announced.contains(&SimEvent::TrackChanged {
            player: 1,
            signature: snap.signature.clone(),
        }));

        f.registry.attach_track(id, &TrackSelector::Sample(1)).unwrap();
        assert_eq!(f.registry.snapshot(id).unwrap().time_ms, 0.0);
    }

    #[test]
    fn test_failed_resolution_keeps_previous_track() {
        let f = fixture();
        let id = loaded(&f.registry);
        f.registry.seek(id, 5000.0);

        let err = f.registry.attach_track(id, &TrackSelector::Sample(5)).unwrap_err();
        assert_eq!(err, SimError::Track(TrackError::UnknownSample(5)));

        let snap = f.registry.snapshot(id).unwrap();
        assert_eq!(snap.title.as_deref(), Some("Sample Track 1"));
        assert_eq!(snap.time_ms, 5000.0);
    }

    #[test]
    fn test_stale_ids_are_ignored() {
        let f = fixture();
        let id = f.registry.create(None).unwrap();
        f.registry.close(id);
        assert!(f.registry.snapshot(id).is_none());

        f.registry.set_flag(id, SimFlag::Playing, true);
        f.registry.set_pitch(id, 1.2);
        f.registry.seek(id, 100.0);
        f.registry.close(id);
        assert!(f.registry.attach_track(id, &TrackSelector::Sample(0)).is_ok());
        assert!(f.registry.set_player(id, 3).is_ok());
        assert!(f.registry.is_empty());
    }

    #[test]
    fn test_seek_clamps_to_track() {
        let f = fixture();
        let id = loaded(&f.registry);
        f.registry.seek(id, -50.0);
        assert_eq!(f.registry.snapshot(id).unwrap().time_ms, 0.0);
        f.registry.seek(id, 1_000_000.0);
        assert_eq!(f.registry.snapshot(id).unwrap().time_ms, 180_000.0);
        f.registry.seek(id, f64::NAN);
        assert_eq!(f.registry.snapshot(id).unwrap().time_ms, 0.0);
    }

    #[test]
    fn test_pitch_is_clamped_and_scales_tempo() {
        let f = fixture();
        let id = loaded(&f.registry);
        f.registry.set_pitch(id, 3.0);
        let snap = f.registry.snapshot(id).unwrap();
        assert_eq!(snap.pitch, 1.5);
        assert_eq!(snap.display_tempo, 192.0);
    }

    #[test]
    fn test_start_without_playing_master_takes_master() {
        let f = fixture();
        let a = loaded(&f.registry);
        f.registry.set_flag(a, SimFlag::Playing, true);
        assert!(f.registry.snapshot(a).unwrap().master);

        f.registry.set_flag(a, SimFlag::Playing, false);
        assert_eq!(master_count(&f.registry), 0);
    }

    #[test]
    fn test_master_claim_then_stop_of_former_master() {
        let f = fixture();
        let a = loaded(&f.registry);
        let b = loaded(&f.registry);

        f.registry.set_flag(a, SimFlag::Playing, true);
        f.clock.advance_ms(100.0);
        f.registry.set_flag(b, SimFlag::Playing, true);
        assert!(f.registry.snapshot(a).unwrap().master);
        assert!(!f.registry.snapshot(b).unwrap().master);

        f.registry.set_flag(b, SimFlag::Master, true);
        assert!(!f.registry.snapshot(a).unwrap().master);
        assert!(f.registry.snapshot(b).unwrap().master);

        f.registry.set_flag(a, SimFlag::Playing, false);
        assert!(f.registry.snapshot(b).unwrap().master);
        assert_eq!(master_count(&f.registry), 1);
    }

    #[test]
    fn test_stopping_master_hands_off_to_playing_player() {
        let f = fixture();
        let a = loaded(&f.registry);
        let b = loaded(&f.registry);
        f.registry.set_flag(a, SimFlag::Playing, true);
        f.registry.set_flag(b, SimFlag::Playing, true);

        f.registry.set_flag(a, SimFlag::Playing, false);
        assert!(f.registry.snapshot(b).unwrap().master);
        assert!(!f.registry.snapshot(a).unwrap().master);
    }

    #[test]
    fn test_close_hands_off_master() {
        let f = fixture();
        let a = loaded(&f.registry);
        let b = loaded(&f.registry);
        f.registry.set_flag(a, SimFlag::Playing, true);
        f.registry.set_flag(b, SimFlag::Playing, true);

        f.registry.close(a);
        let snap = f.registry.snapshot(a).unwrap();
        assert!(snap.closing && !snap.playing && !snap.master);
        assert!(f.registry.snapshot(b).unwrap().master);
    }

    #[test]
    fn test_close_releases_idle_master() {
        let f = fixture();
        let a = loaded(&f.registry);
        f.registry.set_flag(a, SimFlag::Master, true);
        f.registry.close(a);
        assert_eq!(master_count(&f.registry), 0);
    }

    #[test]
    fn test_close_all_suppresses_handoff() {
        let f = fixture();
        let a = loaded(&f.registry);
        let b = loaded(&f.registry);
        let partial = f.registry.create(None).unwrap();
        f.registry.set_flag(a, SimFlag::Playing, true);
        f.registry.set_flag(b, SimFlag::Playing, true);

        f.registry.close_all();
        assert!(f.registry.snapshot(partial).is_none());
        let a_snap = f.registry.snapshot(a).unwrap();
        let b_snap = f.registry.snapshot(b).unwrap();
        assert!(a_snap.closing && !a_snap.playing && a_snap.master);
        assert!(b_snap.closing && !b_snap.playing && !b_snap.master);

        // Closing simulators ignore further user mutation
        f.registry.set_flag(b, SimFlag::Master, true);
        assert!(!f.registry.snapshot(b).unwrap().master);
    }

    #[test]
    fn test_set_player() {
        let f = fixture();
        let a = loaded(&f.registry);
        let b = f.registry.create(None).unwrap();
        f.events.try_iter().for_each(drop);

        assert_eq!(f.registry.set_player(a, 2), Err(SimError::PlayerInUse(2)));
        assert_eq!(f.registry.set_player(a, 9), Err(SimError::InvalidPlayer(9)));
        assert!(f.registry.set_player(a, 1).is_ok());
        assert!(f.events.try_iter().next().is_none());

        f.registry.set_player(a, 5).unwrap();
        let events: Vec<SimEvent> = f.events.try_iter().collect();
        assert_eq!(events[0], SimEvent::TrackChanged { player: 1, signature: None });
        assert_eq!(events[1].player(), Some(5));
        assert_eq!(f.registry.available_players(Some(b)), vec![1, 2, 3, 4, 6]);
    }

    #[test]
    fn test_available_tracks_include_samples() {
        let f = fixture();
        let choices = f.registry.available_tracks();
        assert_eq!(choices, vec![TrackChoice::Sample(0), TrackChoice::Sample(1)]);
        assert_eq!(f.registry.track_label(&choices[1]), "Sample 2: Sample Track 2");
    }

    #[test]
    fn test_set_player_on_removed_simulator_is_noop() {
        let f = fixture();
        let gone = f.registry.create(None).unwrap();
        f.registry.close(gone);
        f.registry.create(Some(2)).unwrap();

        assert_eq!(f.registry.set_player(gone, 2), Ok(()));
        assert_eq!(f.registry.len(), 1);
    }

    /// Records track associations and holds delivery of the first retraction
    /// until released
    struct GatedSink {
        seen: Mutex<Vec<(u8, Option<String>)>>,
        reached: Sender<()>,
        release: Receiver<()>,
    }

    impl EventSink for GatedSink {
        fn name(&self) -> &str {
            "gated"
        }

        fn deliver(&self, event: &SimEvent) -> anyhow::Result<()> {
            if let SimEvent::TrackChanged { player, signature } = event {
                let retraction = signature.is_none();
                self.seen
                    .lock()
                    .unwrap()
                    .push((*player, signature.clone()));
                if retraction {
                    self.reached.send(())?;
                    self.release.recv()?;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_events_reach_sinks_in_commit_order() {
        let clock = Arc::new(ManualClock::new());
        let (reached_tx, reached_rx) = crossbeam::channel::unbounded();
        let (release_tx, release_rx) = crossbeam::channel::unbounded();
        let sink = Arc::new(GatedSink {
            seen: Mutex::new(Vec::new()),
            reached: reached_tx,
            release: release_rx,
        });
        let registry = Registry::builder(Arc::new(TrackLibrary::new()))
            .sink(sink.clone())
            .time_source(clock.clone())
            .build();

        let old = loaded(&registry);
        registry.close(old);
        let new = registry.create(Some(1)).unwrap();

        // Teardown of the old simulator retracts player 1 while the new one
        // is still partial; its sink delivery stalls on the retraction
        let ticker = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.tick())
        };
        reached_rx.recv().unwrap();

        registry.attach_track(new, &TrackSelector::Sample(1)).unwrap();
        release_tx.send(()).unwrap();
        ticker.join().unwrap();

        let signature = registry.snapshot(new).unwrap().signature;
        assert_eq!(signature.as_deref(), Some("sample-5d27b3c4"));

        let seen = sink.seen.lock().unwrap().clone();
        assert_eq!(
            seen[seen.len() - 2..],
            [(1, None), (1, signature)],
            "downstream saw {:?}",
            seen
        );
    }
}
