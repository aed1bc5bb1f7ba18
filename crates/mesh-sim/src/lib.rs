//! Mesh Sim - shallow CDJ player simulation
//!
//! Stands in for up to six real players when no hardware is on the network, so
//! show and trigger logic can be rehearsed offline. A simulated player has no
//! audio; it keeps a virtual playhead over a track's beat grid and publishes
//! the beat and status events a real player would.
//!
//! # Architecture
//!
//! ```text
//! UI thread ──► Registry operations ──┐
//!                                      ├─► Mutex<simulators> ──► Vec<SimEvent> ──► EventSink(s)
//! sim-scheduler thread ──► tick() ────┘
//! ```
//!
//! The [`Registry`] is the single write path. The [`Scheduler`] thread calls
//! [`Registry::tick`] every millisecond while simulators exist. Events are
//! delivered to the injected sinks after the registry lock is released.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod track;
pub mod types;

pub use clock::{ManualClock, MonotonicClock, PlayClock, TimeSource};
pub use config::SimulatorConfig;
pub use error::{SimError, SimResult, TrackError};
pub use events::{BeatEvent, StatusEvent, TrackPosition};
pub use registry::{Registry, RegistryBuilder, SimulatorSnapshot, TrackChoice};
pub use scheduler::Scheduler;
pub use sink::{ChannelSink, EventSink, SimEvent};
pub use track::{BeatGrid, TrackDescriptor, TrackLibrary, TrackProvider, TrackSelector};
pub use types::*;
