//! Event delivery to downstream engines
//!
//! The trigger engine, the show engine and any presentation feedback receive
//! simulator output through the [`EventSink`] trait. Sinks are injected when
//! the registry is built and are called outside the registry lock, so a sink
//! may query the registry while handling an event.
//!
//! ```text
//! Registry transaction ──► outbox ──► deliver() ──┬─► trigger engine
//!                                                 ├─► show engine
//!                                                 └─► ChannelSink ─► UI
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::events::{BeatEvent, StatusEvent, TrackPosition};

/// Everything the simulator publishes
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A simulated player crossed a beat
    Beat { event: BeatEvent, position: TrackPosition },

    /// Periodic player status
    Status { event: StatusEvent, position: TrackPosition },

    /// The track associated with a player number changed; `None` when the
    /// player no longer has one
    TrackChanged { player: u8, signature: Option<String> },

    /// Simulators were added, removed or renumbered; menus need recomputing
    RegistryChanged,
}

impl SimEvent {
    /// Player number the event concerns, if any
    pub fn player(&self) -> Option<u8> {
        match self {
            SimEvent::Beat { event, .. } => Some(event.player),
            SimEvent::Status { event, .. } => Some(event.player),
            SimEvent::TrackChanged { player, .. } => Some(*player),
            SimEvent::RegistryChanged => None,
        }
    }
}

/// Receiver of simulator output
pub trait EventSink: Send + Sync {
    /// Name used when logging delivery failures
    fn name(&self) -> &str;

    /// Handle one event
    fn deliver(&self, event: &SimEvent) -> anyhow::Result<()>;
}

/// Hand events to every sink
///
/// A sink that returns an error or panics is logged and skipped; the
/// remaining sinks and events are still delivered.
pub fn deliver(sinks: &[Arc<dyn EventSink>], events: &[SimEvent]) {
    for event in events {
        for sink in sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.deliver(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("Event sink '{}' failed: {:#}", sink.name(), e);
                }
                Err(_) => {
                    log::error!("Event sink '{}' panicked while handling {:?}", sink.name(), event);
                }
            }
        }
    }
}

/// Sink that forwards events over a crossbeam channel
///
/// Lets a UI thread or a test drain simulator output at its own pace.
/// Bounded channels drop events when full rather than block the scheduler.
pub struct ChannelSink {
    name: String,
    sender: Sender<SimEvent>,
}

impl ChannelSink {
    /// Create an unbounded sink and its receiver
    pub fn unbounded(name: impl Into<String>) -> (Self, Receiver<SimEvent>) {
        let (sender, receiver) = crossbeam::channel::unbounded();
        (Self { name: name.into(), sender }, receiver)
    }

    /// Create a bounded sink and its receiver
    pub fn bounded(name: impl Into<String>, capacity: usize) -> (Self, Receiver<SimEvent>) {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        (Self { name: name.into(), sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, event: &SimEvent) -> anyhow::Result<()> {
        match self.sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::trace!("{}: channel full, dropping event", self.name);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                anyhow::bail!("receiver disconnected")
            }
        }
    }
}
