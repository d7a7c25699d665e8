use super::context::WorldContext;
use super::signal::SignalKind;
use super::timer_queue::TimerKey;
use crate::transport::packet::Packet;
use crate::transport::socket::{CloseReason, SocketStream};
use std::fmt;
use tokio::sync::mpsc;

/// Process-wide sensor identity; stable across cross-world handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(pub(crate) u64);

impl SensorId {
    /// Pseudo sensor standing for the world state itself.
    pub const WORLD: SensorId = SensorId(0);

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(pub(crate) u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world-{}", self.0)
    }
}

/// Readiness reported by IO tasks to the owning world.
#[derive(Debug)]
pub enum IoEvent {
    Accepted { stream: SocketStream, peer: String },
    Connected { stream: SocketStream, peer: String },
    ConnectFailed(String),
    Packets(Vec<Packet>),
    Closed(CloseReason),
    Signal(SignalKind),
}

/// Sending half of a world's IO channel, handed to reader, accept and signal tasks.
#[derive(Debug, Clone)]
pub struct IoSender {
    tx: mpsc::UnboundedSender<(SensorId, IoEvent)>,
}

impl IoSender {
    pub fn channel() -> (IoSender, mpsc::UnboundedReceiver<(SensorId, IoEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IoSender { tx }, rx)
    }

    /// Returns false once the world is gone.
    pub fn send(&self, sensor: SensorId, event: IoEvent) -> bool {
        self.tx.send((sensor, event)).is_ok()
    }
}

/// State owned by one world; handlers get `&mut` access while they run.
pub trait WorldState: Sized + Send + 'static {
    type Message: Send + 'static;
    type Timer: Send + 'static;

    /// Cross-world message addressed to the world rather than a sensor.
    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, msg: Self::Message) {
        let _ = (ctx, msg);
    }

    /// Timer armed on [`SensorId::WORLD`].
    fn on_timer(&mut self, ctx: &mut WorldContext<'_, Self>, key: TimerKey, timer: Self::Timer) {
        let _ = (ctx, key, timer);
    }

    fn on_stop(&mut self, ctx: &mut WorldContext<'_, Self>) {
        let _ = ctx;
    }
}

/// Event handler registered in a world.
pub trait Sensor<S: WorldState>: Send {
    fn name(&self) -> &str;

    fn on_io(&mut self, state: &mut S, ctx: &mut WorldContext<'_, S>, event: IoEvent) {
        let _ = (state, ctx, event);
    }

    fn on_timer(&mut self, state: &mut S, ctx: &mut WorldContext<'_, S>, key: TimerKey, timer: S::Timer) {
        let _ = (state, ctx, key, timer);
    }

    fn on_message(&mut self, state: &mut S, ctx: &mut WorldContext<'_, S>, msg: S::Message) {
        let _ = (state, ctx, msg);
    }

    fn on_signal(&mut self, state: &mut S, ctx: &mut WorldContext<'_, S>, signal: SignalKind) {
        let _ = (state, ctx, signal);
    }
}
