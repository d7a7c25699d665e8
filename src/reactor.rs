//! Sensor/world reactor.
//!
//! A world is one event loop with its own state, sensors and timers. The main world runs
//! on the process runtime; every other world gets a thread with a current-thread runtime.
//! Worlds talk only through [`WorldHandle`] messages.

pub mod context;
pub mod event_loop;
pub mod registry;
pub mod sensor;
pub mod signal;
#[cfg(test)]
pub mod tests;
pub mod timer_queue;

pub use context::WorldContext;
pub use event_loop::{EventLoop, LoopExit, WorldHandle, WorldMessage};
pub use registry::{SensorRegistry, WorldDirectory};
pub use sensor::{IoEvent, IoSender, Sensor, SensorId, WorldId, WorldState};
pub use signal::{SignalKind, SignalSensor};
pub use timer_queue::{TimerKey, TimerQueue};
