use super::event_loop::WorldHandle;
use super::registry::SensorRegistry;
use super::sensor::{IoSender, Sensor, SensorId, WorldId, WorldState};
use super::timer_queue::{TimerKey, TimerQueue};
use crate::error_handling::types::ReactorError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct WorldInfo {
    pub id: WorldId,
    pub name: String,
}

pub(crate) struct SensorSlot<S: WorldState> {
    /// Empty while the sensor's own handler is running.
    pub sensor: Option<Box<dyn Sensor<S>>>,
    pub enabled: bool,
    pub name: String,
}

impl<S: WorldState> SensorSlot<S> {
    pub fn new(sensor: Box<dyn Sensor<S>>) -> Self {
        Self {
            name: sensor.name().to_string(),
            sensor: Some(sensor),
            enabled: true,
        }
    }
}

pub(crate) struct LoopControl<S: WorldState> {
    pub running: bool,
    pub exit_code: i32,
    pub current_removed: bool,
    pub detach_current: Option<WorldHandle<S>>,
}

impl<S: WorldState> Default for LoopControl<S> {
    fn default() -> Self {
        Self {
            running: true,
            exit_code: 0,
            current_removed: false,
            detach_current: None,
        }
    }
}

/// What a handler may do to its world while it runs.
pub struct WorldContext<'a, S: WorldState> {
    pub(crate) info: &'a WorldInfo,
    pub(crate) current: SensorId,
    pub(crate) sensors: &'a mut HashMap<SensorId, SensorSlot<S>>,
    pub(crate) timers: &'a mut TimerQueue<S::Timer>,
    pub(crate) io: &'a IoSender,
    pub(crate) handle: &'a WorldHandle<S>,
    pub(crate) control: &'a mut LoopControl<S>,
}

impl<'a, S: WorldState> WorldContext<'a, S> {
    /// Sensor whose handler is running, [`SensorId::WORLD`] for state handlers.
    pub fn current_sensor(&self) -> SensorId {
        self.current
    }

    pub fn world_id(&self) -> WorldId {
        self.info.id
    }

    pub fn world_name(&self) -> &str {
        &self.info.name
    }

    pub fn register(&mut self, sensor: Box<dyn Sensor<S>>) -> SensorId {
        let id = SensorRegistry::global().allocate();
        self.register_with_id(id, sensor);
        id
    }

    /// Registers under an id allocated beforehand with [`SensorRegistry::allocate`].
    pub fn register_with_id(&mut self, id: SensorId, sensor: Box<dyn Sensor<S>>) {
        let slot = SensorSlot::new(sensor);
        SensorRegistry::global().insert(id, self.info.id, &slot.name);
        self.sensors.insert(id, slot);
    }

    /// Removes a sensor and its timers. Unregistering the running sensor takes effect
    /// when its handler returns.
    pub fn unregister(&mut self, id: SensorId) -> bool {
        if id == SensorId::WORLD {
            return false;
        }
        let existed = self.sensors.remove(&id).is_some();
        if existed {
            self.timers.cancel_sensor(id);
            SensorRegistry::global().remove(id);
        }
        if id == self.current {
            self.control.current_removed = true;
        }
        existed
    }

    pub fn is_registered(&self, id: SensorId) -> bool {
        self.sensors.contains_key(&id)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Disabled sensors stay registered but their events are dropped.
    pub fn set_enabled(&mut self, id: SensorId, enabled: bool) -> bool {
        match self.sensors.get_mut(&id) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Hands a sensor over to another world of the same kind. Timers do not follow it.
    pub fn detach(&mut self, id: SensorId, target: &WorldHandle<S>) -> Result<(), ReactorError> {
        let slot = self
            .sensors
            .remove(&id)
            .ok_or_else(|| ReactorError::UnknownSensor(id.to_string()))?;
        self.timers.cancel_sensor(id);
        if id == self.current {
            self.control.current_removed = true;
            self.control.detach_current = Some(target.clone());
            return Ok(());
        }
        match slot.sensor {
            Some(sensor) => target.attach_sensor(id, sensor),
            None => Err(ReactorError::UnknownSensor(id.to_string())),
        }
    }

    /// One-shot timer for the running sensor.
    pub fn set_timer(&mut self, after: Duration, timer: S::Timer) -> TimerKey {
        self.set_timer_for(self.current, after, timer)
    }

    pub fn set_timer_for(&mut self, sensor: SensorId, after: Duration, timer: S::Timer) -> TimerKey {
        self.timers.set(sensor, Instant::now() + after, timer)
    }

    pub fn cancel_timer(&mut self, key: TimerKey) -> Option<S::Timer> {
        self.timers.cancel(key)
    }

    pub fn cancel_all_timers(&mut self, sensor: SensorId) -> usize {
        self.timers.cancel_sensor(sensor)
    }

    pub fn timer_pending(&self, key: TimerKey) -> bool {
        self.timers.contains(key)
    }

    pub fn io_sender(&self) -> IoSender {
        self.io.clone()
    }

    pub fn handle(&self) -> WorldHandle<S> {
        self.handle.clone()
    }

    /// Leaves the loop after the current tick.
    pub fn stop(&mut self) {
        self.control.running = false;
    }

    pub fn exit(&mut self, code: i32) {
        self.control.exit_code = code;
        self.control.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.control.running
    }
}
