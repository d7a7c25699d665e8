use super::context::{LoopControl, SensorSlot, WorldContext, WorldInfo};
use super::registry::{SensorRegistry, WorldDirectory};
use super::sensor::{IoEvent, IoSender, Sensor, SensorId, WorldId, WorldState};
use super::timer_queue::{TimerKey, TimerQueue};
use crate::error_handling::types::ReactorError;
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

static NEXT_WORLD_ID: AtomicU32 = AtomicU32::new(1);

/// Cross-world traffic, consumed in arrival order.
pub enum WorldMessage<S: WorldState> {
    Attach {
        id: SensorId,
        sensor: Box<dyn Sensor<S>>,
    },
    Object {
        sensor: Option<SensorId>,
        msg: S::Message,
    },
    Wake,
    Stop,
}

/// Cloneable address of a world.
pub struct WorldHandle<S: WorldState> {
    info: Arc<WorldInfo>,
    tx: mpsc::UnboundedSender<WorldMessage<S>>,
}

impl<S: WorldState> Clone for WorldHandle<S> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<S: WorldState> WorldHandle<S> {
    pub fn id(&self) -> WorldId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    fn post(&self, msg: WorldMessage<S>) -> Result<(), ReactorError> {
        self.tx
            .send(msg)
            .map_err(|_| ReactorError::WorldGone(self.info.name.clone()))
    }

    /// Message for the world state.
    pub fn send_message(&self, msg: S::Message) -> Result<(), ReactorError> {
        self.post(WorldMessage::Object { sensor: None, msg })
    }

    /// Message for one sensor; dropped on arrival if the sensor is gone.
    pub fn send_to(&self, sensor: SensorId, msg: S::Message) -> Result<(), ReactorError> {
        self.post(WorldMessage::Object {
            sensor: Some(sensor),
            msg,
        })
    }

    pub fn attach_sensor(&self, id: SensorId, sensor: Box<dyn Sensor<S>>) -> Result<(), ReactorError> {
        self.post(WorldMessage::Attach { id, sensor })
    }

    pub fn wake(&self) -> Result<(), ReactorError> {
        self.post(WorldMessage::Wake)
    }

    pub fn stop(&self) -> Result<(), ReactorError> {
        self.post(WorldMessage::Stop)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct LoopExit<S> {
    pub code: i32,
    pub state: S,
}

enum Notification<S: WorldState> {
    Io(SensorId, IoEvent),
    Timer(TimerKey),
    Message(Option<SensorId>, S::Message),
    Attach(SensorId, Box<dyn Sensor<S>>),
}

enum Wakeup<S: WorldState> {
    Inbox(Option<WorldMessage<S>>),
    Io(Option<(SensorId, IoEvent)>),
    Deadline,
}

/// Single-threaded event loop owning one world state and its sensors.
///
/// Every tick waits for the inbox, the IO channel or the next timer deadline, then
/// collects everything ready into a FIFO notify queue and dispatches it. Handlers
/// never run concurrently within one world.
pub struct EventLoop<S: WorldState> {
    info: Arc<WorldInfo>,
    state: S,
    sensors: HashMap<SensorId, SensorSlot<S>>,
    timers: TimerQueue<S::Timer>,
    inbox: mpsc::UnboundedReceiver<WorldMessage<S>>,
    handle: WorldHandle<S>,
    io: IoSender,
    io_rx: mpsc::UnboundedReceiver<(SensorId, IoEvent)>,
    notify: VecDeque<Notification<S>>,
    control: LoopControl<S>,
}

impl<S: WorldState> EventLoop<S> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        let info = Arc::new(WorldInfo {
            id: WorldId(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
        });
        let (tx, inbox) = mpsc::unbounded_channel();
        let (io, io_rx) = IoSender::channel();
        Self {
            handle: WorldHandle {
                info: info.clone(),
                tx,
            },
            info,
            state,
            sensors: HashMap::new(),
            timers: TimerQueue::new(),
            inbox,
            io,
            io_rx,
            notify: VecDeque::new(),
            control: LoopControl::default(),
        }
    }

    pub fn handle(&self) -> WorldHandle<S> {
        self.handle.clone()
    }

    pub fn io_sender(&self) -> IoSender {
        self.io.clone()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Runs `f` as a world-level handler, e.g. to register sensors before the loop starts.
    pub fn with_context<R>(&mut self, f: impl FnOnce(&mut S, &mut WorldContext<'_, S>) -> R) -> R {
        let mut ctx = WorldContext {
            info: &self.info,
            current: SensorId::WORLD,
            sensors: &mut self.sensors,
            timers: &mut self.timers,
            io: &self.io,
            handle: &self.handle,
            control: &mut self.control,
        };
        f(&mut self.state, &mut ctx)
    }

    pub fn is_running(&self) -> bool {
        self.control.running
    }

    /// One tick: waits for the next wakeup, then dispatches everything ready.
    pub async fn turn(&mut self) {
        let wakeup = self.wait().await;
        self.collect(wakeup);
        while let Some(notification) = self.notify.pop_front() {
            self.dispatch(notification);
        }
    }

    pub async fn run(mut self) -> LoopExit<S> {
        info!("[reactor] World {} ({}) running", self.info.name, self.info.id);
        while self.control.running {
            self.turn().await;
        }

        self.with_context(|state, ctx| state.on_stop(ctx));
        let registry = SensorRegistry::global();
        for id in self.sensors.keys() {
            registry.remove(*id);
        }
        self.sensors.clear();
        info!(
            "[reactor] World {} stopped with code {}",
            self.info.name, self.control.exit_code
        );
        LoopExit {
            code: self.control.exit_code,
            state: self.state,
        }
    }

    /// Runs the loop on a dedicated thread with its own current-thread runtime.
    pub fn spawn(self, directory: &WorldDirectory) -> Result<WorldHandle<S>, ReactorError> {
        let handle = self.handle();
        let name = self.info.name.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let _ = ready_tx.send(Ok(()));
                        runtime
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return -1;
                    }
                };
                runtime.block_on(self.run()).code
            })
            .map_err(ReactorError::ThreadSpawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(ReactorError::RuntimeBuild(e));
            }
            Err(_) => return Err(ReactorError::JoinFailed(name)),
        }

        directory.insert(handle.id(), name, thread);
        Ok(handle)
    }

    async fn wait(&mut self) -> Wakeup<S> {
        let deadline = self.timers.next_deadline();
        let sleep = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            msg = self.inbox.recv() => Wakeup::Inbox(msg),
            event = self.io_rx.recv() => Wakeup::Io(event),
            _ = sleep => Wakeup::Deadline,
        }
    }

    fn collect(&mut self, wakeup: Wakeup<S>) {
        match wakeup {
            Wakeup::Inbox(Some(msg)) => self.accept(msg),
            Wakeup::Io(Some((id, event))) => self.notify.push_back(Notification::Io(id, event)),
            _ => {}
        }
        while let Ok(msg) = self.inbox.try_recv() {
            self.accept(msg);
        }
        while let Ok((id, event)) = self.io_rx.try_recv() {
            self.notify.push_back(Notification::Io(id, event));
        }
        for key in self.timers.expired(Instant::now()) {
            self.notify.push_back(Notification::Timer(key));
        }
    }

    fn accept(&mut self, msg: WorldMessage<S>) {
        match msg {
            WorldMessage::Attach { id, sensor } => {
                self.notify.push_back(Notification::Attach(id, sensor))
            }
            WorldMessage::Object { sensor, msg } => {
                self.notify.push_back(Notification::Message(sensor, msg))
            }
            WorldMessage::Wake => {}
            WorldMessage::Stop => self.control.running = false,
        }
    }

    fn dispatch(&mut self, notification: Notification<S>) {
        match notification {
            Notification::Attach(id, sensor) => {
                let slot = SensorSlot::new(sensor);
                SensorRegistry::global().insert(id, self.info.id, &slot.name);
                debug!("[reactor] {} attached {} ({})", self.info.name, slot.name, id);
                self.sensors.insert(id, slot);
            }
            Notification::Io(id, IoEvent::Signal(kind)) => {
                self.deliver(id, |sensor, state, ctx| sensor.on_signal(state, ctx, kind))
            }
            Notification::Io(id, event) => {
                self.deliver(id, |sensor, state, ctx| sensor.on_io(state, ctx, event))
            }
            Notification::Timer(key) => {
                // Cancelled after collection.
                let Some((id, timer)) = self.timers.take(key) else {
                    return;
                };
                if id == SensorId::WORLD {
                    self.with_context(|state, ctx| state.on_timer(ctx, key, timer));
                } else {
                    self.deliver(id, |sensor, state, ctx| sensor.on_timer(state, ctx, key, timer));
                }
            }
            Notification::Message(None, msg) | Notification::Message(Some(SensorId::WORLD), msg) => {
                self.with_context(|state, ctx| state.on_message(ctx, msg))
            }
            Notification::Message(Some(id), msg) => {
                self.deliver(id, |sensor, state, ctx| sensor.on_message(state, ctx, msg))
            }
        }
    }

    fn deliver<F>(&mut self, id: SensorId, f: F)
    where
        F: FnOnce(&mut dyn Sensor<S>, &mut S, &mut WorldContext<'_, S>),
    {
        let taken = match self.sensors.get_mut(&id) {
            Some(slot) if slot.enabled => slot.sensor.take(),
            _ => None,
        };
        let Some(mut sensor) = taken else {
            debug!("[reactor] {} dropped event for {}", self.info.name, id);
            return;
        };

        self.control.current_removed = false;
        self.control.detach_current = None;
        let mut ctx = WorldContext {
            info: &self.info,
            current: id,
            sensors: &mut self.sensors,
            timers: &mut self.timers,
            io: &self.io,
            handle: &self.handle,
            control: &mut self.control,
        };
        f(sensor.as_mut(), &mut self.state, &mut ctx);

        if let Some(target) = self.control.detach_current.take() {
            if let Err(e) = target.attach_sensor(id, sensor) {
                warn!("[reactor] {} could not hand over {}: {}", self.info.name, id, e);
            }
            return;
        }
        if self.control.current_removed {
            return;
        }
        if let Some(slot) = self.sensors.get_mut(&id) {
            slot.sensor = Some(sensor);
        }
    }
}
