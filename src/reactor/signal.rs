use super::context::WorldContext;
use super::registry::SensorRegistry;
use super::sensor::{IoEvent, IoSender, Sensor, SensorId, WorldState};
use crate::error_handling::types::ReactorError;
use std::marker::PhantomData;
use tokio::signal::unix::{signal, SignalKind as UnixSignal};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Child,
    Hangup,
}

impl SignalKind {
    fn as_unix(&self) -> UnixSignal {
        match self {
            SignalKind::Interrupt => UnixSignal::interrupt(),
            SignalKind::Terminate => UnixSignal::terminate(),
            SignalKind::Child => UnixSignal::child(),
            SignalKind::Hangup => UnixSignal::hangup(),
        }
    }
}

/// Forwards every delivery of `kind` to `sensor` as an [`IoEvent::Signal`].
/// Must be called from inside the world's runtime.
pub fn watch_signal(kind: SignalKind, sensor: SensorId, io: IoSender) -> Result<JoinHandle<()>, ReactorError> {
    let mut stream = signal(kind.as_unix()).map_err(ReactorError::SignalInstall)?;
    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if !io.send(sensor, IoEvent::Signal(kind)) {
                break;
            }
        }
    }))
}

/// Sensor running a closure for each process signal it watches.
pub struct SignalSensor<S, F> {
    watchers: Vec<JoinHandle<()>>,
    handler: F,
    _state: PhantomData<fn(&mut S)>,
}

impl<S, F> SignalSensor<S, F>
where
    S: WorldState,
    F: FnMut(&mut S, &mut WorldContext<'_, S>, SignalKind) + Send + 'static,
{
    pub fn install(
        ctx: &mut WorldContext<'_, S>,
        kinds: &[SignalKind],
        handler: F,
    ) -> Result<SensorId, ReactorError> {
        let id = SensorRegistry::global().allocate();
        let mut watchers = Vec::with_capacity(kinds.len());
        for kind in kinds {
            match watch_signal(*kind, id, ctx.io_sender()) {
                Ok(watcher) => watchers.push(watcher),
                Err(e) => {
                    watchers.iter().for_each(|w| w.abort());
                    return Err(e);
                }
            }
        }
        ctx.register_with_id(
            id,
            Box::new(SignalSensor {
                watchers,
                handler,
                _state: PhantomData,
            }),
        );
        Ok(id)
    }
}

impl<S, F> Sensor<S> for SignalSensor<S, F>
where
    S: WorldState,
    F: FnMut(&mut S, &mut WorldContext<'_, S>, SignalKind) + Send + 'static,
{
    fn name(&self) -> &str {
        "signals"
    }

    fn on_signal(&mut self, state: &mut S, ctx: &mut WorldContext<'_, S>, signal: SignalKind) {
        (self.handler)(state, ctx, signal)
    }
}

impl<S, F> Drop for SignalSensor<S, F> {
    fn drop(&mut self) {
        for watcher in &self.watchers {
            watcher.abort();
        }
    }
}
