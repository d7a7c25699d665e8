//! Startup of the main world: directories, database, worker worlds, listeners
//! and timers, in that order.

use super::sensors::{install_signals, ActiveLinkSensor, ListenerSensor};
use super::state::{launch_sink, persist_sink, Ctx, MainSink, ServerState, ServerTimer, HEALTH_INTERVAL};
use crate::configuration::config::ServerSettings;
use crate::configuration::types::ServerRole;
use crate::entity_store::store::{ApplyMode, EntityStore};
use crate::error_handling::types::ServerError;
use crate::logging::{LogRotation, SharedLogFile};
use crate::mmc_pipeline::{MmcWorlds, MsgIdCounter, GARBAGE_LONG, GARBAGE_SHORT};
use crate::process_supervision::{LauncherLink, RemoteLauncher};
use crate::reactor::{EventLoop, SensorId, SensorRegistry, WorldDirectory};
use crate::session_management::GroupKind;
use crate::storage::{ConfigDatabase, PersistLink};
use crate::transport::{ListenAddr, ListenSocket};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

pub const LISTEN_BACKLOG: u32 = 128;

/// Spawns the writer, launcher and MMC pipeline worlds of an Active server, each
/// reporting back to `event_loop` through its handle.
pub fn attach_workers(
    event_loop: &mut EventLoop<ServerState>,
    db: Arc<dyn ConfigDatabase>,
    launcher: Arc<dyn RemoteLauncher>,
    directory: &WorldDirectory,
) -> Result<(), ServerError> {
    let counter = MsgIdCounter::restore(db.clone())?;
    info!("[mmc] Message ids resume after {}", counter.last());
    let persist = PersistLink::spawn(db, persist_sink(event_loop.handle()), directory)?;
    let launcher = LauncherLink::spawn(launcher, launch_sink(event_loop.handle()), directory)?;
    let worlds = MmcWorlds::spawn(
        event_loop.state().queues.clone(),
        counter,
        Arc::new(MainSink(event_loop.handle())),
        directory,
    )?;
    let state = event_loop.state_mut();
    state.hub.set_persist(persist);
    state.launcher = Some(launcher);
    state.pipeline = Some(worlds);
    Ok(())
}

/// The main world plus the directory of every worker world it spawned.
pub struct ServerWorld {
    event_loop: EventLoop<ServerState>,
    directory: WorldDirectory,
}

impl ServerWorld {
    pub fn app_start(
        settings: ServerSettings,
        db: Arc<dyn ConfigDatabase>,
        launcher: Arc<dyn RemoteLauncher>,
        log_file: Option<SharedLogFile>,
    ) -> Result<Self, ServerError> {
        settings.layout.ensure_directories()?;
        let role = settings.role;
        info!("[server] Starting {} as {}", settings.name, role);

        let store = match role {
            ServerRole::Active => {
                let (store, rejected) = EntityStore::from_records(db.load_all()?, ApplyMode::Authoritative);
                if !rejected.is_empty() {
                    warn!("[store] {} stored rows were skipped", rejected.len());
                }
                store
            }
            // the active peer sends the full state once connected
            ServerRole::Standby => EntityStore::new(),
        };

        let mut state = ServerState::new(settings, store);
        state.log_file = log_file;
        let mut event_loop = EventLoop::new("main", state);
        let directory = WorldDirectory::new();

        if role == ServerRole::Active {
            attach_workers(&mut event_loop, db, launcher, &directory)?;
        }

        let booted = event_loop.with_context(|state, ctx| state.boot(ctx));
        if let Err(e) = booted {
            error!("[server] Startup failed: {}", e);
            event_loop.state_mut().stop_workers();
            directory.join_all();
            return Err(e);
        }
        Ok(Self {
            event_loop,
            directory,
        })
    }

    pub fn state(&self) -> &ServerState {
        self.event_loop.state()
    }

    /// Serves until a signal stops the main world, then joins the workers.
    pub async fn run(self) -> i32 {
        let exit = self.event_loop.run().await;
        for (name, joined) in self.directory.join_all() {
            if let Err(e) = joined {
                warn!("[server] World {} did not stop cleanly: {}", name, e);
            }
        }
        exit.code
    }
}

fn tcp_addr(bind: &str, port: u16) -> Result<ListenAddr, ServerError> {
    format!("{}:{}", bind, port)
        .parse::<SocketAddr>()
        .map(ListenAddr::Tcp)
        .map_err(|e| ServerError::InitializationFailed(format!("bad listen address {}:{}: {}", bind, port, e)))
}

impl ServerState {
    fn boot(&mut self, ctx: &mut Ctx<'_>) -> Result<(), ServerError> {
        match self.settings.role {
            ServerRole::Active => self.bind_listeners(ctx)?,
            ServerRole::Standby => {
                let bind = self.settings.bind_address.clone();
                self.listen(ctx, GroupKind::Gui, tcp_addr(&bind, self.settings.ports.gui)?)?;
                let link = SensorRegistry::global().allocate();
                ctx.register_with_id(link, Box::new(ActiveLinkSensor::new(link)));
                self.active_link = Some(link);
                self.reconnect_active(ctx);
            }
        }
        install_signals(ctx)?;

        let rotation = LogRotation::new(self.settings.log_cycle);
        ctx.set_timer_for(SensorId::WORLD, rotation.delay_from_now(), ServerTimer::LogRotate);
        ctx.set_timer_for(SensorId::WORLD, HEALTH_INTERVAL, ServerTimer::HealthSnapshot);
        ctx.set_timer_for(SensorId::WORLD, GARBAGE_SHORT, ServerTimer::GarbageShort);
        ctx.set_timer_for(SensorId::WORLD, GARBAGE_LONG, ServerTimer::GarbageLong);

        if self.settings.role == ServerRole::Active {
            self.start_configured_children(ctx);
        }
        self.publish_own_status(ctx);
        Ok(())
    }

    fn bind_listeners(&mut self, ctx: &mut Ctx<'_>) -> Result<(), ServerError> {
        let bind = self.settings.bind_address.clone();
        let ports = self.settings.ports.clone();
        let layout = self.settings.layout.clone();
        let order = [
            (GroupKind::External, tcp_addr(&bind, ports.external)?),
            (GroupKind::Mmc, ListenAddr::Unix(layout.mmc_listen_path())),
            (GroupKind::RuleDownloader, ListenAddr::Unix(layout.rule_downloader_listen_path())),
            (GroupKind::Manager, tcp_addr(&bind, ports.manager)?),
            (GroupKind::DataHandler, tcp_addr(&bind, ports.datahandler)?),
            (GroupKind::SubProc, tcp_addr(&bind, ports.subproc)?),
            (GroupKind::Gui, tcp_addr(&bind, ports.gui)?),
            (GroupKind::Sims, tcp_addr(&bind, ports.sims)?),
            (GroupKind::Netfinder, ListenAddr::Unix(layout.netfinder_listen_path())),
            (GroupKind::StandbyPeer, tcp_addr(&bind, ports.standby)?),
            (GroupKind::RouterInfo, tcp_addr(&bind, ports.router_info)?),
        ];
        for (kind, addr) in order {
            self.listen(ctx, kind, addr)?;
        }
        Ok(())
    }

    pub fn listen(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, addr: ListenAddr) -> Result<(), ServerError> {
        let id = SensorRegistry::global().allocate();
        let socket = ListenSocket::listen(addr, LISTEN_BACKLOG, id, ctx.io_sender())?;
        ctx.register_with_id(id, Box::new(ListenerSensor::new(kind)));
        info!("[server] {} listening on {}", kind, socket.local_addr());
        self.listeners.push(socket);
        Ok(())
    }
}
