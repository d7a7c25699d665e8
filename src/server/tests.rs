#[cfg(test)]
mod tests {
    use crate::configuration::config::{ListenPorts, ServerSettings};
    use crate::configuration::layout::RuntimeLayout;
    use crate::configuration::types::{LogCycle, ServerRole};
    use crate::entity_store::store::{ApplyMode, EntityStore};
    use crate::entity_store::types::*;
    use crate::error_handling::types::StoreError;
    use crate::mmc_pipeline::{not_routable_message, MAX_CONSECUTIVE_FAILURES};
    use crate::process_supervision::ProcessKind;
    use crate::protocol::messages::*;
    use crate::protocol::msg_id::*;
    use crate::protocol::session_type::SessionType;
    use crate::reactor::{EventLoop, SensorId, WorldDirectory};
    use crate::server::boot::attach_workers;
    use crate::server::state::{ServerState, ServerTimer};
    use crate::session_management::GroupKind;
    use crate::storage::ConfigDatabase;
    use crate::test_support::{MemoryDatabase, RecordingLauncher};
    use crate::transport::{CloseReason, FrameDecoder, Packet, SocketStream};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    fn manager(id: &str, setting: SettingStatus) -> EntityRecord {
        EntityRecord::Manager(Manager {
            manager_id: id.to_string(),
            ip: "10.0.0.1".to_string(),
            ssh_id: "naa".to_string(),
            ssh_pass: "pw".to_string(),
            status: StatusTriad::new(setting),
        })
    }

    fn connector(manager_id: &str, id: &str, ne: &str) -> EntityRecord {
        EntityRecord::Connector(Connector {
            connector_id: id.to_string(),
            manager_id: manager_id.to_string(),
            rule_id: "rule-1".to_string(),
            ne_name: ne.to_string(),
            log_cycle: LogCycle::default(),
            description: String::new(),
            status: StatusTriad::new(SettingStatus::Start),
        })
    }

    fn command_port(manager_id: &str, connector_id: &str, sequence: u32) -> EntityRecord {
        EntityRecord::Connection(Connection {
            sequence,
            connector_id: connector_id.to_string(),
            manager_id: manager_id.to_string(),
            port_no: 7000 + sequence as u16,
            protocol_type: ProtocolType::Tcp,
            port_type: PortType::Server,
            command_port_flag: true,
            cur_status: CurStatus::Stop,
            request_status: RequestStatus::WaitNo,
        })
    }

    fn authority(name: &str) -> EntityRecord {
        EntityRecord::CommandAuthority(CommandAuthority {
            name: name.to_string(),
            priority: 3,
            max_cmd_queue: 10,
            max_session_cnt: 2,
            ack_mode: true,
            log_mode: 0,
            status: StatusTriad::new(SettingStatus::Start),
        })
    }

    /// One manager `m1` fronting `NE1` through a command port, plus the `ops` authority.
    fn routed_records() -> Vec<EntityRecord> {
        vec![
            manager("m1", SettingStatus::Stop),
            connector("m1", "c1", "NE1"),
            command_port("m1", "c1", 1),
            authority("ops"),
        ]
    }

    fn settings(role: ServerRole, dir: &TempDir) -> ServerSettings {
        ServerSettings {
            role,
            name: "as1".to_string(),
            log_cycle: LogCycle::default(),
            bind_address: "127.0.0.1".to_string(),
            advertise_ip: "127.0.0.1".to_string(),
            ports: ListenPorts {
                external: 0,
                manager: 9100,
                datahandler: 9101,
                subproc: 9102,
                gui: 9103,
                sims: 0,
                standby: 0,
                router_info: 0,
            },
            active_peer: None,
            alive_interval: Duration::from_secs(10),
            alive_limit: 3,
            max_data_buf_size: 1 << 20,
            mmc_response_timeout: Duration::from_secs(30),
            mmc_result_horizon: Duration::from_secs(600),
            db_url: "sqlite::memory:".to_string(),
            remote_bin_dir: "/home/naa/NAA/Bin".to_string(),
            layout: RuntimeLayout::new(dir.path(), "NAA"),
        }
    }

    /// Far end of a session, with its own frame decoder.
    struct Remote {
        stream: UnixStream,
        decoder: FrameDecoder,
    }

    impl Remote {
        async fn read_packet(&mut self) -> Packet {
            let mut buf = [0u8; 8192];
            loop {
                if let Some(packet) = self.decoder.next_packet().unwrap() {
                    return packet;
                }
                let n = tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut buf))
                    .await
                    .expect("no packet within 2s")
                    .unwrap();
                assert!(n > 0, "server closed the session");
                self.decoder.push(&buf[..n]);
            }
        }

        /// Drains whatever is left and returns the msg ids seen before EOF.
        async fn read_to_close(&mut self) -> Vec<u32> {
            let mut seen = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                while let Some(packet) = self.decoder.next_packet().unwrap() {
                    seen.push(packet.msg_id);
                }
                let n = tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut buf))
                    .await
                    .expect("session still open after 2s")
                    .unwrap_or(0);
                if n == 0 {
                    return seen;
                }
                self.decoder.push(&buf[..n]);
            }
        }

        /// Writes a frame to the server over the session's own socket.
        async fn send<T: Serialize>(&mut self, msg_id: u32, body: &T) {
            let frame = Packet::json(msg_id, body).unwrap().encode();
            self.stream.write_all(&frame).await.unwrap();
        }
    }

    /// The main world under test plus the real writer, launcher and pipeline
    /// worlds of an Active server. The main world only runs while a test pumps it.
    struct Harness {
        world: EventLoop<ServerState>,
        directory: WorldDirectory,
        db: Arc<MemoryDatabase>,
        launcher: Arc<RecordingLauncher>,
        _dir: TempDir,
    }

    impl Harness {
        fn new(role: ServerRole, records: Vec<EntityRecord>) -> Self {
            Self::with_settings(role, records, |_| {})
        }

        fn with_settings(role: ServerRole, records: Vec<EntityRecord>, tune: impl FnOnce(&mut ServerSettings)) -> Self {
            let dir = TempDir::new().unwrap();
            let db = Arc::new(MemoryDatabase::with_records(records.clone()));
            let launcher = Arc::new(RecordingLauncher::new());
            let (store, rejected) = EntityStore::from_records(records, ApplyMode::Authoritative);
            assert!(rejected.is_empty());

            let mut settings = settings(role, &dir);
            tune(&mut settings);
            let mut world = EventLoop::new("main-under-test", ServerState::new(settings, store));
            let directory = WorldDirectory::new();
            if role == ServerRole::Active {
                attach_workers(&mut world, db.clone(), launcher.clone(), &directory).unwrap();
            }
            Self {
                world,
                directory,
                db,
                launcher,
                _dir: dir,
            }
        }

        fn state(&self) -> &ServerState {
            self.world.state()
        }

        /// Runs the main world until `done` holds; panics after 5s.
        async fn until(&mut self, what: &str, done: impl Fn(&Self) -> bool) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while !done(self) {
                assert!(Instant::now() < deadline, "timed out waiting for {}", what);
                let _ = tokio::time::timeout(Duration::from_millis(20), self.world.turn()).await;
            }
        }

        /// Next packet at `remote`, running the main world meanwhile.
        async fn recv_packet(&mut self, remote: &mut Remote) -> Packet {
            let read = remote.read_packet();
            tokio::pin!(read);
            loop {
                tokio::select! {
                    packet = &mut read => return packet,
                    _ = self.world.turn() => {}
                }
            }
        }

        async fn recv<T: DeserializeOwned>(&mut self, remote: &mut Remote, msg_id: u32) -> T {
            loop {
                let packet = self.recv_packet(remote).await;
                if packet.msg_id == msg_id {
                    return packet.decode_body().unwrap();
                }
            }
        }

        fn accept(&mut self, kind: GroupKind) -> (SensorId, Remote) {
            let (local, stream) = UnixStream::pair().unwrap();
            let before = self.state().groups.get(kind).ids();
            self.world
                .with_context(|state, ctx| state.on_accept(ctx, kind, SocketStream::Unix(local), "test".to_string()));
            let id = self
                .state()
                .groups
                .get(kind)
                .ids()
                .into_iter()
                .find(|id| !before.contains(id))
                .unwrap();
            (
                id,
                Remote {
                    stream,
                    decoder: FrameDecoder::default(),
                },
            )
        }

        fn deliver<T: Serialize>(&mut self, id: SensorId, msg_id: u32, body: &T) {
            let packet = Packet::json(msg_id, body).unwrap();
            self.world.with_context(|state, ctx| state.on_packet(ctx, id, packet));
        }

        fn identify(&mut self, id: SensorId, session_type: SessionType, name: &str) {
            self.deliver(
                id,
                SESSION_IDENTIFY,
                &SessionIdentify {
                    session_type,
                    name: name.to_string(),
                },
            );
        }

        /// Accepts and identifies a session; the identify answer is consumed.
        async fn connect(&mut self, kind: GroupKind, session_type: SessionType, name: &str) -> (SensorId, Remote) {
            let (id, mut remote) = self.accept(kind);
            self.identify(id, session_type, name);
            let res: IdentifyResult = self.recv(&mut remote, SESSION_IDENTIFY_RES).await;
            assert_eq!(res.result, 1, "identify refused: {}", res.reason);
            (id, remote)
        }

        /// Manager `m1` identified and done with its init, so its command ports are open.
        async fn manager_ready(&mut self) -> (SensorId, Remote) {
            let (id, mut remote) = self
                .connect(GroupKind::Manager, SessionType::AsciiManager, "m1")
                .await;
            let init: ProcInit = self.recv(&mut remote, CMD_PROC_INIT).await;
            assert_eq!(init.connectors.len(), 1);
            self.world
                .with_context(|state, ctx| state.on_packet(ctx, id, Packet::empty(PROC_INIT_END)));
            let open: OpenPort = self.recv(&mut remote, CMD_OPEN_PORT).await;
            assert_eq!(open.sequence, 1);
            (id, remote)
        }

        async fn external(&mut self, name: &str) -> (SensorId, Remote) {
            let (id, mut remote) = self.accept(GroupKind::External);
            self.deliver(id, AS_MMC_IDENT_REQ, &MmcIdentReq { name: name.to_string() });
            let res: MmcIdentRes = self.recv(&mut remote, AS_MMC_IDENT_RES).await;
            assert_eq!(res.result_mode, 1, "{}", res.reason);
            (id, remote)
        }

        fn modify_manager(&mut self, gui: SensorId, action: Action, id: &str) {
            let EntityRecord::Manager(record) = manager(id, SettingStatus::Stop) else {
                unreachable!()
            };
            self.deliver(
                gui,
                AS_MANAGER_MODIFY,
                &EntityModify {
                    action,
                    old_key: None,
                    record,
                },
            );
        }

        /// Stops the pipeline worlds so requests stay in their queues.
        fn halt_pipeline(&mut self) {
            if let Some(worlds) = self.world.state_mut().pipeline.take() {
                worlds.stop();
            }
        }

        fn all_records(&self) -> Vec<EntityRecord> {
            EntityKind::ALL
                .into_iter()
                .flat_map(|kind| self.state().store.records(kind))
                .collect()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.world.state_mut().stop_workers();
            self.directory.join_all();
        }
    }

    fn mmc_req(id: u32, ne: &str) -> MmcReq {
        MmcReq {
            id,
            ne: ne.to_string(),
            mmc: "DIS-ALM;".to_string(),
            priority: None,
            log_mode: None,
            user_id: "op".to_string(),
            reference_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_status_gui_gets_framed_snapshot_then_system_info() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (_, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiStatusInfo, "gui-1")
            .await;

        let start = h.recv_packet(&mut gui).await;
        assert_eq!(start.msg_id, INIT_INFO_START);
        let count = start.decode_body::<InitInfo>().unwrap().count;
        // manager, connector and connection; authorities are CONFIG only
        assert_eq!(count, 3);
        for _ in 0..count {
            let row = h.recv_packet(&mut gui).await;
            let delta: EntityDelta = row.decode_body().unwrap();
            assert_eq!(delta.action, Action::Create);
        }
        assert_eq!(h.recv_packet(&mut gui).await.msg_id, INIT_INFO_END);

        let system: SystemInfo = h.recv(&mut gui, AS_SYSTEM_INFO).await;
        assert_eq!(system.name, "as1");
        assert_eq!(system.role, ServerRole::Active);
        let own: ProcessInfo = h.recv(&mut gui, AS_PROCESS_INFO).await;
        assert_eq!(own.process_type, ProcessType::AsciiServer);
        assert_eq!(own.status, CurStatus::Start);
    }

    #[tokio::test]
    async fn test_manager_start_identify_and_stop() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        h.world
            .with_context(|state, ctx| state.start_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();

        h.until("the launch", |h| !h.launcher.starts().is_empty()).await;
        let starts = h.launcher.starts();
        assert_eq!(starts.len(), 1);
        assert!(starts[0].contains("--name m1 --svrip 127.0.0.1 --svrport 9100"));
        assert!(h.state().timeouts[&ProcessKind::Manager].contains("m1"));
        match h.state().store.manager("m1") {
            Some(m) => assert_eq!(m.status.request_status, RequestStatus::WaitStart),
            None => panic!("m1 vanished"),
        }

        let (id, mut remote) = h.manager_ready().await;
        assert!(!h.state().timeouts[&ProcessKind::Manager].contains("m1"));
        let m1 = h.state().store.manager("m1").unwrap();
        assert_eq!(m1.status.cur_status, CurStatus::Start);
        assert_eq!(m1.status.request_status, RequestStatus::WaitNo);
        assert_eq!(h.state().router.lookup("NE1").unwrap().session, id);

        h.world
            .with_context(|state, ctx| state.stop_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();
        assert_eq!(h.recv_packet(&mut remote).await.msg_id, CMD_PROC_TERMINATE);
        let m1 = h.state().store.manager("m1").unwrap();
        assert_eq!(m1.status.setting_status, SettingStatus::Stop);
        assert_eq!(m1.status.request_status, RequestStatus::WaitStop);
    }

    #[tokio::test]
    async fn test_failed_launch_is_reported_and_abandoned() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (_, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiStatusInfo, "gui-1")
            .await;
        h.launcher.failing.lock().unwrap().push("nohup".to_string());

        h.world
            .with_context(|state, ctx| state.start_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();

        let notice: ErrorMsg = h.recv(&mut gui, ASCII_ERROR_MSG).await;
        assert!(notice.message.starts_with("The MANAGER(m1) start failed"), "{}", notice.message);
        let m1 = h.state().store.manager("m1").unwrap();
        assert_eq!(m1.status.setting_status, SettingStatus::Stop);
        assert_eq!(m1.status.request_status, RequestStatus::WaitNo);
        assert!(!h.state().timeouts[&ProcessKind::Manager].contains("m1"));
    }

    #[tokio::test]
    async fn test_lost_manager_is_restarted() {
        let mut records = routed_records();
        records[0] = manager("m1", SettingStatus::Start);
        let mut h = Harness::new(ServerRole::Active, records);
        h.world
            .with_context(|state, ctx| state.start_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();
        let (id, _remote) = h.manager_ready().await;

        h.world
            .with_context(|state, ctx| state.close_session(ctx, id, CloseReason::Local("reset".to_string())));

        h.until("the relaunch", |h| h.launcher.starts().len() == 2).await;
        assert!(h.state().router.lookup("NE1").is_none());
        let m1 = h.state().store.manager("m1").unwrap();
        assert_eq!(m1.status.cur_status, CurStatus::Stop);
        assert_eq!(m1.status.request_status, RequestStatus::WaitStart);
        let connection = h.state().store.connection(1).unwrap();
        assert_eq!(connection.cur_status, CurStatus::Undefined);
    }

    #[tokio::test]
    async fn test_mmc_request_is_published_and_result_chunked() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (manager_id, mut manager) = h.manager_ready().await;
        let (ext_id, mut ext) = h.external("ops").await;

        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(7, "NE1"));
        let ack: MmcReqAck = h.recv(&mut ext, AS_MMC_REQ_ACK).await;
        assert_eq!((ack.id, ack.result_mode), (7, 1));

        let publish: MmcPublishReq = h.recv(&mut manager, CMD_MMC_PUBLISH_REQ).await;
        assert_eq!(publish.ne, "NE1");
        assert_eq!(publish.mmc, "DIS-ALM;");
        assert_eq!(publish.priority, 3);

        h.deliver(
            manager_id,
            CMD_MMC_PUBLISH_RES,
            &MmcPublishRes {
                gid: publish.gid,
                result_mode: ResultMode::Complete,
                result: "x".repeat(5000),
            },
        );
        let first: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        let last: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        assert_eq!(first.id, 7);
        assert_eq!(first.result_mode, ResultMode::Continue);
        assert_eq!(last.result_mode, ResultMode::Complete);
        assert_eq!(first.result.len() + last.result.len(), 5000);
        assert!(h.state().correlator.is_empty());
    }

    #[tokio::test]
    async fn test_unroutable_ne_ends_with_error() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (ext_id, mut ext) = h.external("ops").await;

        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(8, "NE9"));
        let ack: MmcReqAck = h.recv(&mut ext, AS_MMC_REQ_ACK).await;
        assert_eq!(ack.result_mode, 1);
        let res: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        assert_eq!(res.id, 8);
        assert_eq!(res.result_mode, ResultMode::Error);
        assert_eq!(res.result, not_routable_message("NE9"));
        assert!(h.state().correlator.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_authority_is_refused_and_closed() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (id, mut remote) = h.accept(GroupKind::External);

        h.deliver(id, AS_MMC_IDENT_REQ, &MmcIdentReq { name: "nobody".to_string() });

        let res: MmcIdentRes = h.recv(&mut remote, AS_MMC_IDENT_RES).await;
        assert_eq!(res.result_mode, 0);
        assert!(!h.state().groups.external.contains(id));
    }

    #[tokio::test]
    async fn test_duplicate_name_closes_the_newcomer() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (first, _gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        let (second, mut remote) = h.accept(GroupKind::Gui);

        h.identify(second, SessionType::GuiAsciiConfigInfo, "gui-1");

        let res: IdentifyResult = h.recv(&mut remote, SESSION_IDENTIFY_RES).await;
        assert_eq!(res.result, 0);
        assert!(!h.state().groups.gui.contains(second));
        assert_eq!(h.state().groups.gui.id_by_name("gui-1"), Some(first));
    }

    #[tokio::test]
    async fn test_config_gui_create_is_applied_persisted_and_acked() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        h.recv::<InitInfo>(&mut gui, INIT_INFO_END).await;

        let EntityRecord::Manager(m2) = manager("m2", SettingStatus::Stop) else {
            unreachable!()
        };
        h.deliver(
            gui_id,
            AS_MANAGER_MODIFY,
            &EntityModify {
                action: Action::Create,
                old_key: None,
                record: m2,
            },
        );

        let delta: EntityDelta = h.recv(&mut gui, AS_MANAGER_INFO).await;
        assert_eq!(delta.record.key(), EntityKey::Manager { manager_id: "m2".to_string() });
        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 1);
        assert!(h.state().store.manager("m2").is_some());
        assert!(h
            .db
            .row(&EntityKey::Manager {
                manager_id: "m2".to_string()
            })
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_with_children_is_refused() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        let EntityRecord::Manager(m1) = manager("m1", SettingStatus::Stop) else {
            unreachable!()
        };

        h.deliver(
            gui_id,
            AS_MANAGER_MODIFY,
            &EntityModify {
                action: Action::Delete,
                old_key: None,
                record: m1,
            },
        );

        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 0);
        assert!(!ack.reason.is_empty());
        assert!(h.state().store.manager("m1").is_some());
    }

    #[tokio::test]
    async fn test_standby_refuses_configuration_changes() {
        let mut h = Harness::new(ServerRole::Standby, Vec::new());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        let EntityRecord::Manager(m2) = manager("m2", SettingStatus::Stop) else {
            unreachable!()
        };

        h.deliver(
            gui_id,
            AS_MANAGER_MODIFY,
            &EntityModify {
                action: Action::Create,
                old_key: None,
                record: m2,
            },
        );

        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 0);
        assert_eq!(ack.reason, StoreError::ReadOnly.to_string());
        assert!(h.state().store.manager("m2").is_none());
        assert_eq!(h.db.row_count(), 0);
    }

    #[tokio::test]
    async fn test_rule_download_round_trip() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (editor_id, mut editor) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiRuleEditor, "editor")
            .await;
        let (downloader_id, mut downloader) = h
            .connect(GroupKind::RuleDownloader, SessionType::AsciiRuleDownloader, "rd")
            .await;
        let gui_transaction = uuid::Uuid::new_v4();

        h.deliver(
            editor_id,
            CMD_PARSING_RULE_DOWN,
            &RuleDown {
                transaction: Some(gui_transaction),
                rule_id: "r1".to_string(),
                content: "<rule/>".to_string(),
            },
        );
        let relayed: RuleDown = h.recv(&mut downloader, CMD_PARSING_RULE_DOWN).await;
        let transaction = relayed.transaction.unwrap();
        assert_ne!(transaction, gui_transaction);

        h.deliver(
            downloader_id,
            CMD_PARSING_RULE_DOWN_ACK,
            &RuleDownAck {
                transaction: Some(transaction),
                rule_id: "r1".to_string(),
                result: 1,
                reason: String::new(),
            },
        );
        let ack: RuleDownAck = h.recv(&mut editor, CMD_PARSING_RULE_DOWN_ACK).await;
        assert_eq!(ack.transaction, Some(gui_transaction));
        assert_eq!(ack.result, 1);
        assert!(h.state().rules.is_empty());
    }

    #[tokio::test]
    async fn test_rule_download_without_downloader_is_nacked() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (editor_id, mut editor) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiRuleEditor, "editor")
            .await;

        h.deliver(
            editor_id,
            CMD_MAPPING_RULE_DOWN,
            &RuleDown {
                transaction: None,
                rule_id: "r2".to_string(),
                content: String::new(),
            },
        );

        let ack: RuleDownAck = h.recv(&mut editor, CMD_MAPPING_RULE_DOWN_ACK).await;
        assert_eq!(ack.result, 0);
        assert_eq!(ack.rule_id, "r2");
    }

    #[tokio::test]
    async fn test_router_info_lists_routable_nes() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let _manager = h.manager_ready().await;
        let (id, mut remote) = h
            .connect(GroupKind::RouterInfo, SessionType::RouterInfo, "ri")
            .await;

        h.deliver(id, AS_ROUTER_INFO_REQ, &RouterInfoReq::default());

        let res: RouterInfoRes = h.recv(&mut remote, AS_ROUTER_INFO_RES).await;
        assert_eq!(
            res.entries,
            vec![RouterEntry {
                ne: "NE1".to_string(),
                manager_id: "m1".to_string(),
                manager_ip: "10.0.0.1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_log_lines_reach_subscribed_guis_only() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (manager_id, _manager) = h.manager_ready().await;
        let (watcher_id, mut watcher) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "watcher")
            .await;
        h.deliver(
            watcher_id,
            AS_LOG_INFO,
            &LogInfo {
                name: "m1".to_string(),
                status: LogAction::Add,
                logs: String::new(),
            },
        );

        h.deliver(
            manager_id,
            AS_LOG_INFO,
            &LogInfo {
                name: "m1".to_string(),
                status: LogAction::Add,
                logs: "link up".to_string(),
            },
        );

        let log: LogInfo = h.recv(&mut watcher, AS_LOG_INFO).await;
        assert_eq!(log.logs, "link up");
    }

    #[tokio::test]
    async fn test_failed_database_write_leaves_store_and_nacks() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        h.recv::<InitInfo>(&mut gui, INIT_INFO_END).await;
        *h.db.fail_writes.lock().unwrap() = true;
        let rows = h.db.row_count();

        h.modify_manager(gui_id, Action::Create, "m2");

        let packet = loop {
            let packet = h.recv_packet(&mut gui).await;
            assert_ne!(packet.msg_id, AS_MANAGER_INFO, "failed edit was published");
            if packet.msg_id == AS_MANAGER_MODIFY_ACK {
                break packet;
            }
        };
        let ack: ModifyAck = packet.decode_body().unwrap();
        assert_eq!(ack.result, 0);
        assert!(ack.reason.contains("disk full"), "{}", ack.reason);
        assert!(h.state().store.manager("m2").is_none());
        assert!(h.state().pending_modify.is_none());
        assert_eq!(h.db.row_count(), rows);

        *h.db.fail_writes.lock().unwrap() = false;
        h.modify_manager(gui_id, Action::Create, "m2");
        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 1);
        assert!(h.state().store.manager("m2").is_some());
    }

    #[tokio::test]
    async fn test_edits_wait_for_the_one_being_written() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;

        h.modify_manager(gui_id, Action::Create, "m2");
        h.modify_manager(gui_id, Action::Delete, "m2");
        assert!(h.state().pending_modify.is_some());
        assert_eq!(h.state().modify_backlog.len(), 1);

        let first: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        let second: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!((first.action, first.result), (Action::Create, 1));
        assert_eq!((second.action, second.result), (Action::Delete, 1));
        assert!(h.state().modify_backlog.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_delete_restores_the_configuration() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (gui_id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "gui-1")
            .await;
        h.recv::<InitInfo>(&mut gui, INIT_INFO_END).await;
        let before = h.all_records();
        let rows = h.db.row_count();

        h.modify_manager(gui_id, Action::Create, "m2");
        let created: EntityDelta = h.recv(&mut gui, AS_MANAGER_INFO).await;
        assert_eq!(created.action, Action::Create);
        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 1);
        assert_eq!(h.db.row_count(), rows + 1);

        h.modify_manager(gui_id, Action::Delete, "m2");
        let deleted: EntityDelta = h.recv(&mut gui, AS_MANAGER_INFO).await;
        assert_eq!(deleted.action, Action::Delete);
        assert_eq!(deleted.record.key(), created.record.key());
        let ack: ModifyAck = h.recv(&mut gui, AS_MANAGER_MODIFY_ACK).await;
        assert_eq!(ack.result, 1);

        assert_eq!(h.all_records(), before);
        assert_eq!(h.db.row_count(), rows);
    }

    #[tokio::test]
    async fn test_request_flows_through_the_worker_worlds() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        assert!(h.state().pipeline.is_some());
        assert!(h.state().hub.persist().is_some());
        h.world
            .with_context(|state, ctx| state.start_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();
        h.until("the launch", |h| h.launcher.starts().len() == 1).await;
        let (_, mut manager) = h.manager_ready().await;
        let (ext_id, mut ext) = h.external("ops").await;

        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(11, "NE1"));

        let publish: MmcPublishReq = h.recv(&mut manager, CMD_MMC_PUBLISH_REQ).await;
        assert!(publish.gid > 0);
        assert!(h.db.get_current_msg_id().unwrap() >= publish.gid);
        manager
            .send(
                CMD_MMC_PUBLISH_RES,
                &MmcPublishRes {
                    gid: publish.gid,
                    result_mode: ResultMode::Complete,
                    result: "OK".to_string(),
                },
            )
            .await;
        let res: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        assert_eq!((res.id, res.result_mode), (11, ResultMode::Complete));
        assert_eq!(res.result, "OK");
    }

    #[tokio::test]
    async fn test_silent_peer_is_closed_by_heartbeat() {
        let mut h = Harness::with_settings(ServerRole::Active, routed_records(), |s| {
            s.alive_interval = Duration::from_millis(100);
            s.alive_limit = 2;
        });
        let (id, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiStatusInfo, "gui-1")
            .await;

        h.until("the heartbeat close", |h| !h.state().groups.gui.contains(id)).await;

        let seen = gui.read_to_close().await;
        assert!(seen.contains(&CMD_ALIVE_SEND), "{:?}", seen);
    }

    #[tokio::test]
    async fn test_send_buffer_overflow_closes_the_reader() {
        let mut h = Harness::with_settings(ServerRole::Active, routed_records(), |s| {
            s.max_data_buf_size = 4096;
        });
        let (manager_id, _manager) = h.manager_ready().await;
        let (watcher_id, mut watcher) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiConfigInfo, "watcher")
            .await;
        h.deliver(
            watcher_id,
            AS_LOG_INFO,
            &LogInfo {
                name: "m1".to_string(),
                status: LogAction::Add,
                logs: String::new(),
            },
        );

        h.deliver(
            manager_id,
            AS_LOG_INFO,
            &LogInfo {
                name: "m1".to_string(),
                status: LogAction::Add,
                logs: "x".repeat(8192),
            },
        );

        assert!(!h.state().groups.gui.contains(watcher_id));
        assert!(h.state().groups.manager.contains(manager_id));
        let seen = watcher.read_to_close().await;
        assert!(!seen.contains(&AS_LOG_INFO));
    }

    #[tokio::test]
    async fn test_full_queue_nacks_then_closes_after_repeated_refusals() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        h.halt_pipeline();
        let (ext_id, mut ext) = h.external("ops").await;

        for id in 1..=10 {
            h.deliver(ext_id, AS_MMC_REQ, &mmc_req(id, "NE1"));
        }
        for id in 1..=MAX_CONSECUTIVE_FAILURES {
            assert!(h.state().groups.external.contains(ext_id), "closed after {} refusals", id - 1);
            h.deliver(ext_id, AS_MMC_REQ, &mmc_req(100 + id, "NE1"));
        }
        assert!(!h.state().groups.external.contains(ext_id));

        let mut accepted = 0;
        let mut refused = 0;
        loop {
            let ack: MmcReqAck = h.recv(&mut ext, AS_MMC_REQ_ACK).await;
            if ack.result_mode == 1 {
                accepted += 1;
            } else {
                assert!(!ack.reason.is_empty());
                refused += 1;
            }
            if accepted + refused == 10 + MAX_CONSECUTIVE_FAILURES {
                break;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(refused, MAX_CONSECUTIVE_FAILURES);
        assert!(ext.read_to_close().await.is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let mut h = Harness::with_settings(ServerRole::Active, routed_records(), |s| {
            s.mmc_response_timeout = Duration::from_millis(200);
        });
        let (manager_id, mut manager) = h.manager_ready().await;
        let (ext_id, mut ext) = h.external("ops").await;

        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(9, "NE1"));
        let publish: MmcPublishReq = h.recv(&mut manager, CMD_MMC_PUBLISH_REQ).await;

        let res: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        assert_eq!(res.id, 9);
        assert_eq!(res.result_mode, ResultMode::Error);
        assert!(res.result.contains("timeout"), "{}", res.result);
        assert!(h.state().correlator.is_empty());

        // a late answer finds nobody waiting
        h.deliver(
            manager_id,
            CMD_MMC_PUBLISH_RES,
            &MmcPublishRes {
                gid: publish.gid,
                result_mode: ResultMode::Complete,
                result: "late".to_string(),
            },
        );
        assert!(h.state().correlator.is_empty());
    }

    #[tokio::test]
    async fn test_manager_reply_over_one_chunk_arrives_in_two() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        let (_, mut manager) = h.manager_ready().await;
        let (ext_id, mut ext) = h.external("ops").await;
        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(12, "NE1"));
        let publish: MmcPublishReq = h.recv(&mut manager, CMD_MMC_PUBLISH_REQ).await;

        let result: String = ('a'..='z').cycle().take(4096).collect();
        manager
            .send(
                CMD_MMC_PUBLISH_RES,
                &MmcPublishRes {
                    gid: publish.gid,
                    result_mode: ResultMode::Complete,
                    result: result.clone(),
                },
            )
            .await;

        let first: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        let second: MmcRes = h.recv(&mut ext, AS_MMC_RES).await;
        assert_eq!(first.result_mode, ResultMode::Continue);
        assert_eq!(second.result_mode, ResultMode::Complete);
        assert_eq!(first.result.len(), 4095);
        assert_eq!(second.result.len(), 1);
        assert_eq!(format!("{}{}", first.result, second.result), result);
    }

    #[tokio::test]
    async fn test_lost_manager_restart_is_announced() {
        let mut records = routed_records();
        records[0] = manager("m1", SettingStatus::Start);
        let mut h = Harness::new(ServerRole::Active, records);
        let (_, mut gui) = h
            .connect(GroupKind::Gui, SessionType::GuiAsciiStatusInfo, "gui-1")
            .await;
        h.world
            .with_context(|state, ctx| state.start_child(ctx, ProcessKind::Manager, "m1"))
            .unwrap();
        let (id, remote) = h.manager_ready().await;

        drop(remote);

        let killed: ErrorMsg = h.recv(&mut gui, ASCII_ERROR_MSG).await;
        assert_eq!(killed.message, "The MANAGER(m1) is killed abnormal.");
        let restarted: ErrorMsg = h.recv(&mut gui, ASCII_ERROR_MSG).await;
        assert_eq!(restarted.message, "The MANAGER(m1) is reexecuted.");
        assert!(!h.state().groups.manager.contains(id));
        h.until("the relaunch", |h| h.launcher.starts().len() == 2).await;
    }

    #[tokio::test]
    async fn test_short_sweep_keeps_garbage_until_the_result_horizon() {
        let mut h = Harness::new(ServerRole::Active, routed_records());
        h.halt_pipeline();
        let (ext_id, _ext) = h.external("ops").await;
        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(1, "NE1"));
        h.deliver(ext_id, AS_MMC_REQ, &mmc_req(2, "NE1"));
        h.world
            .with_context(|state, ctx| state.close_session(ctx, ext_id, CloseReason::PeerClosed));
        assert_eq!(h.state().queues.garbage_len(), 2);

        h.world
            .with_context(|state, ctx| state.on_garbage(ctx, ServerTimer::GarbageShort));
        assert_eq!(h.state().queues.garbage_len(), 2);

        h.world.state_mut().settings.mmc_result_horizon = Duration::ZERO;
        h.world
            .with_context(|state, ctx| state.on_garbage(ctx, ServerTimer::GarbageShort));
        assert_eq!(h.state().queues.garbage_len(), 0);
    }
}
