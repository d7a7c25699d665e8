#[cfg(test)]
mod tests {
    use crate::error_handling::types::SessionError;
    use crate::protocol::messages::LogAction;
    use crate::protocol::msg_id;
    use crate::protocol::session_type::SessionType;
    use crate::reactor::{EventLoop, IoSender, SensorRegistry, WorldContext, WorldState};
    use crate::session_management::*;
    use crate::transport::packet::{FrameDecoder, Packet};
    use crate::transport::socket::{Socket, SocketStream};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixStream;

    #[derive(Debug)]
    enum HostTimer {
        Session(SessionTimer),
    }

    impl From<SessionTimer> for HostTimer {
        fn from(timer: SessionTimer) -> Self {
            HostTimer::Session(timer)
        }
    }

    struct Host {
        group: ConnectionGroup,
    }

    impl WorldState for Host {
        type Message = ();
        type Timer = HostTimer;
    }

    fn host_world() -> EventLoop<Host> {
        EventLoop::new(
            "sessions",
            Host {
                group: ConnectionGroup::new(GroupKind::Gui),
            },
        )
    }

    /// Adds a session backed by a unix socket pair and returns the remote end.
    fn connect_session(world: &mut EventLoop<Host>) -> (crate::reactor::SensorId, UnixStream) {
        let (local, remote) = UnixStream::pair().unwrap();
        let id = SensorRegistry::global().allocate();
        let (io, _rx) = IoSender::channel();
        let socket = Socket::open(SocketStream::Unix(local), id, io, 4096);
        world
            .state_mut()
            .group
            .accept(Session::new(id, GroupKind::Gui, socket, None));
        (id, remote)
    }

    async fn read_packet(remote: &mut UnixStream) -> Packet {
        let mut decoder = FrameDecoder::default();
        let mut buf = [0u8; 1024];
        loop {
            if let Some(packet) = decoder.next_packet().unwrap() {
                return packet;
            }
            let n = remote.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed");
            decoder.push(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_identify_rejects_duplicate_name() {
        let mut world = host_world();
        let (a, _ra) = connect_session(&mut world);
        let (b, _rb) = connect_session(&mut world);
        let group = &mut world.state_mut().group;

        group.identify(a, SessionType::GuiAsciiStatusInfo, "gui-1").unwrap();
        let err = group
            .identify(b, SessionType::GuiAsciiStatusInfo, "gui-1")
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateName(name) if name == "gui-1"));
        assert_eq!(group.id_by_name("gui-1"), Some(a));
        assert!(!group.get(b).unwrap().is_identified());
        assert_eq!(
            group.find_by_name("gui-1").unwrap().role,
            SessionRole::Gui {
                mask: SessionType::GuiAsciiStatusInfo.subscription()
            }
        );
    }

    #[tokio::test]
    async fn test_remove_unlinks_name_and_closes() {
        let mut world = host_world();
        let (a, mut remote) = connect_session(&mut world);
        world
            .state_mut()
            .group
            .identify(a, SessionType::GuiAsciiConfigInfo, "gui-2")
            .unwrap();

        let removed = world.with_context(|state, ctx| state.group.remove(ctx, a));
        let removed = removed.unwrap();
        assert!(!removed.socket().is_open());
        let group = &world.state().group;
        assert!(group.find_by_name("gui-2").is_none());
        assert!(group.is_empty());

        let mut buf = [0u8; 8];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_identified_matching_sessions() {
        let mut world = host_world();
        let (status, mut status_remote) = connect_session(&mut world);
        let (config, _config_remote) = connect_session(&mut world);
        let (_anonymous, _anon_remote) = connect_session(&mut world);
        {
            let group = &mut world.state_mut().group;
            group.identify(status, SessionType::GuiAsciiStatusInfo, "s").unwrap();
            group.identify(config, SessionType::GuiAsciiConfigInfo, "c").unwrap();
        }

        let packet = Packet::new(msg_id::AS_PROCESS_INFO, b"{}".to_vec());
        let failures = world.with_context(|state, ctx| {
            state.group.broadcast(
                ctx,
                |s| s.session_type == Some(SessionType::GuiAsciiStatusInfo),
                &packet,
            )
        });
        assert!(failures.is_empty());
        assert_eq!(read_packet(&mut status_remote).await, packet);
    }

    #[tokio::test]
    async fn test_alive_check_send_and_fail() {
        let mut world = host_world();
        let (id, mut remote) = connect_session(&mut world);

        let outcome = world.with_context(|state: &mut Host, ctx: &mut WorldContext<'_, Host>| {
            let session = state.group.get_mut(id).unwrap();
            session.start_alive_check(ctx, Duration::from_secs(10), 2);
            assert!(session.on_timer(ctx, SessionTimer::AliveSend).unwrap().is_none());
            assert!(session.on_timer(ctx, SessionTimer::AliveRecv).unwrap().is_none());
            session.note_receive();
            assert!(session.on_timer(ctx, SessionTimer::AliveRecv).unwrap().is_none());
            session.on_timer(ctx, SessionTimer::AliveRecv).unwrap()
        });
        assert_eq!(outcome, Some(2));
        assert_eq!(read_packet(&mut remote).await.msg_id, msg_id::CMD_ALIVE_SEND);
    }

    #[tokio::test]
    async fn test_snapshot_lists_sessions() {
        let mut world = host_world();
        let (a, _ra) = connect_session(&mut world);
        let (_b, _rb) = connect_session(&mut world);
        world
            .state_mut()
            .group
            .identify(a, SessionType::GuiAsciiCommand, "cmd")
            .unwrap();

        let rows = world.state_mut().group.snapshot();
        assert_eq!(rows.len(), 2);
        let named = rows.iter().find(|r| r.name == "cmd").unwrap();
        assert!(named.identified);
        assert!(named.writable);
        assert_eq!(named.pending_bytes, 0);
        assert_eq!(named.session_type, Some(SessionType::GuiAsciiCommand));
    }

    #[test]
    fn test_log_status_last_write_wins() {
        let mut status = LogStatus::default();
        status.update("MANAGER_m1", LogAction::Add);
        assert!(status.wants("MANAGER_m1"));
        status.update("MANAGER_m1", LogAction::Del);
        assert!(!status.wants("MANAGER_m1"));
        assert!(!status.wants("other"));
    }
}
