#[cfg(test)]
mod tests {
    use crate::configuration::types::LogCycle;
    use crate::entity_store::store::{ApplyMode, EntityStore};
    use crate::entity_store::types::*;
    use crate::error_handling::types::StoreError;
    use crate::protocol::session_type::{SessionType, SubscriptionMask};

    fn manager(id: &str, setting: SettingStatus) -> EntityRecord {
        EntityRecord::Manager(Manager {
            manager_id: id.to_string(),
            ip: "10.0.0.2".to_string(),
            ssh_id: "ops".to_string(),
            ssh_pass: "secret".to_string(),
            status: StatusTriad::new(setting),
        })
    }

    fn connector(manager_id: &str, id: &str, ne: &str) -> EntityRecord {
        EntityRecord::Connector(Connector {
            connector_id: id.to_string(),
            manager_id: manager_id.to_string(),
            rule_id: "rule-1".to_string(),
            ne_name: ne.to_string(),
            log_cycle: LogCycle::Day,
            description: String::new(),
            status: StatusTriad::new(SettingStatus::Start),
        })
    }

    fn connection(manager_id: &str, connector_id: &str, sequence: u32) -> EntityRecord {
        EntityRecord::Connection(Connection {
            sequence,
            connector_id: connector_id.to_string(),
            manager_id: manager_id.to_string(),
            port_no: 7000 + sequence as u16,
            protocol_type: ProtocolType::Tcp,
            port_type: PortType::Client,
            command_port_flag: sequence == 1,
            cur_status: CurStatus::Start,
            request_status: RequestStatus::WaitStart,
        })
    }

    fn populated() -> EntityStore {
        let mut store = EntityStore::new();
        for record in [
            manager("m1", SettingStatus::Start),
            manager("m2", SettingStatus::Stop),
            connector("m1", "c1", "NE1"),
            connection("m1", "c1", 1),
            connection("m1", "c1", 2),
        ] {
            store.apply(EntityDelta::create(record), ApplyMode::Authoritative).unwrap();
        }
        store
    }

    #[test]
    fn test_create_normalizes_status() {
        let store = populated();
        let m1 = store.manager("m1").unwrap();
        assert_eq!(m1.status.setting_status, SettingStatus::Start);
        assert_eq!(m1.status.cur_status, CurStatus::Stop);
        assert_eq!(m1.status.request_status, RequestStatus::WaitNo);

        let c = store.connection(1).unwrap();
        assert_eq!(c.cur_status, CurStatus::Stop);
        assert_eq!(c.request_status, RequestStatus::WaitNo);
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_replica_keeps_status() {
        let mut store = EntityStore::new();
        let mut record = manager("m1", SettingStatus::Start);
        if let EntityRecord::Manager(m) = &mut record {
            m.status.confirm(CurStatus::Start);
        }
        store.apply(EntityDelta::create(record), ApplyMode::Replica).unwrap();
        assert_eq!(store.manager("m1").unwrap().status.cur_status, CurStatus::Start);
    }

    #[test]
    fn test_create_requires_parent() {
        let mut store = populated();
        let err = store
            .apply(EntityDelta::create(connector("m9", "c9", "NE9")), ApplyMode::Authoritative)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent(_)));

        let err = store
            .apply(EntityDelta::create(connection("m1", "c9", 5)), ApplyMode::Authoritative)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingParent(_)));
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_sequence_is_unique_across_store() {
        let mut store = populated();
        store
            .apply(EntityDelta::create(connector("m2", "c2", "NE2")), ApplyMode::Authoritative)
            .unwrap();
        let err = store
            .apply(EntityDelta::create(connection("m2", "c2", 1)), ApplyMode::Authoritative)
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn test_manager_delete_rejected_when_not_empty() {
        let mut store = populated();
        let err = store
            .apply(EntityDelta::delete(manager("m1", SettingStatus::Start)), ApplyMode::Authoritative)
            .unwrap_err();
        assert!(matches!(err, StoreError::HasChildren(_)));
        assert!(store.manager("m1").is_some());

        store
            .apply(EntityDelta::delete(manager("m2", SettingStatus::Stop)), ApplyMode::Authoritative)
            .unwrap();
        assert!(store.manager("m2").is_none());
    }

    #[test]
    fn test_connector_delete_takes_its_connections() {
        let mut store = populated();
        let deltas = store
            .apply(EntityDelta::delete(connector("m1", "c1", "NE1")), ApplyMode::Authoritative)
            .unwrap();
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas.last().unwrap().kind(), EntityKind::Connector);
        assert!(store.connection(1).is_none());
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_create_then_delete_is_identity() {
        let mut store = populated();
        let before = store.snapshot(SubscriptionMask::STATUS);
        store
            .apply(EntityDelta::create(connector("m2", "c7", "NE7")), ApplyMode::Authoritative)
            .unwrap();
        store
            .apply(EntityDelta::delete(connector("m2", "c7", "NE7")), ApplyMode::Authoritative)
            .unwrap();
        assert_eq!(store.snapshot(SubscriptionMask::STATUS), before);
    }

    #[test]
    fn test_modify_moves_connector_and_cascades() {
        let mut store = populated();
        let mut delta = EntityDelta::modify(connector("m2", "c1", "NE1"));
        delta.old_key = Some(EntityKey::Connector {
            manager_id: "m1".to_string(),
            connector_id: "c1".to_string(),
        });
        let deltas = store.apply(delta, ApplyMode::Authoritative).unwrap();

        assert_eq!(deltas.len(), 3);
        assert!(store.connector("m1", "c1").is_none());
        assert!(store.connector("m2", "c1").is_some());
        let moved = store.connection(2).unwrap();
        assert_eq!(moved.manager_id, "m2");
        assert_eq!(store.connections_of("m2", "c1").len(), 2);
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_modify_renames_manager_and_cascades() {
        let mut store = populated();
        let mut delta = EntityDelta::modify(manager("m1-new", SettingStatus::Start));
        delta.old_key = Some(EntityKey::Manager {
            manager_id: "m1".to_string(),
        });
        store.apply(delta, ApplyMode::Authoritative).unwrap();
        assert!(store.manager("m1").is_none());
        assert_eq!(store.connectors_of("m1-new").len(), 1);
        assert_eq!(store.connection(1).unwrap().manager_id, "m1-new");
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_modify_to_existing_key_is_rejected() {
        let mut store = populated();
        let mut delta = EntityDelta::modify(manager("m2", SettingStatus::Start));
        delta.old_key = Some(EntityKey::Manager {
            manager_id: "m1".to_string(),
        });
        let err = store.apply(delta, ApplyMode::Authoritative).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.connectors_of("m1").len(), 1);
    }

    #[test]
    fn test_modify_in_place_keeps_runtime_status() {
        let mut store = populated();
        let key = EntityKey::Manager {
            manager_id: "m1".to_string(),
        };
        store.confirm_status(&key, CurStatus::Start).unwrap();
        let mut record = manager("m1", SettingStatus::Stop);
        if let EntityRecord::Manager(m) = &mut record {
            m.ip = "10.0.0.9".to_string();
        }
        store.apply(EntityDelta::modify(record), ApplyMode::Authoritative).unwrap();
        let m1 = store.manager("m1").unwrap();
        assert_eq!(m1.ip, "10.0.0.9");
        assert_eq!(m1.status.cur_status, CurStatus::Start);
        assert_eq!(m1.status.setting_status, SettingStatus::Start);
    }

    #[test]
    fn test_control_request_only_from_wait_no() {
        let mut store = populated();
        let key = EntityKey::Manager {
            manager_id: "m2".to_string(),
        };
        let record = store.request_control(&key, SettingStatus::Start).unwrap();
        match record {
            EntityRecord::Manager(m) => assert_eq!(m.status.request_status, RequestStatus::WaitStart),
            other => panic!("unexpected record {:?}", other),
        }
        assert!(matches!(
            store.request_control(&key, SettingStatus::Stop),
            Err(StoreError::RequestPending(_))
        ));
        store.confirm_status(&key, CurStatus::Start).unwrap();
        store.request_control(&key, SettingStatus::Stop).unwrap();
    }

    #[test]
    fn test_manager_lost_cascades() {
        let mut store = populated();
        let key = EntityKey::Connector {
            manager_id: "m1".to_string(),
            connector_id: "c1".to_string(),
        };
        store.confirm_status(&key, CurStatus::Start).unwrap();
        store
            .confirm_status(&EntityKey::Connection { sequence: 1 }, CurStatus::Start)
            .unwrap();

        let records = store.manager_lost("m1");
        assert_eq!(records.len(), 4);
        let c1 = store.connector("m1", "c1").unwrap();
        assert_eq!(c1.status.cur_status, CurStatus::Stop);
        assert_eq!(c1.status.request_status, RequestStatus::WaitNo);
        assert_eq!(c1.status.setting_status, SettingStatus::Start);
        assert_eq!(store.connection(1).unwrap().cur_status, CurStatus::Undefined);
        assert_eq!(store.connection(2).unwrap().cur_status, CurStatus::Undefined);
    }

    #[test]
    fn test_abandon_start_clears_setting() {
        let mut store = populated();
        let key = EntityKey::Manager {
            manager_id: "m1".to_string(),
        };
        store.abandon_start(&key).unwrap();
        assert_eq!(store.manager("m1").unwrap().status.setting_status, SettingStatus::Stop);
    }

    #[test]
    fn test_snapshot_respects_mask() {
        let mut store = populated();
        store
            .apply(
                EntityDelta::create(EntityRecord::SubscriberCfg(SubscriberCfg {
                    name: "gui1".to_string(),
                    session_type: SessionType::GuiAsciiStatusInfo,
                    max_data_buf_size: 1024,
                    writerable_check: true,
                })),
                ApplyMode::Authoritative,
            )
            .unwrap();
        assert_eq!(store.snapshot(SubscriptionMask::STATUS).len(), 5);
        assert_eq!(store.snapshot(SubscriptionMask::CONFIG).len(), 6);
        assert!(store.snapshot(SubscriptionMask::COMMAND).is_empty());
    }

    #[test]
    fn test_from_records_skips_orphans() {
        let records = vec![
            connection("m1", "c1", 1),
            connector("m1", "c1", "NE1"),
            manager("m1", SettingStatus::Start),
            connector("ghost", "c3", "NE3"),
        ];
        let (store, rejected) = EntityStore::from_records(records, ApplyMode::Authoritative);
        assert_eq!(rejected.len(), 1);
        assert!(store.connection(1).is_some());
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_diff_rebuilds_target() {
        let old = populated();
        let mut next = populated();
        next.apply(EntityDelta::delete(connection("m1", "c1", 2)), ApplyMode::Authoritative)
            .unwrap();
        next.apply(EntityDelta::create(connector("m2", "c2", "NE2")), ApplyMode::Authoritative)
            .unwrap();

        let deltas = old.diff(&next);
        let mut replayed = old.clone();
        for delta in deltas {
            replayed.apply(delta, ApplyMode::Replica).unwrap();
        }
        assert_eq!(replayed.all_records(), next.all_records());
    }
}
