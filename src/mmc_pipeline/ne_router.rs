use crate::protocol::messages::RouterEntry;
use crate::reactor::sensor::SensorId;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Manager session holding the command port of an NE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub manager_id: String,
    pub session: SensorId,
    /// Connection that carries the command port.
    pub sequence: u32,
}

#[derive(Debug, Default)]
struct ManagerPorts {
    session: Option<SensorId>,
    nes: HashSet<String>,
}

/// `NE -> manager` routing built from the command ports managers opened.
///
/// Lookups by NE are O(1); each manager keeps the set of NEs whose command port it holds.
#[derive(Debug, Default)]
pub struct NeRouter {
    by_ne: HashMap<String, Route>,
    managers: HashMap<String, ManagerPorts>,
}

impl NeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the manager session once it identified.
    pub fn attach_manager(&mut self, manager_id: &str, session: SensorId) {
        let ports = self.managers.entry(manager_id.to_string()).or_default();
        ports.session = Some(session);
        for ne in &ports.nes {
            if let Some(route) = self.by_ne.get_mut(ne) {
                route.session = session;
            }
        }
    }

    /// A command port was opened (`CMD_OPEN_PORT` with `CommandPortFlag`).
    pub fn add(&mut self, manager_id: &str, ne: &str, sequence: u32) -> bool {
        let ports = self.managers.entry(manager_id.to_string()).or_default();
        let Some(session) = ports.session else {
            debug!("[mmc] {} has no session, {} stays unroutable", manager_id, ne);
            return false;
        };
        if let Some(previous) = self.by_ne.get(ne) {
            if previous.manager_id != manager_id {
                if let Some(old) = self.managers.get_mut(&previous.manager_id) {
                    old.nes.remove(ne);
                }
            }
        }
        if let Some(ports) = self.managers.get_mut(manager_id) {
            ports.nes.insert(ne.to_string());
        }
        self.by_ne.insert(
            ne.to_string(),
            Route {
                manager_id: manager_id.to_string(),
                session,
                sequence,
            },
        );
        info!("[mmc] {} routable through {}", ne, manager_id);
        true
    }

    /// Connector stopped: its NE is no longer reachable through this manager.
    pub fn remove_ne(&mut self, manager_id: &str, ne: &str) -> bool {
        match self.by_ne.get(ne) {
            Some(route) if route.manager_id == manager_id => {
                self.by_ne.remove(ne);
                if let Some(ports) = self.managers.get_mut(manager_id) {
                    ports.nes.remove(ne);
                }
                info!("[mmc] {} no longer routable", ne);
                true
            }
            _ => false,
        }
    }

    /// Connection stopped; only matters when it carried a command port.
    pub fn remove_connection(&mut self, sequence: u32) -> Option<String> {
        let ne = self
            .by_ne
            .iter()
            .find(|(_, route)| route.sequence == sequence)
            .map(|(ne, _)| ne.clone())?;
        let manager_id = self.by_ne.get(&ne)?.manager_id.clone();
        self.remove_ne(&manager_id, &ne);
        Some(ne)
    }

    /// Manager session gone: every NE it fronted becomes unroutable.
    pub fn remove_manager(&mut self, manager_id: &str) -> Vec<String> {
        let Some(ports) = self.managers.remove(manager_id) else {
            return Vec::new();
        };
        let mut gone: Vec<String> = ports.nes.into_iter().collect();
        gone.sort();
        for ne in &gone {
            self.by_ne.remove(ne);
        }
        gone
    }

    pub fn lookup(&self, ne: &str) -> Option<&Route> {
        self.by_ne.get(ne)
    }

    pub fn is_has_cmd_port_ne(&self, manager_id: &str, ne: &str) -> bool {
        self.managers
            .get(manager_id)
            .is_some_and(|ports| ports.nes.contains(ne))
    }

    /// Router table for `AS_ROUTER_INFO_RES`, optionally narrowed to one NE.
    pub fn entries(&self, ne: Option<&str>, manager_ip: impl Fn(&str) -> String) -> Vec<RouterEntry> {
        let mut entries: Vec<RouterEntry> = self
            .by_ne
            .iter()
            .filter(|(name, _)| ne.map_or(true, |wanted| wanted == name.as_str()))
            .map(|(name, route)| RouterEntry {
                ne: name.clone(),
                manager_id: route.manager_id.clone(),
                manager_ip: manager_ip(&route.manager_id),
            })
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.by_ne.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ne.is_empty()
    }
}
