use crate::protocol::session_type::{SessionType, SubscriptionMask};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Listener a session was accepted on; each group lives in exactly one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupKind {
    External,
    Mmc,
    RuleDownloader,
    Manager,
    DataHandler,
    SubProc,
    Gui,
    Sims,
    Netfinder,
    StandbyPeer,
    RouterInfo,
    /// Outbound link of a standby server to its active peer.
    ActiveLink,
}

impl GroupKind {
    pub const ALL: [GroupKind; 12] = [
        GroupKind::External,
        GroupKind::Mmc,
        GroupKind::RuleDownloader,
        GroupKind::Manager,
        GroupKind::DataHandler,
        GroupKind::SubProc,
        GroupKind::Gui,
        GroupKind::Sims,
        GroupKind::Netfinder,
        GroupKind::StandbyPeer,
        GroupKind::RouterInfo,
        GroupKind::ActiveLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::External => "external",
            GroupKind::Mmc => "mmc",
            GroupKind::RuleDownloader => "rule-downloader",
            GroupKind::Manager => "manager",
            GroupKind::DataHandler => "datahandler",
            GroupKind::SubProc => "subproc",
            GroupKind::Gui => "gui",
            GroupKind::Sims => "sims",
            GroupKind::Netfinder => "netfinder",
            GroupKind::StandbyPeer => "standby",
            GroupKind::RouterInfo => "router-info",
            GroupKind::ActiveLink => "active-link",
        }
    }

    /// Session types a peer on this listener may identify as.
    pub fn accepts(&self, session_type: SessionType) -> bool {
        use SessionType::*;
        match self {
            GroupKind::External => matches!(session_type, ExternalMmc),
            GroupKind::Mmc => matches!(
                session_type,
                AsciiMmcGenerator | AsciiMmcScheduler | AsciiJobMonitor
            ),
            GroupKind::RuleDownloader => matches!(session_type, AsciiRuleDownloader),
            GroupKind::Manager => matches!(session_type, AsciiManager),
            GroupKind::DataHandler => matches!(session_type, AsciiDataHandler),
            GroupKind::SubProc => matches!(session_type, AsciiSubProc),
            GroupKind::Gui => session_type.is_gui(),
            GroupKind::Sims => matches!(session_type, Sims),
            GroupKind::Netfinder => matches!(session_type, Netfinder),
            GroupKind::StandbyPeer | GroupKind::ActiveLink => matches!(session_type, AsciiServer),
            GroupKind::RouterInfo => matches!(session_type, RouterInfo),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an identified session stands for; carries ids, never references into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRole {
    Unidentified,
    Manager { manager_id: String },
    DataHandler { data_handler_id: String },
    SubProc { sub_proc_id: String },
    Gui { mask: SubscriptionMask },
    ExternalMmc { identity: String },
    MmcGenerator,
    MmcScheduler,
    JobMonitor,
    RuleDownloader,
    StandbyPeer,
    ActivePeer,
    Sims,
    Netfinder,
    RouterInfo,
}

impl SessionRole {
    pub fn for_identify(session_type: SessionType, name: &str) -> SessionRole {
        match session_type {
            SessionType::AsciiManager => SessionRole::Manager {
                manager_id: name.to_string(),
            },
            SessionType::AsciiDataHandler => SessionRole::DataHandler {
                data_handler_id: name.to_string(),
            },
            SessionType::AsciiSubProc => SessionRole::SubProc {
                sub_proc_id: name.to_string(),
            },
            SessionType::AsciiRuleDownloader => SessionRole::RuleDownloader,
            SessionType::AsciiMmcGenerator => SessionRole::MmcGenerator,
            SessionType::AsciiMmcScheduler => SessionRole::MmcScheduler,
            SessionType::AsciiJobMonitor => SessionRole::JobMonitor,
            SessionType::AsciiServer => SessionRole::StandbyPeer,
            SessionType::GuiAsciiStatusInfo
            | SessionType::GuiAsciiConfigInfo
            | SessionType::GuiAsciiRuleEditor
            | SessionType::GuiAsciiCommand => SessionRole::Gui {
                mask: session_type.subscription(),
            },
            SessionType::ExternalMmc => SessionRole::ExternalMmc {
                identity: name.to_string(),
            },
            SessionType::Sims => SessionRole::Sims,
            SessionType::Netfinder => SessionRole::Netfinder,
            SessionType::RouterInfo => SessionRole::RouterInfo,
        }
    }

    pub fn subscription(&self) -> SubscriptionMask {
        match self {
            SessionRole::Gui { mask } => *mask,
            _ => SubscriptionMask::NONE,
        }
    }
}

/// Timers a session arms on its own sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTimer {
    AliveSend,
    AliveRecv,
}

/// One row of a group health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketInfo {
    pub name: String,
    pub peer: String,
    pub session_type: Option<SessionType>,
    pub identified: bool,
    pub pending_bytes: usize,
    pub writable: bool,
    pub created_at: DateTime<Utc>,
}
