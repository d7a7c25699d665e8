use serde::{Deserialize, Serialize};
use std::fmt;

/// Type announced by a peer in its identify packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    AsciiManager,
    AsciiDataHandler,
    AsciiSubProc,
    AsciiRuleDownloader,
    AsciiMmcGenerator,
    AsciiMmcScheduler,
    AsciiJobMonitor,
    AsciiServer,
    GuiAsciiStatusInfo,
    GuiAsciiConfigInfo,
    GuiAsciiRuleEditor,
    GuiAsciiCommand,
    ExternalMmc,
    Sims,
    Netfinder,
    RouterInfo,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::AsciiManager => "ASCII_MANAGER",
            SessionType::AsciiDataHandler => "ASCII_DATA_HANDLER",
            SessionType::AsciiSubProc => "ASCII_SUB_PROC",
            SessionType::AsciiRuleDownloader => "ASCII_RULE_DOWNLOADER",
            SessionType::AsciiMmcGenerator => "ASCII_MMC_GENERATOR",
            SessionType::AsciiMmcScheduler => "ASCII_MMC_SCHEDULER",
            SessionType::AsciiJobMonitor => "ASCII_JOB_MONITOR",
            SessionType::AsciiServer => "ASCII_SERVER",
            SessionType::GuiAsciiStatusInfo => "GUI_ASCII_STATUS_INFO",
            SessionType::GuiAsciiConfigInfo => "GUI_ASCII_CONFIG_INFO",
            SessionType::GuiAsciiRuleEditor => "GUI_ASCII_RULE_EDITOR",
            SessionType::GuiAsciiCommand => "GUI_ASCII_COMMAND",
            SessionType::ExternalMmc => "EXTERNAL_MMC",
            SessionType::Sims => "SIMS",
            SessionType::Netfinder => "NETFINDER",
            SessionType::RouterInfo => "ROUTER_INFO",
        }
    }

    pub fn is_gui(&self) -> bool {
        matches!(
            self,
            SessionType::GuiAsciiStatusInfo
                | SessionType::GuiAsciiConfigInfo
                | SessionType::GuiAsciiRuleEditor
                | SessionType::GuiAsciiCommand
        )
    }

    /// Delta streams a GUI of this type subscribes to.
    pub fn subscription(&self) -> SubscriptionMask {
        match self {
            SessionType::GuiAsciiStatusInfo => SubscriptionMask::STATUS,
            SessionType::GuiAsciiConfigInfo => SubscriptionMask::CONFIG,
            SessionType::GuiAsciiRuleEditor => SubscriptionMask::RULE_EDITOR,
            SessionType::GuiAsciiCommand => SubscriptionMask::COMMAND,
            _ => SubscriptionMask::NONE,
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of GUI delta streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SubscriptionMask(u8);

impl SubscriptionMask {
    pub const NONE: SubscriptionMask = SubscriptionMask(0);
    pub const STATUS: SubscriptionMask = SubscriptionMask(1);
    pub const CONFIG: SubscriptionMask = SubscriptionMask(1 << 1);
    pub const RULE_EDITOR: SubscriptionMask = SubscriptionMask(1 << 2);
    pub const COMMAND: SubscriptionMask = SubscriptionMask(1 << 3);

    pub const fn union(self, other: SubscriptionMask) -> SubscriptionMask {
        SubscriptionMask(self.0 | other.0)
    }

    pub const fn intersects(self, other: SubscriptionMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: SubscriptionMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}
