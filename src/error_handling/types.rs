use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingValue(String),
    BadPortsRange(String),
    DirectoryDoesNotExist(String),
    EnvironmentMissing(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingValue(e) => write!(f, "Missing configuration value: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
            ConfigError::EnvironmentMissing(e) => write!(f, "Environment variable not set: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ReactorError {
    RuntimeBuild(std::io::Error),
    ThreadSpawn(std::io::Error),
    SignalInstall(std::io::Error),
    WorldGone(String),
    JoinFailed(String),
    UnknownSensor(String),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::RuntimeBuild(e) => write!(f, "Failed to build world runtime: {}", e),
            ReactorError::ThreadSpawn(e) => write!(f, "Failed to spawn world thread: {}", e),
            ReactorError::SignalInstall(e) => write!(f, "Failed to install signal handler: {}", e),
            ReactorError::WorldGone(name) => write!(f, "World {} is no longer running", name),
            ReactorError::JoinFailed(name) => write!(f, "World {} panicked before join", name),
            ReactorError::UnknownSensor(id) => write!(f, "Sensor {} is not registered here", id),
        }
    }
}

impl std::error::Error for ReactorError {}

#[derive(Debug)]
pub enum TransportError {
    BindError(String, std::io::Error),
    ConnectFailed(String, std::io::Error),
    Io(std::io::Error),
    Framing(String),
    Overflow { max: usize, cur: usize },
    Encode(String),
    Decode(String),
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::BindError(addr, e) => write!(f, "Bind to {} failed: {}", addr, e),
            TransportError::ConnectFailed(addr, e) => write!(f, "Connect to {} failed: {}", addr, e),
            TransportError::Io(e) => write!(f, "Socket error: {}", e),
            TransportError::Framing(e) => write!(f, "Framing error: {}", e),
            TransportError::Overflow { max, cur } => {
                write!(f, "Send buffer overflow (max {} bytes, pending {} bytes)", max, cur)
            }
            TransportError::Encode(e) => write!(f, "Packet body encode error: {}", e),
            TransportError::Decode(e) => write!(f, "Packet body decode error: {}", e),
            TransportError::Closed => write!(f, "Socket is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err)
    }
}

#[derive(Debug)]
pub enum SessionError {
    DuplicateName(String),
    NotIdentified,
    UnexpectedMessage(u32),
    Unauthorized(String),
    SessionLimitReached(String),
    Transport(TransportError),
    NotFound,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::DuplicateName(name) => write!(f, "Session name {} is already in use", name),
            SessionError::NotIdentified => write!(f, "Session is not identified"),
            SessionError::UnexpectedMessage(id) => write!(f, "Unexpected message id {}", id),
            SessionError::Unauthorized(e) => write!(f, "Unauthorized: {}", e),
            SessionError::SessionLimitReached(e) => write!(f, "Session limit reached for {}", e),
            SessionError::Transport(e) => write!(f, "Transport error: {}", e),
            SessionError::NotFound => write!(f, "Session not found"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        SessionError::Transport(err)
    }
}

#[derive(Debug)]
pub enum SupervisorError {
    SpawnFailed(String),
    RemoteExecFailed(String),
    KillFailed(String),
    NotConfigured(String),
    NotRunning(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::SpawnFailed(e) => write!(f, "Child spawn failed: {}", e),
            SupervisorError::RemoteExecFailed(e) => write!(f, "Remote exec failed: {}", e),
            SupervisorError::KillFailed(e) => write!(f, "Kill failed: {}", e),
            SupervisorError::NotConfigured(e) => write!(f, "Process not configured: {}", e),
            SupervisorError::NotRunning(e) => write!(f, "{} is not running", e),
        }
    }
}

impl std::error::Error for SupervisorError {}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    NotFound(String),
    AlreadyExists(String),
    MissingParent(String),
    HasChildren(String),
    RequestPending(String),
    InvalidDelta(String),
    ReadOnly,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(e) => write!(f, "{} does not exist", e),
            StoreError::AlreadyExists(e) => write!(f, "{} already exists", e),
            StoreError::MissingParent(e) => write!(f, "Parent {} does not exist", e),
            StoreError::HasChildren(e) => write!(f, "{} still has children", e),
            StoreError::RequestPending(e) => write!(f, "{} has a pending control request", e),
            StoreError::InvalidDelta(e) => write!(f, "Invalid modification: {}", e),
            StoreError::ReadOnly => write!(f, "Configuration is read-only on the standby server"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq)]
pub enum MmcError {
    QueueFull { identity: String, capacity: usize },
    QueueClosed(String),
    NotRoutable(String),
}

impl fmt::Display for MmcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmcError::QueueFull { identity, capacity } => {
                write!(f, "MMC queue of {} is full ({} requests)", identity, capacity)
            }
            MmcError::QueueClosed(identity) => write!(f, "MMC queue of {} is closed", identity),
            MmcError::NotRoutable(ne) => write!(f, "No manager holds the command port of {}", ne),
        }
    }
}

impl std::error::Error for MmcError {}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ConnectionFailed(String),
    WriteFailed(String),
    ReadFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ServerError {
    Configuration(ConfigError),
    Reactor(ReactorError),
    Transport(TransportError),
    Storage(StorageError),
    Store(StoreError),
    Supervisor(SupervisorError),
    Session(SessionError),
    InitializationFailed(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ServerError::Reactor(e) => write!(f, "Reactor error: {}", e),
            ServerError::Transport(e) => write!(f, "Transport error: {}", e),
            ServerError::Storage(e) => write!(f, "Storage error: {}", e),
            ServerError::Store(e) => write!(f, "Entity store error: {}", e),
            ServerError::Supervisor(e) => write!(f, "Supervisor error: {}", e),
            ServerError::Session(e) => write!(f, "Session error: {}", e),
            ServerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Configuration(err)
    }
}

impl From<ReactorError> for ServerError {
    fn from(err: ReactorError) -> Self {
        ServerError::Reactor(err)
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        ServerError::Transport(err)
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        ServerError::Storage(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        ServerError::Store(err)
    }
}

impl From<SupervisorError> for ServerError {
    fn from(err: SupervisorError) -> Self {
        ServerError::Supervisor(err)
    }
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        ServerError::Session(err)
    }
}
