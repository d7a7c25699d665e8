use super::socket::SocketStream;
use crate::error_handling::types::TransportError;
use crate::reactor::sensor::{IoEvent, IoSender, SensorId};
use log::{error, warn};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream, UnixListener, UnixStream};
use tokio::task::JoinHandle;

const ACCEPT_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp:{}", addr),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Listening socket whose accept loop reports [`IoEvent::Accepted`] to one sensor.
/// Dropping it stops accepting and removes a unix socket file.
#[derive(Debug)]
pub struct ListenSocket {
    addr: ListenAddr,
    task: JoinHandle<()>,
}

impl ListenSocket {
    pub fn listen(
        addr: ListenAddr,
        backlog: u32,
        sensor: SensorId,
        io: IoSender,
    ) -> Result<Self, TransportError> {
        let bind_err = |e: std::io::Error| TransportError::BindError(addr.to_string(), e);
        match &addr {
            ListenAddr::Tcp(socket_addr) => {
                let socket = if socket_addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .map_err(|e| {
                    error!("[transport] Socket error: {:?}", e);
                    bind_err(e)
                })?;
                socket.set_reuseaddr(true).map_err(bind_err)?;
                socket.bind(*socket_addr).map_err(bind_err)?;
                let listener = socket.listen(backlog).map_err(bind_err)?;
                let bound = listener.local_addr().map_err(bind_err)?;
                let task = tokio::spawn(accept_tcp(listener, sensor, io));
                Ok(Self {
                    addr: ListenAddr::Tcp(bound),
                    task,
                })
            }
            ListenAddr::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path).map_err(bind_err)?;
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                let label = format!("unix:{}", path.display());
                let task = tokio::spawn(accept_unix(listener, label, sensor, io));
                Ok(Self {
                    addr: ListenAddr::Unix(path.clone()),
                    task,
                })
            }
        }
    }

    /// Bound address; for TCP port 0 this carries the port actually assigned.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.addr
    }
}

impl Drop for ListenSocket {
    fn drop(&mut self) {
        self.task.abort();
        if let ListenAddr::Unix(path) = &self.addr {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn accept_tcp(listener: TcpListener, sensor: SensorId, io: IoSender) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let event = IoEvent::Accepted {
                    stream: SocketStream::Tcp(stream),
                    peer: peer.to_string(),
                };
                if !io.send(sensor, event) {
                    return;
                }
            }
            Err(e) => {
                warn!("[transport] Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

async fn accept_unix(listener: UnixListener, label: String, sensor: SensorId, io: IoSender) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let event = IoEvent::Accepted {
                    stream: SocketStream::Unix(stream),
                    peer: label.clone(),
                };
                if !io.send(sensor, event) {
                    return;
                }
            }
            Err(e) => {
                warn!("[transport] Accept on {} failed: {}", label, e);
                tokio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

pub async fn connect(addr: &ListenAddr) -> Result<SocketStream, TransportError> {
    let fail = |e: std::io::Error| TransportError::ConnectFailed(addr.to_string(), e);
    match addr {
        ListenAddr::Tcp(socket_addr) => TcpStream::connect(socket_addr)
            .await
            .map(SocketStream::Tcp)
            .map_err(fail),
        ListenAddr::Unix(path) => UnixStream::connect(path)
            .await
            .map(SocketStream::Unix)
            .map_err(fail),
    }
}

/// Connects in the background and reports [`IoEvent::Connected`] or
/// [`IoEvent::ConnectFailed`] to `sensor`.
pub fn spawn_connect(addr: ListenAddr, sensor: SensorId, io: IoSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let event = match connect(&addr).await {
            Ok(stream) => IoEvent::Connected {
                stream,
                peer: addr.to_string(),
            },
            Err(e) => IoEvent::ConnectFailed(e.to_string()),
        };
        io.send(sensor, event);
    })
}
