use super::config::{TransportConfig, TransportMode};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tracing::debug;

/// One live channel to the sink. Owned exclusively by the delivery worker.
pub trait SinkLink: Send {
    /// Write every frame of one message, in order.
    fn send<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, io::Result<()>>;
}

/// Produces fresh links; called on open and on every reconnect.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn SinkLink>>>;

    /// Human readable target for logs and errors.
    fn target(&self) -> String;
}

/// Resolves `host:port`, returning the first address.
pub async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}:{port}"),
            )
        })
}

/// Real TCP/UDP connector. The sink name is looked up again on every
/// connect so a moved sink is picked up by the next reconnect.
#[derive(Debug, Clone)]
pub struct NetworkConnector {
    host: String,
    port: u16,
    mode: TransportMode,
    tcp_no_delay: bool,
    send_buffer_size: u32,
}

impl NetworkConnector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            mode: config.mode,
            tcp_no_delay: config.tcp_no_delay,
            send_buffer_size: config.send_buffer_size,
        }
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> io::Result<Box<dyn SinkLink>> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if self.send_buffer_size > 0 {
            socket.set_send_buffer_size(self.send_buffer_size)?;
        }
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(self.tcp_no_delay)?;
        debug!("Connected TCP link to {}", addr);
        Ok(Box::new(TcpLink {
            writer: BufWriter::new(stream),
        }))
    }

    async fn connect_udp(&self, addr: SocketAddr) -> io::Result<Box<dyn SinkLink>> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(addr).await?;
        debug!("Bound UDP link {} -> {}", socket.local_addr()?, addr);
        Ok(Box::new(UdpLink { socket }))
    }
}

impl Connector for NetworkConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<Box<dyn SinkLink>>> {
        Box::pin(async move {
            let addr = resolve(&self.host, self.port).await?;
            match self.mode {
                TransportMode::Tcp => self.connect_tcp(addr).await,
                TransportMode::Udp => self.connect_udp(addr).await,
            }
        })
    }

    fn target(&self) -> String {
        format!("{}://{}:{}", self.mode, self.host, self.port)
    }
}

struct TcpLink {
    writer: BufWriter<TcpStream>,
}

impl SinkLink for TcpLink {
    fn send<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            for frame in frames {
                self.writer.write_all(frame).await?;
            }
            self.writer.flush().await
        })
    }
}

struct UdpLink {
    socket: UdpSocket,
}

impl SinkLink for UdpLink {
    fn send<'a>(&'a mut self, frames: &'a [Bytes]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            for frame in frames {
                let written = self.socket.send(frame).await?;
                if written != frame.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short datagram write: {written} of {} bytes", frame.len()),
                    ));
                }
            }
            Ok(())
        })
    }
}

/// Upper bound for establishing a link, shared by open and reconnect.
pub(crate) async fn connect_with_timeout(
    connector: &dyn Connector,
    timeout: Duration,
) -> io::Result<Box<dyn SinkLink>> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {timeout:?}"),
        )),
    }
}
