//! UDP transport: one connected datagram socket per device

use crate::transport::traits::{TransportConnector, TransportLink};
use anyhow::Result;
use async_trait::async_trait;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;
use swarm_shared::codec::{self, Response};
use swarm_shared::{timing, Ack, Command, ConnectError, DeviceAddress, SendError, Telemetry};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

/// Link to one device over a connected UDP socket
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
    /// Pairs each request with its response datagram
    exchange: Mutex<Vec<u8>>,
}

impl UdpLink {
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            exchange: Mutex::new(vec![0u8; codec::MAX_RESPONSE_SIZE]),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one datagram and wait for the next response
    async fn request(&self, payload: &[u8]) -> std::io::Result<Response> {
        let mut buf = self.exchange.lock().await;

        // Discard late answers to requests that already timed out
        while let Ok(n) = self.socket.try_recv(&mut buf) {
            debug!("{}: dropping stale response ({} bytes)", self.peer, n);
        }

        self.socket.send(payload).await?;
        let n = self.socket.recv(&mut buf).await?;

        codec::decode_response(&buf[..n])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[async_trait]
impl TransportLink for UdpLink {
    async fn send(&self, command: &Command) -> Result<Ack, SendError> {
        let payload = codec::encode(command).map_err(|e| SendError::Unsupported(e.to_string()))?;
        let started = Instant::now();

        let response = self
            .request(&payload)
            .await
            .map_err(|e| SendError::TransportFault(e.to_string()))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match response {
            Response::Ok => Ok(Ack::new("ok", elapsed_ms)),
            Response::Value(value) => Ok(Ack::new(value, elapsed_ms)),
            Response::Error(detail) => Err(SendError::TransportFault(format!(
                "{} rejected: {}",
                command.name(),
                detail
            ))),
        }
    }

    async fn receive_telemetry(&self) -> Result<Telemetry, SendError> {
        let response = self
            .request(&codec::encode_query(codec::BATTERY_QUERY))
            .await
            .map_err(|e| SendError::TransportFault(e.to_string()))?;

        let percent =
            codec::parse_battery(&response).map_err(|e| SendError::TransportFault(e.to_string()))?;
        Ok(Telemetry::new(percent))
    }

    async fn shutdown(&self) -> Result<()> {
        // Connectionless: dropping the socket releases the port
        debug!("{}: releasing UDP link", self.peer);
        Ok(())
    }

    fn supports(&self, command: &Command) -> bool {
        codec::instruction(command).is_ok()
    }
}

/// UDP connector for devices listening on a command port
pub struct UdpConnector {
    port: u16,
}

impl UdpConnector {
    /// Create a connector targeting `port` when an address carries no port
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    async fn resolve(&self, address: &DeviceAddress) -> Result<SocketAddr, ConnectError> {
        if let Ok(addr) = address.as_str().parse::<SocketAddr>() {
            return Ok(addr);
        }

        let target = format!("{}:{}", address, self.port);
        let mut candidates = match tokio::net::lookup_host(target.as_str()).await {
            Ok(candidates) => candidates,
            Err(e) => return Err(ConnectError::Unreachable(format!("{}: {}", target, e))),
        };

        match candidates.next() {
            Some(addr) => Ok(addr),
            None => Err(ConnectError::Unreachable(format!("{}: no address", target))),
        }
    }
}

impl Default for UdpConnector {
    fn default() -> Self {
        Self::new(timing::COMMAND_PORT)
    }
}

#[async_trait]
impl TransportConnector for UdpConnector {
    async fn connect(&self, address: &DeviceAddress) -> Result<Box<dyn TransportLink>, ConnectError> {
        let peer = self.resolve(address).await?;
        let local = if peer.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;

        let link = UdpLink::new(socket, peer);
        let handshake = link.request(&codec::encode_query(codec::HANDSHAKE)).await;
        match handshake {
            Ok(Response::Ok) => Ok(Box::new(link)),
            Ok(other) => Err(ConnectError::ProtocolMismatch(format!(
                "handshake answered with {:?}",
                other
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(ConnectError::ProtocolMismatch(e.to_string()))
            }
            Err(e) => Err(ConnectError::Unreachable(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "UDP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Minimal device on loopback answering the handshake, battery and commands
    async fn spawn_device(handshake_reply: &'static str) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let reply = match &buf[..n] {
                    b"command" => handshake_reply,
                    b"battery?" => "87\r\n",
                    b"flip f" => "error Not enough battery",
                    _ => "ok",
                };
                let _ = socket.send_to(reply.as_bytes(), from).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_connect_send_and_telemetry() {
        let device = spawn_device("ok").await;
        let connector = UdpConnector::default();

        let link = connector
            .connect(&DeviceAddress::new(device.to_string()))
            .await
            .expect("handshake failed");

        let ack = link.send(&Command::Takeoff).await.expect("send failed");
        assert_eq!(ack.response, "ok");

        let telemetry = link.receive_telemetry().await.expect("telemetry failed");
        assert_eq!(telemetry.battery_percent, 87);

        link.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_device_error_is_transport_fault() {
        let device = spawn_device("ok").await;
        let link = UdpConnector::default()
            .connect(&DeviceAddress::new(device.to_string()))
            .await
            .unwrap();

        let result = link
            .send(&Command::Flip {
                direction: swarm_shared::FlipDirection::Forward,
            })
            .await;
        assert!(matches!(result, Err(SendError::TransportFault(_))));
    }

    #[tokio::test]
    async fn test_handshake_mismatch() {
        let device = spawn_device("hello").await;
        let result = UdpConnector::default()
            .connect(&DeviceAddress::new(device.to_string()))
            .await;
        assert!(matches!(result, Err(ConnectError::ProtocolMismatch(_))));
    }

    #[tokio::test]
    async fn test_end_is_not_carried() {
        let device = spawn_device("ok").await;
        let link = UdpConnector::default()
            .connect(&DeviceAddress::new(device.to_string()))
            .await
            .unwrap();

        assert!(!link.supports(&Command::End));
        assert!(link.supports(&Command::Land));
    }

    /// Device whose first battery answer arrives after the caller gave up
    async fn spawn_laggy_device(delay: Duration) -> SocketAddr {
        let socket = std::sync::Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let mut battery_queries = 0;
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                match &buf[..n] {
                    b"battery?" => {
                        battery_queries += 1;
                        let reply = if battery_queries == 1 { "55" } else { "87" };
                        let late = battery_queries == 1;
                        let socket = socket.clone();
                        tokio::spawn(async move {
                            if late {
                                tokio::time::sleep(delay).await;
                            }
                            let _ = socket.send_to(reply.as_bytes(), from).await;
                        });
                    }
                    _ => {
                        let _ = socket.send_to(b"ok", from).await;
                    }
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_late_reply_is_not_paired_with_next_request() {
        let device = spawn_laggy_device(Duration::from_millis(150)).await;
        let link = UdpConnector::default()
            .connect(&DeviceAddress::new(device.to_string()))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(50), link.receive_telemetry()).await;
        assert!(first.is_err());

        // Let the late "55" land in the socket buffer
        tokio::time::sleep(Duration::from_millis(300)).await;

        let ack = link.send(&Command::Takeoff).await.unwrap();
        assert_eq!(ack.response, "ok");

        let telemetry = link.receive_telemetry().await.unwrap();
        assert_eq!(telemetry.battery_percent, 87);
    }

    #[tokio::test]
    async fn test_silent_host_never_completes_handshake() {
        // Bound but never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            UdpConnector::default().connect(&DeviceAddress::new(addr.to_string())),
        )
        .await;
        assert!(attempt.is_err());
    }

    #[tokio::test]
    async fn test_resolve_applies_command_port() {
        let connector = UdpConnector::new(8889);

        let explicit = connector
            .resolve(&DeviceAddress::from("127.0.0.1:9000"))
            .await
            .unwrap();
        assert_eq!(explicit.port(), 9000);

        let bare = connector
            .resolve(&DeviceAddress::from("127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(bare, SocketAddr::from((Ipv4Addr::LOCALHOST, 8889)));
    }

    #[test]
    fn test_connector_name() {
        assert_eq!(UdpConnector::new(8889).name(), "UDP");
    }
}
