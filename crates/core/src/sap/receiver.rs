use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::discovery::{DiscoveryEvent, DiscoveryTable};
use super::packet::SapPacket;
use super::{SAP_MULTICAST_ADDRESS, SAP_PORT};
use crate::error::Result;

/// Largest SAP datagram accepted.
const MAX_DATAGRAM: usize = 4096;

/// Receiver runtime settings.
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Interface address used to join the group.
    pub interface_addr: Ipv4Addr,
    /// Datagrams from this address are our own announcements.
    pub own_addr: Option<Ipv4Addr>,
    /// Upper bound on how long the loop takes to notice a stop.
    pub recv_timeout: Duration,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            group: SAP_MULTICAST_ADDRESS,
            port: SAP_PORT,
            interface_addr: Ipv4Addr::UNSPECIFIED,
            own_addr: None,
            recv_timeout: Duration::from_secs(2),
        }
    }
}

/// Background SAP listener feeding a [`DiscoveryTable`].
pub struct SapReceiver {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SapReceiver {
    /// Bind, join the group and spawn the receive thread.
    ///
    /// A failed bind is returned; a failed group join is only logged, the
    /// socket still receives unicast SAP.
    pub fn start(settings: ReceiverSettings, table: DiscoveryTable) -> Result<Self> {
        let socket = open_socket(&settings)?;
        let running = Arc::new(AtomicBool::new(true));

        tracing::info!(
            group = %settings.group,
            port = settings.port,
            interface = %settings.interface_addr,
            "SAP receiver started"
        );

        let r = running.clone();
        let own_addr = settings.own_addr;
        let handle = thread::Builder::new()
            .name("sap-receive".to_string())
            .spawn(move || receive_loop(socket, table, own_addr, r))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and join it; returns within one receive timeout.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("SAP receiver thread panicked");
            }
            tracing::info!("SAP receiver stopped");
        }
    }
}

impl Drop for SapReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Decode one datagram and apply it to `table`.
///
/// Returns `None` for datagrams that are not valid SAP.
pub fn handle_datagram(
    table: &DiscoveryTable,
    data: &[u8],
    sender: Ipv4Addr,
    own_addr: Option<Ipv4Addr>,
) -> Option<DiscoveryEvent> {
    match SapPacket::decode(data) {
        Ok(packet) => Some(table.handle(&packet, sender, own_addr)),
        Err(e) => {
            tracing::trace!(%sender, error = %e, "dropping SAP datagram");
            None
        }
    }
}

/// Check that the SAP port can be bound on this host.
pub fn probe_bind(port: u16) -> bool {
    let settings = ReceiverSettings {
        port,
        ..ReceiverSettings::default()
    };
    bind_socket(&settings).is_ok()
}

fn bind_socket(settings: &ReceiverSettings) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port).into())?;
    Ok(socket)
}

fn open_socket(settings: &ReceiverSettings) -> Result<UdpSocket> {
    let socket = bind_socket(settings)?;
    if let Err(e) = socket.join_multicast_v4(&settings.group, &settings.interface_addr) {
        tracing::warn!(
            group = %settings.group,
            interface = %settings.interface_addr,
            error = %e,
            "failed to join SAP multicast group"
        );
    }
    socket.set_read_timeout(Some(settings.recv_timeout))?;
    Ok(socket.into())
}

fn receive_loop(
    socket: UdpSocket,
    table: DiscoveryTable,
    own_addr: Option<Ipv4Addr>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, SocketAddr::V4(from))) => {
                handle_datagram(&table, &buf[..len], *from.ip(), own_addr);
            }
            Ok((_, SocketAddr::V6(from))) => {
                tracing::trace!(%from, "ignoring IPv6 SAP sender");
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "SAP receive error");
                }
            }
        }
    }
    tracing::debug!("SAP receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_datagrams_are_dropped() {
        let table = DiscoveryTable::new();
        let sender = Ipv4Addr::new(10, 0, 0, 9);
        assert_eq!(handle_datagram(&table, &[0x20, 0, 0], sender, None), None);
        assert_eq!(handle_datagram(&table, &[0x40; 32], sender, None), None);
        assert!(table.is_empty());
    }

    #[test]
    fn valid_datagram_reaches_table() {
        let table = DiscoveryTable::new();
        let sender = Ipv4Addr::new(10, 0, 0, 9);
        let pkt = SapPacket::announce(5, sender, "v=0\r\ns=Remote\r\n").encode();
        assert_eq!(
            handle_datagram(&table, &pkt, sender, Some(Ipv4Addr::new(10, 0, 0, 1))),
            Some(DiscoveryEvent::Discovered)
        );
        assert_eq!(table.get(5).unwrap().session_name, "Remote");
    }

    #[test]
    fn own_datagram_is_suppressed() {
        let table = DiscoveryTable::new();
        let me = Ipv4Addr::new(10, 0, 0, 1);
        let pkt = SapPacket::announce(5, me, "v=0\r\ns=Me\r\n").encode();
        assert_eq!(
            handle_datagram(&table, &pkt, me, Some(me)),
            Some(DiscoveryEvent::Ignored)
        );
        assert!(table.is_empty());
    }
}
