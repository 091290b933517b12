use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::packet::{SapPacket, session_hash};
use super::{SAP_ANNOUNCE_INTERVAL_SECS, SAP_MULTICAST_TTL, sap_group};
use crate::clock::UNKNOWN_CLOCK_ID;
use crate::config::Instance;
use crate::error::Result;
use crate::{net, sdp};

/// Longest single sleep between running-flag checks.
const STOP_POLL_STEP: Duration = Duration::from_secs(1);

/// Called once per announce cycle, after the announces went out.
pub type CycleHook = Box<dyn FnMut() + Send>;

/// Announcer runtime settings.
#[derive(Debug, Clone)]
pub struct AnnouncerSettings {
    pub destination: SocketAddrV4,
    pub interval: Duration,
    pub ttl: u32,
    /// Outgoing multicast interface; `None` leaves the routing table in charge.
    pub multicast_if: Option<Ipv4Addr>,
    /// Source interface for instances that name none.
    pub default_interface: String,
    /// EUI-64 advertised in `a=ts-refclk`.
    pub clock_id: String,
}

impl Default for AnnouncerSettings {
    fn default() -> Self {
        Self {
            destination: sap_group(),
            interval: Duration::from_secs(SAP_ANNOUNCE_INTERVAL_SECS),
            ttl: SAP_MULTICAST_TTL,
            multicast_if: None,
            default_interface: String::new(),
            clock_id: UNKNOWN_CLOCK_ID.to_string(),
        }
    }
}

/// Precomputed announcement for one instance.
#[derive(Debug, Clone)]
pub struct SapEntry {
    pub instance_id: u32,
    pub hash: u16,
    pub sdp: String,
    pub announce: Vec<u8>,
    pub delete: Vec<u8>,
}

impl SapEntry {
    pub fn new(instance: &Instance, default_interface: &str, clock_id: &str) -> Self {
        let interface = if instance.interface_name.is_empty() {
            default_interface
        } else {
            instance.interface_name.as_str()
        };
        let origin = net::interface_ipv4_or_unspecified(interface);
        let hash = session_hash(instance.multicast_address, instance.port, &instance.name);
        let sdp = sdp::generate_sdp(instance, origin, clock_id);
        Self {
            instance_id: instance.id,
            hash,
            announce: SapPacket::announce(hash, origin, &sdp).encode(),
            delete: SapPacket::deletion(hash, origin, &sdp).encode(),
            sdp,
        }
    }
}

/// Background SAP announce worker.
///
/// The instance list is snapshotted at start; configuration changes need a
/// stop and a fresh start.
pub struct SapAnnouncer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    session_count: usize,
}

impl SapAnnouncer {
    /// Open the socket and spawn the announce thread for every announced
    /// instance in `instances`.
    pub fn start(
        instances: &[Instance],
        settings: AnnouncerSettings,
        hook: Option<CycleHook>,
    ) -> Result<Self> {
        let entries: Vec<SapEntry> = instances
            .iter()
            .filter(|inst| inst.is_announced())
            .map(|inst| SapEntry::new(inst, &settings.default_interface, &settings.clock_id))
            .collect();

        let socket = open_socket(&settings)?;
        let running = Arc::new(AtomicBool::new(true));
        let session_count = entries.len();

        tracing::info!(
            sessions = session_count,
            destination = %settings.destination,
            "SAP announcer started"
        );

        let r = running.clone();
        let handle = thread::Builder::new()
            .name("sap-announce".to_string())
            .spawn(move || announce_loop(socket, entries, settings, hook, r))?;

        Ok(Self {
            running,
            handle: Some(handle),
            session_count,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn session_count(&self) -> usize {
        self.session_count
    }

    /// Signal the thread and join it. Deletion packets are sent by the
    /// thread before this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("SAP announcer thread panicked");
            }
            tracing::info!("SAP announcer stopped");
        }
    }
}

impl Drop for SapAnnouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_socket(settings: &AnnouncerSettings) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(settings.ttl)?;
    socket.set_multicast_loop_v4(true)?;
    if let Some(addr) = settings.multicast_if
        && let Err(e) = socket.set_multicast_if_v4(&addr)
    {
        tracing::warn!(interface = %addr, error = %e, "cannot select SAP multicast interface");
    }
    Ok(socket.into())
}

fn announce_loop(
    socket: UdpSocket,
    entries: Vec<SapEntry>,
    settings: AnnouncerSettings,
    mut hook: Option<CycleHook>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        for entry in &entries {
            if let Err(e) = socket.send_to(&entry.announce, settings.destination) {
                tracing::warn!(instance_id = entry.instance_id, error = %e, "SAP announce send failed");
            }
        }
        tracing::trace!(sessions = entries.len(), "SAP announce cycle");

        let cycle_start = Instant::now();
        while running.load(Ordering::SeqCst) {
            let remaining = settings.interval.saturating_sub(cycle_start.elapsed());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(STOP_POLL_STEP));
        }

        // A full interval after the announce, so fresh transports get a
        // whole cycle before their first byte-count sample.
        if running.load(Ordering::SeqCst)
            && let Some(hook) = hook.as_mut()
        {
            hook();
        }
    }

    // Best effort: one deletion per session, no retry.
    for entry in &entries {
        match socket.send_to(&entry.delete, settings.destination) {
            Ok(_) => tracing::debug!(instance_id = entry.instance_id, hash = entry.hash, "SAP deletion sent"),
            Err(e) => tracing::warn!(instance_id = entry.instance_id, error = %e, "SAP deletion send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn instance(id: u32, mode: Mode, sap_enabled: bool) -> Instance {
        Instance {
            id,
            name: format!("Stream {id}"),
            mode,
            sap_enabled,
            interface_name: "lo".to_string(),
            ..Instance::default()
        }
    }

    #[test]
    fn entry_packets_share_hash() {
        let entry = SapEntry::new(&instance(1, Mode::Send, true), "", "AA-BB-CC-FF-FE-DD-EE-FF");
        let announce = SapPacket::decode(&entry.announce).unwrap();
        let delete = SapPacket::decode(&entry.delete).unwrap();
        assert!(!announce.deletion);
        assert!(delete.deletion);
        assert_eq!(announce.msg_id_hash, entry.hash);
        assert_eq!(delete.msg_id_hash, entry.hash);
        assert_eq!(announce.origin, Ipv4Addr::LOCALHOST);
        assert!(announce.payload.contains("a=ts-refclk:ptp=IEEE1588-2008:AA-BB-CC-FF-FE-DD-EE-FF:0"));
    }

    #[test]
    fn only_announced_instances_are_counted() {
        let instances = vec![
            instance(1, Mode::Send, true),
            instance(2, Mode::Receive, true),
            instance(3, Mode::Both, true),
            instance(4, Mode::Send, false),
        ];
        let settings = AnnouncerSettings {
            destination: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 19875),
            ..AnnouncerSettings::default()
        };
        let mut announcer = SapAnnouncer::start(&instances, settings, None).unwrap();
        assert_eq!(announcer.session_count(), 2);
        assert!(announcer.is_running());
        announcer.stop();
        assert!(!announcer.is_running());
    }

    #[test]
    fn cycle_hook_runs_after_the_interval() {
        use std::sync::atomic::AtomicUsize;

        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let hook: CycleHook = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let settings = AnnouncerSettings {
            destination: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 19869),
            interval: Duration::from_millis(600),
            ..AnnouncerSettings::default()
        };
        let mut announcer =
            SapAnnouncer::start(&[instance(1, Mode::Send, true)], settings, Some(hook)).unwrap();

        thread::sleep(Duration::from_millis(300));
        assert_eq!(polls.load(Ordering::SeqCst), 0, "no poll before the first interval ends");
        thread::sleep(Duration::from_millis(600));
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        // Stopping mid-interval skips the pending poll.
        announcer.stop();
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }
}
