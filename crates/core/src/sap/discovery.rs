use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use super::packet::SapPacket;
use crate::sdp;

/// A remote AES67 sender learned from SAP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredStream {
    pub session_hash_id: u16,
    pub origin_address: String,
    pub session_name: String,
    pub multicast_address: String,
    pub port: u16,
    pub channel_count: u8,
    pub packet_time_ms: u32,
    pub ptp_clock_id: String,
    pub last_seen_epoch_ms: u64,
}

/// What an inbound datagram did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered,
    Refreshed,
    Removed,
    /// Deletion for a hash that was not in the table.
    Unknown,
    /// Sent by this host.
    Ignored,
}

/// Streams keyed by SAP message id hash.
///
/// Keys are the 16-bit hash, not stream content: two sessions whose hashes
/// collide overwrite each other.
#[derive(Clone, Default)]
pub struct DiscoveryTable {
    streams: Arc<Mutex<BTreeMap<u16, DiscoveredStream>>>,
}

impl DiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded SAP packet received from `sender`.
    ///
    /// Packets whose sender equals `own_address` are dropped.
    pub fn handle(
        &self,
        packet: &SapPacket,
        sender: Ipv4Addr,
        own_address: Option<Ipv4Addr>,
    ) -> DiscoveryEvent {
        if own_address == Some(sender) {
            return DiscoveryEvent::Ignored;
        }

        let hash = packet.msg_id_hash;

        if packet.deletion {
            return match self.streams.lock().remove(&hash) {
                Some(stream) => {
                    tracing::info!(hash, session = %stream.session_name, "SAP stream deleted");
                    DiscoveryEvent::Removed
                }
                None => DiscoveryEvent::Unknown,
            };
        }

        let summary = sdp::parse(&packet.payload);
        let stream = DiscoveredStream {
            session_hash_id: hash,
            origin_address: sender.to_string(),
            session_name: summary.session_name,
            multicast_address: summary.multicast_address,
            port: summary.port,
            channel_count: summary.channel_count,
            packet_time_ms: summary.packet_time_ms,
            ptp_clock_id: summary.ptp_clock_id,
            last_seen_epoch_ms: now_epoch_ms(),
        };

        let mut streams = self.streams.lock();
        let is_new = !streams.contains_key(&hash);
        if is_new {
            tracing::info!(
                hash,
                session = %stream.session_name,
                origin = %stream.origin_address,
                multicast = %stream.multicast_address,
                port = stream.port,
                channels = stream.channel_count,
                "discovered SAP stream"
            );
        }
        streams.insert(hash, stream);

        if is_new {
            DiscoveryEvent::Discovered
        } else {
            DiscoveryEvent::Refreshed
        }
    }

    pub fn get(&self, hash: u16) -> Option<DiscoveredStream> {
        self.streams.lock().get(&hash).cloned()
    }

    /// All known streams, ordered by hash.
    pub fn snapshot(&self) -> Vec<DiscoveredStream> {
        self.streams.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
