//! SAP (Session Announcement Protocol, RFC 2974) announce and discovery.
//!
//! AES67 senders advertise their SDP descriptions by multicasting SAP
//! packets to a well-known group. Two background workers handle this:
//!
//! - [`SapAnnouncer`]: multicasts an announce packet for every announced
//!   send instance every 30 s, runs a caller-supplied hook (the transport
//!   watchdog) once per cycle, and sends one deletion packet per instance
//!   on stop.
//!
//! - [`SapReceiver`]: joins the group, decodes inbound packets and keeps the
//!   [`DiscoveryTable`] of remote senders up to date.
//!
//! Both are plain threads with an atomic running flag; neither blocks for
//! more than about two seconds before noticing a stop request.

pub mod announcer;
pub mod discovery;
pub mod packet;
pub mod receiver;

use std::net::{Ipv4Addr, SocketAddrV4};

pub use announcer::{AnnouncerSettings, CycleHook, SapAnnouncer, SapEntry};
pub use discovery::{DiscoveredStream, DiscoveryEvent, DiscoveryTable};
pub use packet::{SapPacket, session_hash};
pub use receiver::{ReceiverSettings, SapReceiver, handle_datagram};

/// Global-scope SAP group used by AES67 devices.
pub const SAP_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 255);
pub const SAP_PORT: u16 = 9875;
pub const SAP_MULTICAST_TTL: u32 = 255;
pub const SAP_ANNOUNCE_INTERVAL_SECS: u64 = 30;

/// Default announce destination.
pub fn sap_group() -> SocketAddrV4 {
    SocketAddrV4::new(SAP_MULTICAST_ADDRESS, SAP_PORT)
}
