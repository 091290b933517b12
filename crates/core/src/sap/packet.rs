use std::net::Ipv4Addr;

use crate::error::{Aes67Error, Result, SapErrorKind};
use crate::sdp::fnv1a;

/// SAP version carried in the top three bits of byte 0.
pub const SAP_VERSION: u8 = 1;
pub const SDP_PAYLOAD_TYPE: &str = "application/sdp";

/// Fixed header: flags, auth length, message id hash, IPv4 source.
pub const SAP_HEADER_LEN: usize = 8;

const FLAG_ADDRESS_TYPE: u8 = 0x10;
const FLAG_MESSAGE_TYPE: u8 = 0x04;
const FLAG_ENCRYPTED: u8 = 0x02;
const FLAG_COMPRESSED: u8 = 0x01;

/// SAP packet (RFC 2974 §3).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | V=1 |A|R|T|E|C|   auth len    |         msg id hash           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                originating source (IPv4)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          optional authentication data (auth len words)        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        payload type "application/sdp" NUL                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        payload (SDP text)                                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// T is the deletion flag. This implementation never emits authentication
/// data, IPv6 sources, encryption, or compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SapPacket {
    pub deletion: bool,
    pub msg_id_hash: u16,
    pub origin: Ipv4Addr,
    pub payload_type: String,
    pub payload: String,
}

impl SapPacket {
    pub fn announce(msg_id_hash: u16, origin: Ipv4Addr, sdp: &str) -> Self {
        Self {
            deletion: false,
            msg_id_hash,
            origin,
            payload_type: SDP_PAYLOAD_TYPE.to_string(),
            payload: sdp.to_string(),
        }
    }

    pub fn deletion(msg_id_hash: u16, origin: Ipv4Addr, sdp: &str) -> Self {
        Self {
            deletion: true,
            ..Self::announce(msg_id_hash, origin, sdp)
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut header0 = SAP_VERSION << 5;
        if self.deletion {
            header0 |= FLAG_MESSAGE_TYPE;
        }

        let mut packet =
            Vec::with_capacity(SAP_HEADER_LEN + self.payload_type.len() + 1 + self.payload.len());
        packet.push(header0);
        packet.push(0);
        packet.extend_from_slice(&self.msg_id_hash.to_be_bytes());
        packet.extend_from_slice(&self.origin.octets());
        packet.extend_from_slice(self.payload_type.as_bytes());
        packet.push(0);
        packet.extend_from_slice(self.payload.as_bytes());
        packet
    }

    /// Parse wire bytes.
    ///
    /// The payload after the NUL-terminated type string may be empty; non
    /// UTF-8 bytes are replaced rather than rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < SAP_HEADER_LEN {
            return Err(sap_error(SapErrorKind::Truncated));
        }

        let header0 = data[0];
        let version = header0 >> 5;
        if version != SAP_VERSION {
            return Err(sap_error(SapErrorKind::UnsupportedVersion(version)));
        }
        if header0 & FLAG_ADDRESS_TYPE != 0 {
            return Err(sap_error(SapErrorKind::Ipv6Origin));
        }
        if header0 & (FLAG_ENCRYPTED | FLAG_COMPRESSED) != 0 {
            return Err(sap_error(SapErrorKind::UnsupportedPayload));
        }

        let deletion = header0 & FLAG_MESSAGE_TYPE != 0;
        let auth_len = usize::from(data[1]) * 4;
        let msg_id_hash = u16::from_be_bytes([data[2], data[3]]);
        let origin = Ipv4Addr::new(data[4], data[5], data[6], data[7]);

        let payload_start = SAP_HEADER_LEN + auth_len;
        if payload_start >= data.len() {
            return Err(sap_error(SapErrorKind::Truncated));
        }

        let rest = &data[payload_start..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(sap_error(SapErrorKind::MissingPayloadType))?;

        Ok(Self {
            deletion,
            msg_id_hash,
            origin,
            payload_type: String::from_utf8_lossy(&rest[..nul]).into_owned(),
            payload: String::from_utf8_lossy(&rest[nul + 1..]).into_owned(),
        })
    }
}

fn sap_error(kind: SapErrorKind) -> Aes67Error {
    Aes67Error::Sap { kind }
}

/// Message id hash for a stream: FNV-1a of `"<mcast>:<port>:<name>"`, low
/// 16 bits. Stable across restarts for the same triple.
pub fn session_hash(multicast_address: Ipv4Addr, port: u16, name: &str) -> u16 {
    let key = format!("{multicast_address}:{port}:{name}");
    (fnv1a(key.as_bytes()) & 0xFFFF) as u16
}
