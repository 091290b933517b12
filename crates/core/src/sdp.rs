//! SDP (Session Description Protocol) for AES67 streams (RFC 4566, AES67 §8).
//!
//! Generated for every announced send instance and carried inside SAP:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <id> <id> IN IP4 <source>                ← origin, id unique per host+stream
//! s=<session-name>                             ← session name
//! c=IN IP4 <multicast>/4                       ← connection address / TTL
//! t=0 0                                        ← always active
//! m=audio <port> RTP/AVP 96                    ← media description
//! a=rtpmap:96 L24/48000/<channels>             ← 24-bit linear PCM
//! a=sendonly                                   ← direction
//! a=ptime:<ms>                                 ← packet time
//! a=ts-refclk:ptp=IEEE1588-2008:<eui64>:0      ← PTP reference clock, domain 0
//! a=mediaclk:direct=0                          ← media clock offset
//! ```
//!
//! [`parse`] reads the same fields back out of descriptions received from
//! remote senders.

use std::net::Ipv4Addr;

use crate::config::Instance;

pub const RTP_PAYLOAD_TYPE: u8 = 96;
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_ENCODING: &str = "L24";
/// Multicast TTL advertised in the `c=` line and used for RTP.
pub const AUDIO_RTP_TTL: u32 = 4;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a.
pub(crate) fn fnv1a(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Origin session id: stable for a given host and stream, positive 30-bit.
pub fn session_id(source_ip: Ipv4Addr, instance: &Instance) -> u32 {
    let key = format!(
        "{}:{}:{}:{}",
        source_ip, instance.name, instance.multicast_address, instance.port
    );
    fnv1a(key.as_bytes()) & 0x3FFF_FFFF
}

/// Generate the SDP description announced for `instance`.
pub fn generate_sdp(instance: &Instance, source_ip: Ipv4Addr, ptp_clock_id: &str) -> String {
    let id = session_id(source_ip, instance);
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {id} {id} IN IP4 {source_ip}"));
    sdp.push(format!("s={}", instance.session_name));
    sdp.push(format!(
        "c=IN IP4 {}/{}",
        instance.multicast_address, AUDIO_RTP_TTL
    ));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("m=audio {} RTP/AVP {}", instance.port, RTP_PAYLOAD_TYPE));
    sdp.push(format!(
        "a=rtpmap:{} {}/{}/{}",
        RTP_PAYLOAD_TYPE, AUDIO_ENCODING, AUDIO_SAMPLE_RATE, instance.channel_count
    ));
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("a=ptime:{}", instance.packet_time_ms));
    sdp.push(format!("a=ts-refclk:ptp=IEEE1588-2008:{ptp_clock_id}:0"));
    sdp.push("a=mediaclk:direct=0".to_string());

    tracing::trace!(instance_id = instance.id, "SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Whether `sdp` carries every attribute an AES67 receiver requires.
pub fn has_required_attributes(sdp: &str) -> bool {
    sdp.contains("v=0")
        && sdp.contains(&format!("{AUDIO_ENCODING}/{AUDIO_SAMPLE_RATE}/"))
        && sdp.contains("a=ts-refclk:")
        && sdp.contains("a=mediaclk:")
}

/// Stream parameters recovered from a received description.
///
/// Fields that are absent from the text keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpSummary {
    pub session_name: String,
    pub multicast_address: String,
    pub port: u16,
    pub payload_type: u8,
    pub sample_rate: u32,
    pub channel_count: u8,
    pub packet_time_ms: u32,
    pub ptp_clock_id: String,
}

impl Default for SdpSummary {
    fn default() -> Self {
        Self {
            session_name: String::new(),
            multicast_address: String::new(),
            port: 0,
            payload_type: RTP_PAYLOAD_TYPE,
            sample_rate: AUDIO_SAMPLE_RATE,
            channel_count: 2,
            packet_time_ms: 4,
            ptp_clock_id: String::new(),
        }
    }
}

/// Line-parse an SDP body. Unknown lines are skipped; malformed values are
/// ignored rather than failing the whole description.
pub fn parse(sdp: &str) -> SdpSummary {
    let mut summary = SdpSummary::default();

    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(name) = line.strip_prefix("s=") {
            summary.session_name = name.to_string();
        } else if let Some(conn) = line.strip_prefix("c=") {
            // c=IN IP4 239.69.0.1/4
            if let Some(addr) = conn.split_once("IP4 ").map(|(_, a)| a) {
                let addr = addr.split('/').next().unwrap_or(addr);
                summary.multicast_address = addr.trim().to_string();
            }
        } else if let Some(media) = line.strip_prefix("m=audio ") {
            // m=audio 5004 RTP/AVP 96
            if let Some(port) = media.split_whitespace().next().and_then(|p| p.parse().ok()) {
                summary.port = port;
            }
        } else if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            // a=rtpmap:96 L24/48000/2
            parse_rtpmap(rtpmap, &mut summary);
        } else if let Some(ptime) = line.strip_prefix("a=ptime:") {
            if let Ok(ptime) = ptime.trim().parse() {
                summary.packet_time_ms = ptime;
            }
        } else if let Some(refclk) = line.strip_prefix("a=ts-refclk:ptp=IEEE1588-") {
            // 2008:AA-BB-CC-FF-FE-DD-EE-FF:0
            let mut parts = refclk.split(':');
            if let (Some(_version), Some(clock_id)) = (parts.next(), parts.next()) {
                summary.ptp_clock_id = clock_id.to_string();
            }
        }
    }

    summary
}

fn parse_rtpmap(value: &str, summary: &mut SdpSummary) {
    let Some((pt, encoding)) = value.split_once(' ') else {
        return;
    };
    if let Ok(pt) = pt.trim().parse() {
        summary.payload_type = pt;
    }
    let mut fields = encoding.trim().split('/');
    let _name = fields.next();
    if let Some(rate) = fields.next().and_then(|r| r.parse().ok()) {
        summary.sample_rate = rate;
    }
    if let Some(ch) = fields.next().and_then(|c| c.parse().ok()) {
        summary.channel_count = ch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn instance() -> Instance {
        Instance {
            id: 1,
            name: "Main".to_string(),
            mode: Mode::Send,
            multicast_address: Ipv4Addr::new(239, 69, 0, 1),
            port: 5004,
            channel_count: 2,
            session_name: "Main Mix".to_string(),
            packet_time_ms: 4,
            ..Instance::default()
        }
    }

    const CLOCK: &str = "AA-BB-CC-FF-FE-DD-EE-FF";

    #[test]
    fn generates_aes67_sdp() {
        let src = Ipv4Addr::new(192, 168, 1, 100);
        let sdp = generate_sdp(&instance(), src, CLOCK);
        let id = session_id(src, &instance());

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains(&format!("o=- {id} {id} IN IP4 192.168.1.100\r\n")));
        assert!(sdp.contains("s=Main Mix\r\n"));
        assert!(sdp.contains("c=IN IP4 239.69.0.1/4\r\n"));
        assert!(sdp.contains("t=0 0\r\n"));
        assert!(sdp.contains("m=audio 5004 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 L24/48000/2\r\n"));
        assert!(sdp.contains("a=sendonly\r\n"));
        assert!(sdp.contains("a=ptime:4\r\n"));
        assert!(sdp.contains("a=ts-refclk:ptp=IEEE1588-2008:AA-BB-CC-FF-FE-DD-EE-FF:0\r\n"));
        assert!(sdp.contains("a=mediaclk:direct=0\r\n"));
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
        assert!(has_required_attributes(&sdp));

        let m_idx = sdp.find("m=audio").unwrap();
        let rtpmap_idx = sdp.find("a=rtpmap").unwrap();
        assert!(rtpmap_idx > m_idx, "media attributes must follow m=audio");
    }

    #[test]
    fn session_id_is_stable_and_distinct() {
        let src = Ipv4Addr::new(10, 0, 0, 5);
        let a = instance();
        let b = Instance {
            port: 5006,
            ..instance()
        };
        assert_eq!(session_id(src, &a), session_id(src, &a));
        assert_ne!(session_id(src, &a), session_id(src, &b));
        assert_ne!(
            session_id(src, &a),
            session_id(Ipv4Addr::new(10, 0, 0, 6), &a),
            "two hosts announcing the same stream must not collide"
        );
        assert!(session_id(src, &a) < 0x4000_0000);
    }

    #[test]
    fn parse_recovers_generated_fields() {
        let inst = Instance {
            channel_count: 8,
            packet_time_ms: 1,
            port: 5006,
            multicast_address: Ipv4Addr::new(239, 69, 0, 2),
            ..instance()
        };
        let sdp = generate_sdp(&inst, Ipv4Addr::new(10, 1, 1, 1), CLOCK);
        let parsed = parse(&sdp);
        assert_eq!(parsed.session_name, "Main Mix");
        assert_eq!(parsed.multicast_address, "239.69.0.2");
        assert_eq!(parsed.port, 5006);
        assert_eq!(parsed.payload_type, 96);
        assert_eq!(parsed.sample_rate, 48_000);
        assert_eq!(parsed.channel_count, 8);
        assert_eq!(parsed.packet_time_ms, 1);
        assert_eq!(parsed.ptp_clock_id, CLOCK);
    }

    #[test]
    fn parse_foreign_sdp_with_lf_endings() {
        let sdp = "v=0\n\
                   o=- 1 1 IN IP4 10.0.0.9\n\
                   s=Console Out\n\
                   c=IN IP4 239.1.2.3/32\n\
                   t=0 0\n\
                   m=audio 5008 RTP/AVP 97\n\
                   a=rtpmap:97 L24/96000/16\n\
                   a=ptime:0.125\n";
        let parsed = parse(sdp);
        assert_eq!(parsed.session_name, "Console Out");
        assert_eq!(parsed.multicast_address, "239.1.2.3");
        assert_eq!(parsed.port, 5008);
        assert_eq!(parsed.payload_type, 97);
        assert_eq!(parsed.sample_rate, 96_000);
        assert_eq!(parsed.channel_count, 16);
        assert_eq!(parsed.packet_time_ms, 4, "fractional ptime is left at default");
        assert_eq!(parsed.ptp_clock_id, "");
    }

    #[test]
    fn missing_attributes_detected() {
        assert!(!has_required_attributes("v=0\r\ns=x\r\n"));
    }
}
