//! Instance configuration (the persisted `instances.json` document).
//!
//! The file is read wholesale on every apply and never patched in place:
//!
//! ```text
//! {
//!   "ptpEnabled": true,
//!   "ptpInterface": "eth0",
//!   "instances": [
//!     { "id": 1, "name": "Main", "mode": "send", "multicastIP": "239.69.0.1",
//!       "port": 5004, "channels": 2, "ptime": 4, "sapEnabled": true }
//!   ]
//! }
//! ```
//!
//! Missing keys take the defaults below. Values outside the AES67 profile
//! (packet time, channel count) are coerced rather than rejected. An
//! instance that cannot be read at all is skipped; its siblings still load.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Aes67Error, Result};

pub const DEFAULT_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 69, 0, 1);
pub const DEFAULT_PORT: u16 = 5004;
pub const DEFAULT_CHANNELS: u8 = 2;
pub const MAX_CHANNELS: u8 = 8;
pub const DEFAULT_LATENCY_MS: u32 = 10;
pub const DEFAULT_PTIME_MS: u32 = 4;
pub const DEFAULT_PTP_INTERFACE: &str = "eth0";

/// AES67 packet times accepted on the wire.
pub fn is_valid_ptime(ptime: i64) -> bool {
    ptime == 1 || ptime == 4
}

/// Which directions an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Send,
    Receive,
    Both,
}

impl Mode {
    pub fn sends(self) -> bool {
        matches!(self, Mode::Send | Mode::Both)
    }

    pub fn receives(self) -> bool {
        matches!(self, Mode::Receive | Mode::Both)
    }
}

/// Transport direction. An instance in [`Mode::Both`] owns one of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured AES67 stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: u32,
    pub name: String,
    pub enabled: bool,
    pub mode: Mode,
    pub multicast_address: Ipv4Addr,
    pub port: u16,
    /// Always within `1..=8` after load.
    pub channel_count: u8,
    /// Network interface for RTP and SAP; empty means "first non-loopback".
    pub interface_name: String,
    pub session_name: String,
    pub receive_latency_ms: u32,
    pub sap_enabled: bool,
    /// Always 1 or 4 after load.
    pub packet_time_ms: u32,
}

impl Instance {
    /// Whether the SAP announcer should advertise this instance.
    pub fn is_announced(&self) -> bool {
        self.enabled && self.sap_enabled && self.mode.sends()
    }

    /// Media-graph node name: `aes67_<sanitized name>_<send|recv>`.
    pub fn node_name(&self, direction: Direction) -> String {
        let mut node = String::from("aes67_");
        for c in self.name.chars() {
            if c.is_ascii_alphanumeric() || c == '_' {
                node.push(c.to_ascii_lowercase());
            } else {
                node.push('_');
            }
        }
        node.push_str(match direction {
            Direction::Send => "_send",
            Direction::Receive => "_recv",
        });
        node
    }
}

impl Default for Instance {
    fn default() -> Self {
        InstanceFile::default().into_instance()
    }
}

/// Full configuration snapshot; replaced wholesale on every apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub instances: Vec<Instance>,
    pub ptp_enabled: bool,
    pub ptp_interface_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instances: Vec::new(),
            ptp_enabled: true,
            ptp_interface_name: DEFAULT_PTP_INTERFACE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Read and normalize the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text).map_err(|source| Aes67Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            instances = config.instances.len(),
            ptp_enabled = config.ptp_enabled,
            ptp_interface = %config.ptp_interface_name,
            "loaded AES67 configuration"
        );
        Ok(config)
    }

    /// Parse a configuration document, applying defaults and coercions.
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        let file: ConfigFile = serde_json::from_str(text)?;
        let instances = file
            .instances
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match InstanceFile::deserialize(value) {
                Ok(inst) => Some(inst.into_instance()),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping unreadable AES67 instance");
                    None
                }
            })
            .collect();
        Ok(Self {
            instances,
            ptp_enabled: file.ptp_enabled,
            ptp_interface_name: file.ptp_interface,
        })
    }

    pub fn enabled_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(|inst| inst.enabled)
    }

    pub fn instance(&self, id: u32) -> Option<&Instance> {
        self.instances.iter().find(|inst| inst.id == id)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    ptp_enabled: bool,
    ptp_interface: String,
    instances: Vec<Value>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            ptp_enabled: true,
            ptp_interface: DEFAULT_PTP_INTERFACE.to_string(),
            instances: Vec::new(),
        }
    }
}

/// On-disk shape of an instance. Numeric fields are read wide so that
/// out-of-profile values can be coerced instead of failing the whole file.
#[derive(Deserialize)]
#[serde(default)]
struct InstanceFile {
    id: u32,
    name: String,
    enabled: bool,
    mode: Mode,
    #[serde(rename = "multicastIP")]
    multicast_ip: Ipv4Addr,
    port: u16,
    #[serde(deserialize_with = "lenient_int")]
    channels: Option<i64>,
    interface: String,
    #[serde(rename = "sessionName")]
    session_name: Option<String>,
    latency: u32,
    #[serde(rename = "sapEnabled")]
    sap_enabled: bool,
    #[serde(deserialize_with = "lenient_int")]
    ptime: Option<i64>,
}

/// Any JSON number, truncated toward zero; anything else reads as absent.
fn lenient_int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    })
}

impl Default for InstanceFile {
    fn default() -> Self {
        Self {
            id: 0,
            name: "AES67".to_string(),
            enabled: true,
            mode: Mode::Send,
            multicast_ip: DEFAULT_MULTICAST_ADDRESS,
            port: DEFAULT_PORT,
            channels: None,
            interface: String::new(),
            session_name: None,
            latency: DEFAULT_LATENCY_MS,
            sap_enabled: true,
            ptime: None,
        }
    }
}

impl InstanceFile {
    fn into_instance(self) -> Instance {
        let packet_time_ms = match self.ptime {
            Some(ptime) if is_valid_ptime(ptime) => ptime as u32,
            ptime => {
                tracing::warn!(id = self.id, ?ptime, "invalid ptime, using {DEFAULT_PTIME_MS}ms");
                DEFAULT_PTIME_MS
            }
        };

        let channel_count = match self.channels.map(u8::try_from) {
            Some(Ok(ch)) if (1..=MAX_CHANNELS).contains(&ch) => ch,
            None => DEFAULT_CHANNELS,
            channels => {
                tracing::warn!(id = self.id, ?channels, "invalid channel count, using {DEFAULT_CHANNELS}");
                DEFAULT_CHANNELS
            }
        };

        let session_name = self
            .session_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.name.clone());

        Instance {
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            mode: self.mode,
            multicast_address: self.multicast_ip,
            port: self.port,
            channel_count,
            interface_name: self.interface,
            session_name,
            receive_latency_ms: self.latency,
            sap_enabled: self.sap_enabled,
            packet_time_ms,
        }
    }
}
