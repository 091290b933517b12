//! AES67 PTP profile for the external daemon's `[global]` config syntax.
//!
//! ```text
//! [global]
//! domainNumber            0
//! twoStepFlag             1
//! logAnnounceInterval     -3      ← 8 announces/s
//! logSyncInterval         -3      ← 8 syncs/s
//! delay_mechanism         E2E
//! time_stamping           hardware | software
//! ```

use std::fmt;

/// Where packet timestamps are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamping {
    /// NIC hardware timestamps (requires a PHC, e.g. `/dev/ptp0`).
    Hardware,
    /// Kernel software timestamps; works on any interface.
    Software,
}

impl fmt::Display for Timestamping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Timestamping::Hardware => "hardware",
            Timestamping::Software => "software",
        })
    }
}

const PROFILE_KEYS: &[(&str, &str)] = &[
    ("domainNumber", "0"),
    ("twoStepFlag", "1"),
    ("priority1", "128"),
    ("priority2", "128"),
    ("clockClass", "248"),
    ("clockAccuracy", "0xFE"),
    ("offsetScaledLogVariance", "0xFFFF"),
    ("logAnnounceInterval", "-3"),
    ("logSyncInterval", "-3"),
    ("logMinDelayReqInterval", "-3"),
    ("announceReceiptTimeout", "3"),
    ("syncReceiptTimeout", "0"),
    ("transportSpecific", "0x0"),
    ("network_transport", "UDPv4"),
    ("delay_mechanism", "E2E"),
];

/// Render the daemon configuration file for the given timestamping mode.
pub fn render(timestamping: Timestamping) -> String {
    let mut conf = String::from("[global]\n");
    for (key, value) in PROFILE_KEYS {
        conf.push_str(&format!("{key:<24}{value}\n"));
    }
    conf.push_str(&format!("{:<24}{timestamping}\n", "time_stamping"));
    conf
}
