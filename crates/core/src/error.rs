//! Error types for the AES67 session manager.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur in the AES67 session manager.
///
/// Variants map to specific failure modes across the subsystem:
///
/// - **Clock**: [`ClockBinaryMissing`](Self::ClockBinaryMissing),
///   [`ClockSyncUnavailable`](Self::ClockSyncUnavailable).
/// - **Transport**: [`TransportCreate`](Self::TransportCreate),
///   [`TransportRestart`](Self::TransportRestart).
/// - **Wire**: [`Sap`](Self::Sap), for malformed SAP datagrams.
/// - **Config**: [`Config`](Self::Config), for an unreadable instance configuration.
/// - **System**: [`Io`](Self::Io), [`Os`](Self::Os).
///
/// None of these are fatal to the process; callers log them and continue
/// in a degraded mode.
#[derive(Debug, thiserror::Error)]
pub enum Aes67Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A POSIX call (signal delivery, interface enumeration) failed.
    #[error("OS error: {0}")]
    Os(#[from] nix::errno::Errno),

    /// The PTP daemon executable does not exist at the configured path.
    #[error("PTP daemon not found at {}", .0.display())]
    ClockBinaryMissing(PathBuf),

    /// The PTP daemon exited immediately with both hardware and software
    /// timestamping.
    #[error("PTP daemon failed to start on {interface} with hardware or software timestamping")]
    ClockSyncUnavailable { interface: String },

    /// The media backend refused to build or start a transport.
    #[error("failed to create {direction} transport for instance {instance_id}: {reason}")]
    TransportCreate {
        instance_id: u32,
        direction: &'static str,
        reason: String,
    },

    /// An in-place restart of a running transport failed.
    #[error("failed to restart transport: {0}")]
    TransportRestart(String),

    /// The instance configuration file could not be parsed.
    #[error("invalid configuration in {}: {source}", path.display())]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to decode a SAP datagram (RFC 2974 §3).
    #[error("SAP decode error: {kind}")]
    Sap { kind: SapErrorKind },
}

/// Specific kind of SAP decode failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SapErrorKind {
    /// Shorter than the fixed header, or the auth data runs past the end.
    Truncated,
    /// Version field (top three bits of byte 0) was not 1.
    UnsupportedVersion(u8),
    /// Address type bit set: the originating source is IPv6.
    Ipv6Origin,
    /// Encrypted or compressed payloads are not handled.
    UnsupportedPayload,
    /// The payload type string is not NUL-terminated.
    MissingPayloadType,
}

impl fmt::Display for SapErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated packet"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported version {v}"),
            Self::Ipv6Origin => write!(f, "IPv6 originating source"),
            Self::UnsupportedPayload => write!(f, "encrypted or compressed payload"),
            Self::MissingPayloadType => write!(f, "missing payload type"),
        }
    }
}

/// Convenience alias for `Result<T, Aes67Error>`.
pub type Result<T> = std::result::Result<T, Aes67Error>;
