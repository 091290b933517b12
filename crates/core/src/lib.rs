//! AES67 audio-over-IP session management.
//!
//! Keeps a device clock disciplined by PTP, announces and discovers streams
//! over SAP/SDP, and supervises one media transport per configured instance
//! and direction, rebuilding them when they fail or silently stall.
//!
//! ```no_run
//! use std::sync::Arc;
//! use aes67::{LaunchBackend, ManagerSettings, SessionManager};
//!
//! let manager = SessionManager::new(ManagerSettings::default(), Arc::new(LaunchBackend::default()));
//! manager.apply_config()?;
//! println!("{}", serde_json::to_string_pretty(&manager.status()).unwrap());
//! # Ok::<(), aes67::Aes67Error>(())
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod manager;
pub mod net;
pub mod process;
pub mod sap;
pub mod sdp;
pub mod status;
pub mod transport;

pub use clock::{ClockSettings, ClockState, ClockSupervisor};
pub use config::{Direction, Instance, Mode, SessionConfig};
pub use error::{Aes67Error, Result, SapErrorKind};
pub use manager::{ApplyReport, ManagerSettings, SessionManager};
pub use sap::{DiscoveredStream, DiscoveryTable, SapAnnouncer, SapPacket, SapReceiver};
pub use status::{PtpStatus, SelfTestReport, Status, TestResult, TransportStatus};
pub use transport::launch::LaunchSettings;
pub use transport::{
    Capability, Diagnostic, HealthState, LaunchBackend, MediaBackend, MediaPipeline,
    TransportRegistry,
};
