//! Media transports: the seam between session management and the media
//! engine that actually moves audio.
//!
//! The session manager never touches audio samples or RTP framing. It asks
//! a [`MediaBackend`] to build one [`MediaPipeline`] per instance and
//! direction, then only starts, stops and polls it:
//!
//! ```text
//!                 create(instance, direction)
//!  TransportRegistry ────────────────────────▶ MediaBackend
//!        │                                          │
//!        │ owns                                     ▼
//!        ▼                                    MediaPipeline
//!  TransportHandle ◀── health / diagnostics / bytes emitted / restart
//!        ▲
//!        │ poll_watchdog() once per SAP announce cycle
//! ```
//!
//! Two backends exist: [`launch::LaunchBackend`] runs each pipeline as a
//! `gst-launch-1.0` child process, and the `aes67-gst` crate builds them
//! in-process. Both use the descriptions from [`pipeline_description`].

pub mod launch;
pub mod registry;
pub mod watchdog;

use std::fmt;

use crate::config::{Direction, Instance};
use crate::error::Result;
use crate::sdp::{AUDIO_ENCODING, AUDIO_RTP_TTL, AUDIO_SAMPLE_RATE, RTP_PAYLOAD_TYPE};

pub use launch::LaunchBackend;
pub use registry::TransportRegistry;
pub use watchdog::WatchdogReport;

/// Name of the UDP sink element whose byte counter feeds stall detection.
pub const SEND_SINK_NAME: &str = "usink";

/// Media elements a working host must provide.
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "rtpL24pay",
    "rtpL24depay",
    "rtpjitterbuffer",
    "udpsrc",
    "udpsink",
    "audioconvert",
    "audioresample",
    "pipewiresrc",
    "pipewiresink",
];

/// Pipeline health as reported by the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Playing.
    Running,
    /// A transition to playing is still pending.
    Starting,
    /// Paused, ready or null.
    Stopped,
    /// The engine reported an unrecoverable state.
    Failed,
}

impl HealthState {
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthState::Running | HealthState::Starting)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Running => "running",
            HealthState::Starting => "starting",
            HealthState::Stopped => "stopped",
            HealthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A message queued by a pipeline since the last drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Error(String),
    Warning(String),
    Info(String),
}

/// Named capability probe result, e.g. a media element being installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub name: String,
    pub available: bool,
}

/// Factory for media pipelines.
pub trait MediaBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Build and start a pipeline for `instance` in `direction`.
    fn create(&self, instance: &Instance, direction: Direction) -> Result<Box<dyn MediaPipeline>>;

    /// Capabilities checked by the self-test. Empty if the backend cannot
    /// tell.
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }
}

/// A started pipeline. All calls are made under the registry lock.
pub trait MediaPipeline: Send {
    fn health(&mut self) -> HealthState;

    /// Messages queued since the previous call.
    fn drain_diagnostics(&mut self) -> Vec<Diagnostic>;

    /// Monotonic count of bytes pushed to the network, for send pipelines
    /// that can report one.
    fn bytes_emitted(&mut self) -> Option<u64>;

    /// Try to bring the pipeline back to playing in place.
    fn restart(&mut self) -> Result<()>;

    /// Stop and release the pipeline. Called once.
    fn stop(&mut self);
}

/// Registry-owned state for one running pipeline.
pub struct TransportHandle {
    pub instance_id: u32,
    pub name: String,
    pub direction: Direction,
    pub pipeline: Box<dyn MediaPipeline>,
    pub running: bool,
    pub last_error: String,
    pub stall_count: u32,
    pub last_byte_count: u64,
}

impl TransportHandle {
    pub fn new(instance: &Instance, direction: Direction, pipeline: Box<dyn MediaPipeline>) -> Self {
        Self {
            instance_id: instance.id,
            name: instance.name.clone(),
            direction,
            pipeline,
            running: true,
            last_error: String::new(),
            stall_count: 0,
            last_byte_count: 0,
        }
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("instance_id", &self.instance_id)
            .field("direction", &self.direction)
            .field("running", &self.running)
            .field("last_error", &self.last_error)
            .field("stall_count", &self.stall_count)
            .field("last_byte_count", &self.last_byte_count)
            .finish_non_exhaustive()
    }
}

/// GStreamer launch description for `instance` in `direction`.
///
/// Send:
/// ```text
/// pipewiresrc (node <name>_send) ! audioconvert ! S24BE caps ! rtpL24pay
///   ! application/x-rtp ! udpsink name=usink host=<mcast> port=<port>
/// ```
/// Receive:
/// ```text
/// udpsrc multicast-group=<mcast> ! L24 RTP caps ! rtpjitterbuffer
///   ! rtpL24depay ! audioconvert ! pipewiresink (node <name>_recv)
/// ```
pub fn pipeline_description(instance: &Instance, direction: Direction) -> String {
    let node = instance.node_name(direction);
    let mut desc = String::new();

    match direction {
        Direction::Send => {
            let ptime_ns = u64::from(instance.packet_time_ms) * 1_000_000;
            desc.push_str(&format!(
                "pipewiresrc min-buffers=2 stream-properties=\"props,node.name={node},node.autoconnect=false\" \
                 ! audioconvert \
                 ! audio/x-raw,format=S24BE,rate={AUDIO_SAMPLE_RATE},channels={} \
                 ! rtpL24pay pt={RTP_PAYLOAD_TYPE} min-ptime={ptime_ns} max-ptime={ptime_ns} \
                 ! application/x-rtp,clock-rate={AUDIO_SAMPLE_RATE} \
                 ! udpsink name={SEND_SINK_NAME} host={} port={} ttl-mc={AUDIO_RTP_TTL} auto-multicast=true sync=false",
                instance.channel_count, instance.multicast_address, instance.port,
            ));
            if !instance.interface_name.is_empty() {
                desc.push_str(&format!(" multicast-iface={}", instance.interface_name));
            }
        }
        Direction::Receive => {
            desc.push_str(&format!(
                "udpsrc multicast-group={} port={} auto-multicast=true",
                instance.multicast_address, instance.port,
            ));
            if !instance.interface_name.is_empty() {
                desc.push_str(&format!(" multicast-iface={}", instance.interface_name));
            }
            desc.push_str(&format!(
                " ! application/x-rtp,media=audio,clock-rate={AUDIO_SAMPLE_RATE},encoding-name={AUDIO_ENCODING},channels={},payload={RTP_PAYLOAD_TYPE} \
                 ! rtpjitterbuffer latency={} \
                 ! rtpL24depay \
                 ! audioconvert \
                 ! pipewiresink name=pwsink stream-properties=\"props,media.class=Audio/Source,node.name={node},node.description={} (Receive)\"",
                instance.channel_count, instance.receive_latency_ms, instance.session_name,
            ));
        }
    }

    desc
}
