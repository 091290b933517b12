//! Session manager: the composition of clock, transports and SAP workers.
//!
//! Every configuration change goes through [`SessionManager::apply_config`],
//! which always rebuilds from scratch:
//!
//! ```text
//! stop announcer + receiver (join)
//!   ▶ stop all transports
//!   ▶ reload instances.json ── missing / no enabled instance ──▶ inactive
//!   ▶ start PTP daemon (failure logged, apply continues)
//!   ▶ create transports per enabled instance and direction
//!   ▶ start announcer (any enabled send+SAP instance)
//!   ▶ start receiver  (any enabled SAP instance)
//!   ▶ active
//! ```
//!
//! The watchdog runs inside the announcer thread. When it asks for a
//! rebuild, a short-lived thread re-runs `apply_config`; the announcer cannot
//! do it itself because the apply joins the announcer.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};

use crate::clock::{ClockSettings, ClockState, ClockSupervisor, UNKNOWN_CLOCK_ID};
use crate::config::{Direction, SessionConfig};
use crate::error::Result;
use crate::sap::receiver::probe_bind;
use crate::sap::{
    AnnouncerSettings, CycleHook, DiscoveredStream, DiscoveryTable, ReceiverSettings,
    SapAnnouncer, SapReceiver,
};
use crate::status::{PtpStatus, SelfTestReport, Status, TestResult};
use crate::transport::{MediaBackend, TransportRegistry};
use crate::{net, sdp};

/// Default location of the instance configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/aes67/instances.json";

/// Settings for [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub config_path: PathBuf,
    pub clock: ClockSettings,
    /// Clock id, default interface and multicast interface are filled in
    /// on every apply.
    pub announcer: AnnouncerSettings,
    /// Interface and own address are filled in on every apply when left
    /// unspecified.
    pub receiver: ReceiverSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            clock: ClockSettings::default(),
            announcer: AnnouncerSettings::default(),
            receiver: ReceiverSettings::default(),
        }
    }
}

/// What one apply did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub active: bool,
    pub ptp_initialized: bool,
    pub send_created: usize,
    pub send_failed: usize,
    pub receive_created: usize,
    pub receive_failed: usize,
    pub announcer_started: bool,
    pub receiver_started: bool,
}

#[derive(Default)]
struct Workers {
    announcer: Option<SapAnnouncer>,
    receiver: Option<SapReceiver>,
}

struct Inner {
    settings: ManagerSettings,
    registry: TransportRegistry,
    discovery: DiscoveryTable,
    clock: Mutex<ClockSupervisor>,
    config: RwLock<SessionConfig>,
    workers: Mutex<Workers>,
    active: AtomicBool,
    /// Serializes apply and shutdown.
    apply_lock: Mutex<()>,
}

/// Owns the AES67 subsystem. Cheap to clone; clones share state.
///
/// Shutdown runs when the last clone is dropped.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(settings: ManagerSettings, backend: Arc<dyn MediaBackend>) -> Self {
        let clock = ClockSupervisor::new(settings.clock.clone());
        Self {
            inner: Arc::new(Inner {
                settings,
                registry: TransportRegistry::new(backend),
                discovery: DiscoveryTable::new(),
                clock: Mutex::new(clock),
                config: RwLock::new(SessionConfig::default()),
                workers: Mutex::new(Workers::default()),
                active: AtomicBool::new(false),
                apply_lock: Mutex::new(()),
            }),
        }
    }

    /// Tear everything down and rebuild from the configuration file.
    ///
    /// A missing file or a file without enabled instances leaves the
    /// manager inactive and is not an error. An unparseable file also
    /// leaves it inactive and is returned.
    pub fn apply_config(&self) -> Result<ApplyReport> {
        self.inner.apply_config()
    }

    /// Stop workers, transports and the PTP daemon.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Configuration loaded by the last apply.
    pub fn config(&self) -> SessionConfig {
        self.inner.config.read().clone()
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.inner.registry
    }

    pub fn discovered_streams(&self) -> Vec<DiscoveredStream> {
        self.inner.discovery.snapshot()
    }

    pub fn clock_state(&self) -> ClockState {
        self.inner.clock.lock().state()
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    pub fn self_test(&self) -> SelfTestReport {
        self.inner.self_test()
    }
}

impl Inner {
    fn apply_config(self: &Arc<Self>) -> Result<ApplyReport> {
        let _apply = self.apply_lock.lock();
        self.apply_locked()
    }

    /// Watchdog-requested re-apply. Skipped if a shutdown got there first.
    fn rebuild(self: &Arc<Self>) -> Result<()> {
        let _apply = self.apply_lock.lock();
        if !self.active.load(Ordering::SeqCst) {
            tracing::debug!("manager inactive, skipping watchdog rebuild");
            return Ok(());
        }
        tracing::warn!("watchdog: rebuilding all transports");
        self.apply_locked().map(|_| ())
    }

    fn apply_locked(self: &Arc<Self>) -> Result<ApplyReport> {
        self.stop_workers();
        self.registry.stop_all();
        self.active.store(false, Ordering::SeqCst);

        let path = &self.settings.config_path;
        if !path.exists() {
            tracing::info!(path = %path.display(), "no AES67 configuration, nothing to apply");
            *self.config.write() = SessionConfig::default();
            return Ok(ApplyReport::default());
        }

        let config = match SessionConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load AES67 configuration");
                *self.config.write() = SessionConfig::default();
                return Err(e);
            }
        };
        *self.config.write() = config.clone();

        if config.enabled_instances().next().is_none() {
            tracing::info!("no enabled AES67 instances");
            return Ok(ApplyReport::default());
        }

        let mut report = ApplyReport {
            ptp_initialized: self.apply_clock(&config),
            ..ApplyReport::default()
        };

        for instance in config.enabled_instances() {
            if instance.mode.sends() {
                match self.registry.create_transport(instance, Direction::Send) {
                    Ok(()) => report.send_created += 1,
                    Err(_) => report.send_failed += 1,
                }
            }
            if instance.mode.receives() {
                match self.registry.create_transport(instance, Direction::Receive) {
                    Ok(()) => report.receive_created += 1,
                    Err(_) => report.receive_failed += 1,
                }
            }
        }

        let interface_addr = net::interface_ipv4(&config.ptp_interface_name);
        let mut workers = Workers::default();

        if config.enabled_instances().any(|inst| inst.is_announced()) {
            let clock_id = self.clock.lock().clock_id(&config.ptp_interface_name);
            let settings = AnnouncerSettings {
                clock_id,
                default_interface: config.ptp_interface_name.clone(),
                multicast_if: self.settings.announcer.multicast_if.or(interface_addr),
                ..self.settings.announcer.clone()
            };
            match SapAnnouncer::start(&config.instances, settings, Some(self.watchdog_hook())) {
                Ok(announcer) => workers.announcer = Some(announcer),
                Err(e) => tracing::warn!(error = %e, "failed to start SAP announcer"),
            }
        }

        if config.enabled_instances().any(|inst| inst.sap_enabled) {
            let defaults = &self.settings.receiver;
            let settings = ReceiverSettings {
                interface_addr: if defaults.interface_addr.is_unspecified() {
                    interface_addr.unwrap_or(Ipv4Addr::UNSPECIFIED)
                } else {
                    defaults.interface_addr
                },
                own_addr: defaults.own_addr.or(interface_addr),
                ..defaults.clone()
            };
            match SapReceiver::start(settings, self.discovery.clone()) {
                Ok(receiver) => workers.receiver = Some(receiver),
                Err(e) => tracing::warn!(error = %e, "failed to start SAP receiver"),
            }
        }

        report.announcer_started = workers.announcer.is_some();
        report.receiver_started = workers.receiver.is_some();
        report.active = true;
        *self.workers.lock() = workers;
        self.active.store(true, Ordering::SeqCst);

        tracing::info!(
            send = report.send_created,
            send_failed = report.send_failed,
            receive = report.receive_created,
            receive_failed = report.receive_failed,
            ptp = report.ptp_initialized,
            announcer = report.announcer_started,
            receiver = report.receiver_started,
            "AES67 configuration applied"
        );
        Ok(report)
    }

    /// Bring the PTP daemon in line with `config`. Returns whether it runs.
    fn apply_clock(&self, config: &SessionConfig) -> bool {
        let mut clock = self.clock.lock();

        if !config.ptp_enabled {
            clock.stop();
            return false;
        }

        // A dead daemon is reaped by the liveness check, so only an
        // interface change needs an explicit stop.
        if clock.is_initialized() && clock.interface() != config.ptp_interface_name {
            tracing::info!(
                from = clock.interface(),
                to = %config.ptp_interface_name,
                "PTP interface changed, restarting daemon"
            );
            clock.stop();
        }

        if let Err(e) = clock.start(&config.ptp_interface_name) {
            tracing::warn!(error = %e, "PTP init failed, continuing without PTP clock");
        }
        clock.is_initialized()
    }

    fn watchdog_hook(self: &Arc<Self>) -> CycleHook {
        let registry = self.registry.clone();
        let weak = Arc::downgrade(self);
        Box::new(move || {
            if registry.poll_watchdog().rebuild_required {
                schedule_rebuild(weak.clone());
            }
        })
    }

    fn stop_workers(&self) {
        let Workers {
            announcer,
            receiver,
        } = std::mem::take(&mut *self.workers.lock());
        if let Some(mut announcer) = announcer {
            announcer.stop();
        }
        if let Some(mut receiver) = receiver {
            receiver.stop();
        }
    }

    fn shutdown(&self) {
        let _apply = self.apply_lock.lock();
        tracing::info!("AES67 session manager shutting down");
        self.stop_workers();
        self.registry.stop_all();
        self.clock.lock().stop();
        self.active.store(false, Ordering::SeqCst);
    }

    fn status(&self) -> Status {
        let interface = self.config.read().ptp_interface_name.clone();
        let ptp = {
            let mut clock = self.clock.lock();
            let synced = clock.is_daemon_running();
            PtpStatus {
                synced,
                offset_ns: 0,
                grandmaster_clock_id: clock.clock_id(&interface),
                daemon_state: clock.daemon_state().to_string(),
                hardware_timestamping: clock.state().using_hardware_timestamping,
            }
        };
        let (announcer_running, receiver_running) = {
            let workers = self.workers.lock();
            (
                workers.announcer.as_ref().is_some_and(SapAnnouncer::is_running),
                workers.receiver.as_ref().is_some_and(SapReceiver::is_running),
            )
        };

        Status {
            active: self.active.load(Ordering::SeqCst),
            transports: self.registry.statuses(),
            ptp,
            discovered_streams: self.discovery.snapshot(),
            announcer_running,
            receiver_running,
        }
    }

    fn self_test(&self) -> SelfTestReport {
        let config = self.config.read().clone();
        let mut results = Vec::new();

        for cap in self.registry.backend().capabilities() {
            let ok = format!("{} available", cap.name);
            let fail = format!("{} NOT FOUND", cap.name);
            results.push(TestResult::check(cap.name, cap.available, ok, fail));
        }

        let (clock_state, daemon_state, daemon_installed, daemon_path, clock_id) = {
            let mut clock = self.clock.lock();
            (
                clock.state(),
                clock.daemon_state(),
                clock.daemon_installed(),
                clock.settings().daemon_path.display().to_string(),
                clock.clock_id(&config.ptp_interface_name),
            )
        };
        results.push(TestResult::check(
            "ptp_initialized",
            clock_state.initialized,
            "PTP subsystem initialized",
            "PTP subsystem not initialized",
        ));
        results.push(TestResult::check(
            "ptp_daemon_running",
            clock_state.daemon_pid > 0,
            format!("PTP daemon is running (PID {}), {daemon_state}", clock_state.daemon_pid),
            "PTP daemon is NOT running",
        ));
        results.push(TestResult::check(
            "ptp_daemon_binary",
            daemon_installed,
            format!("PTP daemon found at {daemon_path}"),
            format!("PTP daemon NOT found at {daemon_path}, install linuxptp"),
        ));

        let config_path = self.settings.config_path.display();
        results.push(TestResult::check(
            "config_file",
            self.settings.config_path.exists(),
            format!("Config file found: {config_path}"),
            format!("Config file missing: {config_path}"),
        ));
        results.push(TestResult::check(
            "config_instances",
            !config.instances.is_empty(),
            format!("{} instance(s) configured", config.instances.len()),
            "No instances configured",
        ));

        let interface = &config.ptp_interface_name;
        let source_ip = net::interface_ipv4(interface);
        results.push(match source_ip {
            Some(ip) => TestResult::new("network_interface", true, format!("Interface {interface} has IP: {ip}")),
            None => TestResult::new(
                "network_interface",
                false,
                format!("Interface {interface} not found or has no IP"),
            ),
        });

        results.push(TestResult::check(
            "ptp_clock_id",
            clock_id != UNKNOWN_CLOCK_ID,
            format!("PTP Clock ID: {clock_id}"),
            "Could not derive PTP Clock ID from MAC address",
        ));

        for t in self.registry.statuses() {
            let prefix = match t.direction {
                Direction::Send => "send",
                Direction::Receive => "recv",
            };
            results.push(TestResult::check(
                format!("{prefix}_transport_{}", t.instance_id),
                t.running,
                format!("{} transport {} is running", t.direction, t.instance_id),
                format!("{} transport {} is NOT running: {}", t.direction, t.instance_id, t.error),
            ));
        }

        let (announcer_running, receiver_running) = {
            let workers = self.workers.lock();
            (
                workers.announcer.as_ref().is_some_and(SapAnnouncer::is_running),
                workers.receiver.as_ref().is_some_and(SapReceiver::is_running),
            )
        };
        results.push(TestResult::check(
            "sap_announcer",
            announcer_running,
            "SAP announcer thread running",
            "SAP announcer thread not running",
        ));
        results.push(TestResult::check(
            "sap_receiver",
            receiver_running,
            "SAP receiver thread running",
            "SAP receiver thread not running",
        ));

        results.push(TestResult::check(
            "multicast_capability",
            probe_bind(0),
            "UDP socket creation and bind OK",
            "Failed to create/bind UDP socket",
        ));

        results.push(match config.instances.first() {
            Some(instance) => {
                let sdp = sdp::generate_sdp(
                    instance,
                    source_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    &clock_id,
                );
                TestResult::check(
                    "sdp_generation",
                    sdp::has_required_attributes(&sdp),
                    format!("SDP generation OK ({} bytes)", sdp.len()),
                    "SDP generation failed or incomplete",
                )
            }
            None => TestResult::new("sdp_generation", false, "No instances to generate SDP for"),
        });

        let report = SelfTestReport::from(results);
        tracing::info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            "AES67 self-test complete"
        );
        report
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn schedule_rebuild(inner: Weak<Inner>) {
    let spawned = thread::Builder::new()
        .name("aes67-rebuild".to_string())
        .spawn(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(e) = inner.rebuild() {
                tracing::error!(error = %e, "watchdog rebuild failed");
            }
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "cannot spawn rebuild thread");
    }
}
