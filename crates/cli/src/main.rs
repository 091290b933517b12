use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use aes67::{LaunchBackend, LaunchSettings, ManagerSettings, MediaBackend, SessionManager};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "aes67d",
    about = "AES67 session daemon: PTP, SAP announcements and RTP transports"
)]
struct Args {
    /// Instance configuration file
    #[arg(long, short, default_value = aes67::manager::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// PTP daemon executable
    #[arg(long, default_value = "/usr/sbin/ptp4l")]
    ptp_daemon: PathBuf,

    /// Seconds between status reports (0 disables them)
    #[arg(long, default_value_t = 30)]
    status_interval: u64,

    /// Apply the configuration, print the self-test report and exit
    #[arg(long)]
    self_test: bool,
}

#[cfg(feature = "gstreamer")]
fn backend() -> Arc<dyn MediaBackend> {
    match aes67_gst::GstBackend::new() {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            tracing::warn!("GStreamer unavailable ({e}), using gst-launch");
            Arc::new(LaunchBackend::new(LaunchSettings::default()))
        }
    }
}

#[cfg(not(feature = "gstreamer"))]
fn backend() -> Arc<dyn MediaBackend> {
    Arc::new(LaunchBackend::new(LaunchSettings::default()))
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("Failed to encode report: {e}"),
    }
}

/// Block SIGTERM/SIGINT in every thread and return the set for `wait`.
/// Must run before any thread is spawned so the mask is inherited.
fn block_stop_signals() -> nix::Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGINT);
    set.thread_block()?;
    Ok(set)
}

/// A line on stdin stops the daemon. EOF does not: under a service manager
/// stdin is `/dev/null`.
fn is_stop_request(read: io::Result<usize>) -> bool {
    matches!(read, Ok(n) if n > 0)
}

fn main() {
    let stop_signals = block_stop_signals();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let stop_signals = match stop_signals {
        Ok(set) => Some(set),
        Err(e) => {
            tracing::warn!("Cannot block stop signals: {e}");
            None
        }
    };

    let mut settings = ManagerSettings {
        config_path: args.config,
        ..ManagerSettings::default()
    };
    settings.clock.daemon_path = args.ptp_daemon;

    let backend = backend();
    tracing::info!("Media backend: {}", backend.name());
    let manager = SessionManager::new(settings, backend);

    match manager.apply_config() {
        Ok(report) if report.active => tracing::info!(
            "Active: {} send, {} receive transports",
            report.send_created,
            report.receive_created
        ),
        Ok(_) => tracing::warn!("No enabled instances, staying idle"),
        Err(e) => tracing::error!("Failed to apply configuration: {e}"),
    }

    if args.self_test {
        let report = manager.self_test();
        print_json(&report);
        manager.shutdown();
        std::process::exit(if report.all_passed { 0 } else { 1 });
    }

    let (tx, rx) = mpsc::channel();
    if let Some(set) = stop_signals {
        let tx = tx.clone();
        thread::spawn(move || {
            if let Ok(signal) = set.wait() {
                tracing::info!("Received {signal}, stopping");
                let _ = tx.send(());
            }
        });
    }
    let stdin_tx = tx.clone();
    thread::spawn(move || {
        let mut input = String::new();
        if is_stop_request(io::stdin().read_line(&mut input)) {
            let _ = stdin_tx.send(());
        }
    });

    println!("aes67d running, press Enter or send SIGTERM to stop");
    let interval = match args.status_interval {
        0 => Duration::MAX,
        secs => Duration::from_secs(secs),
    };
    loop {
        match rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => print_json(&manager.status()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    manager.shutdown();
}
