//! Integration test: apply a configuration end to end with a scripted media
//! backend and no PTP daemon installed.

mod common;

use std::sync::Arc;
use std::time::Duration;

use aes67::{Aes67Error, Direction, SessionManager};
use common::{ScriptedBackend, settings, wait_for};

const TWO_SENDERS: &str = r#"{
    "ptpEnabled": true,
    "ptpInterface": "eth0",
    "instances": [
        { "id": 1, "name": "A", "mode": "send", "multicastIP": "239.69.0.1",
          "port": 5004, "channels": 2, "ptime": 4, "sapEnabled": true },
        { "id": 2, "name": "B", "mode": "send", "multicastIP": "239.69.0.2",
          "port": 5006, "channels": 8, "ptime": 1, "sapEnabled": true }
    ]
}"#;

#[test]
fn two_senders_without_ptp_daemon() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("instances.json"), TWO_SENDERS).unwrap();

    let backend = Arc::new(ScriptedBackend::default());
    let manager = SessionManager::new(settings(dir.path(), 19870, 19871), backend.clone());

    let report = manager.apply_config().expect("apply succeeds without PTP");
    assert!(report.active);
    assert!(!report.ptp_initialized);
    assert_eq!(report.send_created, 2);
    assert_eq!(report.receive_created, 0);
    assert!(report.announcer_started);
    assert!(report.receiver_started);

    let config = manager.config();
    assert_eq!(config.instances[0].packet_time_ms, 4);
    assert_eq!(config.instances[1].packet_time_ms, 1);
    assert_eq!(config.instances[1].channel_count, 8);

    let status = manager.status();
    assert!(status.active);
    assert!(!status.ptp.synced);
    assert_eq!(status.ptp.daemon_state, "not running");
    assert_eq!(status.ptp.grandmaster_clock_id, "00-00-00-FF-FE-00-00-00");
    assert_eq!(status.running_transports(Direction::Send), 2);
    assert_eq!(status.running_transports(Direction::Receive), 0);
    assert!(status.announcer_running);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["transports"][1]["name"], "B");
    assert_eq!(json["ptp"]["synced"], false);

    let report = manager.self_test();
    assert!(!report.result("ptp_daemon_binary").unwrap().passed);
    assert!(report.result("config_file").unwrap().passed);
    assert!(report.result("send_transport_1").unwrap().passed);
    assert!(report.result("send_transport_2").unwrap().passed);
    assert!(report.result("sap_announcer").unwrap().passed);
    assert!(report.result("sdp_generation").unwrap().passed);
    assert!(!report.all_passed);

    manager.shutdown();
    assert!(!manager.is_active());
    assert!(manager.registry().is_empty());
    assert_eq!(backend.script(1, Direction::Send).stops(), 1);
    assert_eq!(backend.script(2, Direction::Send).stops(), 1);
}

#[test]
fn missing_config_is_inactive() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(
        settings(dir.path(), 19872, 19873),
        Arc::new(ScriptedBackend::default()),
    );
    let report = manager.apply_config().unwrap();
    assert!(!report.active);
    assert!(!manager.is_active());
    assert!(manager.status().transports.is_empty());
    assert!(!manager.self_test().result("config_file").unwrap().passed);
}

#[test]
fn invalid_config_is_reported_and_inactive() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("instances.json"), "{ not json").unwrap();
    let manager = SessionManager::new(
        settings(dir.path(), 19874, 19875),
        Arc::new(ScriptedBackend::default()),
    );
    let err = manager.apply_config().unwrap_err();
    assert!(matches!(err, Aes67Error::Config { .. }));
    assert!(!manager.is_active());
}

#[test]
fn disabled_instances_leave_manager_inactive() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("instances.json"),
        r#"{ "ptpEnabled": false, "instances": [ { "id": 1, "enabled": false } ] }"#,
    )
    .unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let manager = SessionManager::new(settings(dir.path(), 19876, 19877), backend.clone());
    let report = manager.apply_config().unwrap();
    assert!(!report.active);
    assert_eq!(backend.script(1, Direction::Send).creates(), 0);
}

#[test]
fn both_mode_owns_two_transports() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("instances.json"),
        r#"{ "ptpEnabled": false, "instances": [
            { "id": 7, "name": "Duplex", "mode": "both", "sapEnabled": false } ] }"#,
    )
    .unwrap();
    let manager = SessionManager::new(
        settings(dir.path(), 19878, 19879),
        Arc::new(ScriptedBackend::default()),
    );
    let report = manager.apply_config().unwrap();
    assert_eq!(report.send_created, 1);
    assert_eq!(report.receive_created, 1);
    assert!(!report.announcer_started);
    assert!(!report.receiver_started);

    let status = manager.status();
    assert_eq!(status.running_transports(Direction::Send), 1);
    assert_eq!(status.running_transports(Direction::Receive), 1);
}

#[test]
fn reapply_replaces_everything() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("instances.json"), TWO_SENDERS).unwrap();
    let backend = Arc::new(ScriptedBackend::default());
    let manager = SessionManager::new(settings(dir.path(), 19880, 19881), backend.clone());

    manager.apply_config().unwrap();
    manager.apply_config().unwrap();

    let script = backend.script(1, Direction::Send);
    assert_eq!(script.creates(), 2);
    assert_eq!(script.stops(), 1);
    assert_eq!(manager.registry().len(), 2);
}

#[test]
fn stalled_sender_triggers_full_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("instances.json"),
        r#"{ "ptpEnabled": false, "instances": [
            { "id": 1, "name": "Flat", "mode": "send" },
            { "id": 2, "name": "Live", "mode": "send", "port": 5006 } ] }"#,
    )
    .unwrap();

    let backend = Arc::new(ScriptedBackend::default());
    // Instance 1 reports a counter that never moves; instance 2 keeps moving.
    *backend.script(1, Direction::Send).byte_step.lock() = Some(0);
    *backend.script(2, Direction::Send).byte_step.lock() = Some(1200);

    let mut settings = settings(dir.path(), 19882, 19883);
    settings.announcer.interval = Duration::from_millis(100);
    let manager = SessionManager::new(settings, backend.clone());
    manager.apply_config().unwrap();

    // Stall needs two flat polls, then a rebuild recreates both transports.
    let flat = backend.script(1, Direction::Send);
    let live = backend.script(2, Direction::Send);
    assert!(wait_for(Duration::from_secs(5), || flat.creates() >= 2));
    assert!(
        wait_for(Duration::from_secs(2), || live.creates() >= 2),
        "rebuild is never partial"
    );
    assert!(wait_for(Duration::from_secs(2), || manager.is_active()));

    manager.shutdown();
}

#[test]
fn ptp_daemon_follows_interface_and_liveness() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let daemon = dir.path().join("ptp4l");
    std::fs::write(
        &daemon,
        "#!/bin/sh\necho \"$2\" >> \"$(dirname \"$0\")/launches.log\"\nexec sleep 30\n",
    )
    .unwrap();
    std::fs::set_permissions(&daemon, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = |iface: &str| {
        format!(r#"{{ "ptpEnabled": true, "ptpInterface": "{iface}",
            "instances": [ {{ "id": 1, "mode": "send", "sapEnabled": false }} ] }}"#)
    };
    let launches = || {
        std::fs::read_to_string(dir.path().join("launches.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    let config_path = dir.path().join("instances.json");
    std::fs::write(&config_path, config("eth0")).unwrap();

    let manager = SessionManager::new(
        settings(dir.path(), 19884, 19885),
        Arc::new(ScriptedBackend::default()),
    );
    assert!(manager.apply_config().unwrap().ptp_initialized);
    assert_eq!(launches(), vec!["eth0"]);

    // Same interface, daemon alive: left running.
    let pid = manager.clock_state().daemon_pid;
    manager.apply_config().unwrap();
    assert_eq!(manager.clock_state().daemon_pid, pid);
    assert_eq!(launches(), vec!["eth0"]);

    // Interface change restarts it on the new interface.
    std::fs::write(&config_path, config("eth1")).unwrap();
    assert!(manager.apply_config().unwrap().ptp_initialized);
    assert_eq!(launches(), vec!["eth0", "eth1"]);
    assert_ne!(manager.clock_state().daemon_pid, pid);

    // A daemon that died is started again.
    let pid = manager.clock_state().daemon_pid;
    std::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || !manager.clock_state().initialized));
    assert!(manager.apply_config().unwrap().ptp_initialized);
    assert_eq!(launches(), vec!["eth0", "eth1", "eth1"]);

    // Disabling PTP stops it.
    std::fs::write(
        &config_path,
        r#"{ "ptpEnabled": false, "instances": [ { "id": 1, "mode": "send", "sapEnabled": false } ] }"#,
    )
    .unwrap();
    assert!(!manager.apply_config().unwrap().ptp_initialized);
    assert!(!manager.clock_state().initialized);

    manager.shutdown();
}
