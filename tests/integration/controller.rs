use std::{net::TcpListener, path::Path, sync::Arc};

use archivectl::{
    config::ServerSettings,
    control::{STORAGE_ALREADY_RUNNING, STORAGE_STARTED, ServiceController},
    logs::ServerLog,
    services::ListenerFactory,
};
use tempfile::tempdir;

fn loopback_settings(storage_dir: &Path) -> ServerSettings {
    let mut settings = ServerSettings::disabled();
    settings.storage.enabled = true;
    settings.storage.path = Some(storage_dir.to_string_lossy().to_string());
    settings.storage.port = 0;
    settings.query_retrieve.enabled = true;
    settings.query_retrieve.port = 0;
    settings.web.web_server = true;
    settings.web.web_services = false;
    settings.web.server_port = 0;
    settings.sop_classes = vec!["1.2.840.10008.5.1.4.1.1.7".into()];
    settings
}

fn build(settings: ServerSettings) -> (ServiceController, Arc<ServerLog>) {
    let log = Arc::new(ServerLog::new());
    let controller = ServiceController::new(
        settings,
        Arc::new(ListenerFactory::new("127.0.0.1")),
        log.clone(),
    );
    (controller, log)
}

#[test]
fn configured_services_run_on_real_listeners() {
    let temp = tempdir().unwrap();
    let storage_dir = temp.path().join("archive");
    let (controller, log) = build(loopback_settings(&storage_dir));

    assert!(storage_dir.is_dir());

    assert!(controller.storage_is_running());
    assert!(controller.query_retrieve_is_running());
    assert!(controller.web_server_is_running());
    assert!(controller.web_services_is_running());
    assert!(controller.web_service_platform().is_some());
    assert_eq!(log.entries().len(), 3);

    assert_eq!(controller.start_storage().unwrap(), STORAGE_ALREADY_RUNNING);

    assert!(controller.stop_all_services());
    assert!(!controller.storage_is_running());
    assert!(!controller.query_retrieve_is_running());
    assert!(!controller.web_server_is_running());
    assert!(!controller.web_services_is_running());
    assert!(controller.web_service_platform().is_none());

    assert_eq!(controller.start_storage().unwrap(), STORAGE_STARTED);
    assert!(controller.stop_all_services());
}

#[test]
fn occupied_web_port_leaves_web_server_stopped() {
    let temp = tempdir().unwrap();
    let occupied = TcpListener::bind("127.0.0.1:0").expect("bind placeholder port");
    let port = occupied.local_addr().unwrap().port();
    let mut settings = loopback_settings(temp.path());
    settings.web.server_port = port;

    let (controller, _log) = build(settings);
    assert_eq!(controller.settings().web.server_port, port);

    assert!(controller.storage_is_running());
    assert!(controller.query_retrieve_is_running());
    assert!(!controller.web_server_is_running());
    assert!(!controller.web_services_is_running());

    controller.start_web_server();
    assert!(!controller.web_server_is_running());

    drop(occupied);
    assert!(controller.stop_all_services());
}

#[test]
fn occupied_storage_port_is_a_start_error() {
    let temp = tempdir().unwrap();
    let occupied = TcpListener::bind("127.0.0.1:0").expect("bind placeholder port");
    let mut settings = loopback_settings(temp.path());
    settings.storage.enabled = false;
    settings.query_retrieve.enabled = false;
    settings.web.web_server = false;
    settings.storage.port = occupied.local_addr().unwrap().port();

    let (controller, log) = build(settings);

    assert!(controller.start_storage().is_err());
    assert!(!controller.storage_is_running());
    assert!(log.entries().is_empty());
}
