use serde::Serialize;
use std::{error::Error, path::Path, sync::Arc, sync::mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use archivectl::{
    cli::{Cli, Commands, parse_args},
    config::{ServerSettings, load_config},
    control::{Lifecycle, ServiceController, ServiceKind},
    logs::{self, LogSink, ServerLog},
    services::ListenerFactory,
};

const SERVICE_KINDS: [ServiceKind; 4] = [
    ServiceKind::Storage,
    ServiceKind::QueryRetrieve,
    ServiceKind::WebServer,
    ServiceKind::WebServices,
];

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Serve {
            config,
            host,
            log_file,
        } => serve(&config, host, log_file)?,
        Commands::Check { config, json } => {
            let settings = load_config(Some(&config))?;
            let report = CheckReport::new(&settings);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print();
            }
        }
        Commands::Logs { file, lines } => {
            for line in logs::tail(Path::new(&file), lines)? {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn serve(config: &str, host: String, log_file: Option<String>) -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    let sink: Arc<dyn LogSink> = match log_file {
        Some(path) => Arc::new(ServerLog::with_file(path)),
        None => Arc::new(ServerLog::new()),
    };
    let factory = Arc::new(ListenerFactory::new(host));

    let controller = ServiceController::global().get_or_init(|| {
        ServiceController::bootstrap(|| load_config(Some(config)), factory, sink)
    });

    let settings = controller.settings();
    if settings.storage.enabled && !settings.storage_configured() {
        warn!("Storage is enabled but has no storage path or SOP classes");
    }
    info!(
        "Task manager ready with {} workers",
        controller.task_manager().threads()
    );

    for kind in SERVICE_KINDS {
        let state = if controller.is_running(kind) {
            "running"
        } else {
            "stopped"
        };
        match kind {
            ServiceKind::WebServer => info!("{kind}: {state} (port {})", settings.web.server_port),
            _ => info!("{kind}: {state}"),
        }
    }

    if rx.recv().is_err() {
        warn!("Interrupt handler disconnected; shutting down");
    }

    info!("Stopping all services");
    if !controller.stop_all_services() {
        error!("One or more services failed to stop cleanly");
        return Err("shutdown incomplete".into());
    }

    Ok(())
}

/// What `serve` would do with a configuration.
#[derive(Debug, Serialize)]
struct CheckReport {
    services: Vec<ServiceCheck>,
    storage_configured: bool,
    web_port: u16,
    task_threads: usize,
}

#[derive(Debug, Serialize)]
struct ServiceCheck {
    service: String,
    enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mirrors: Option<String>,
}

impl CheckReport {
    fn new(settings: &ServerSettings) -> Self {
        let services = SERVICE_KINDS
            .iter()
            .map(|kind| {
                let enabled = match kind {
                    ServiceKind::Storage => settings.storage.enabled,
                    ServiceKind::QueryRetrieve => settings.query_retrieve.enabled,
                    ServiceKind::WebServer => settings.web.web_server,
                    ServiceKind::WebServices => settings.web.web_services,
                };
                let mirrors = match kind.lifecycle() {
                    Lifecycle::Managed => None,
                    Lifecycle::Mirror(target) => Some(target.to_string()),
                };
                ServiceCheck {
                    service: kind.to_string(),
                    enabled,
                    mirrors,
                }
            })
            .collect();

        Self {
            services,
            storage_configured: settings.storage_configured(),
            web_port: settings.web.server_port,
            task_threads: settings.task_threads(),
        }
    }

    fn print(&self) {
        println!("{:<16} {:<9} NOTE", "SERVICE", "ENABLED");
        for check in &self.services {
            let note = match &check.mirrors {
                Some(target) => format!("no-op, status mirrors {target}"),
                None if check.service == ServiceKind::Storage.to_string() => {
                    if self.storage_configured {
                        "configured".to_string()
                    } else {
                        "missing storage path or SOP classes".to_string()
                    }
                }
                None if check.service == ServiceKind::WebServer.to_string() => {
                    format!("port {}", self.web_port)
                }
                None => String::new(),
            };
            let enabled = if check.enabled { "yes" } else { "no" };
            println!("{:<16} {:<9} {}", check.service, enabled, note);
        }
        println!("task threads: {}", self.task_threads);
    }
}
