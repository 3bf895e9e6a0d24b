//! Lifecycle controller for the archive services.
//!
//! A single `ServiceController` owns the storage SCP, the query/retrieve SCP
//! and the web server. It starts whatever the settings enable when it is
//! constructed and afterwards mediates every start, stop and status query.
//!
//! Error signalling differs per service and callers depend on it:
//!
//! | operation              | already running | failure                    |
//! |------------------------|-----------------|----------------------------|
//! | `start_storage`        | `-2`            | `-1` unconfigured, `Err`   |
//! | `stop_storage`         | -               | `Err`                      |
//! | `start_query_retrieve` | silent          | `Err`                      |
//! | `stop_query_retrieve`  | -               | logged                     |
//! | `start_web_server`     | silent          | logged                     |
//! | `stop_web_server`      | -               | logged                     |
//! | `stop_all_services`    | -               | logged, returns `false`    |
use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::{
    config::ServerSettings,
    error::ControlError,
    logs::LogSink,
    services::{QueryRetrieveService, ServiceFactory, StorageService, WebPlatform},
};

/// `start_storage` result: the storage SCP was started.
pub const STORAGE_STARTED: i32 = 0;
/// `start_storage` result: no storage path or identifiers are configured.
pub const STORAGE_UNCONFIGURED: i32 = -1;
/// `start_storage` result: the storage SCP was already running.
pub const STORAGE_ALREADY_RUNNING: i32 = -2;

/// The services known to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceKind {
    Storage,
    QueryRetrieve,
    WebServer,
    WebServices,
}

/// How a service kind takes part in lifecycle control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Owns a handle while running; start and stop change state.
    Managed,
    /// Kept only for interface compatibility. Start and stop never change state or
    /// perform I/O, and status reports the mirrored service.
    Mirror(ServiceKind),
}

impl ServiceKind {
    pub fn lifecycle(self) -> Lifecycle {
        match self {
            ServiceKind::WebServices => Lifecycle::Mirror(ServiceKind::WebServer),
            _ => Lifecycle::Managed,
        }
    }
}

/// Outcome of a query/retrieve, web server or legacy start request before it is
/// reduced to the operation's public signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The request was accepted and intentionally did nothing.
    SilentlyIgnored,
}

/// Outcome of a storage start request. Each variant has a legacy status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStart {
    Started,
    Unconfigured,
    AlreadyRunning,
}

impl StorageStart {
    pub fn code(self) -> i32 {
        match self {
            StorageStart::Started => STORAGE_STARTED,
            StorageStart::Unconfigured => STORAGE_UNCONFIGURED,
            StorageStart::AlreadyRunning => STORAGE_ALREADY_RUNNING,
        }
    }
}

/// Worker pool sized at construction and handed to callers.
///
/// The controller never schedules work on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskManager {
    threads: usize,
}

impl TaskManager {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

/// State of one managed service.
///
/// `running` is the externally visible state; the handle lives in `handle`
/// except while a stop is in progress, when the stopping thread holds it.
/// The lock is never held while calling into the handle.
struct ManagedService<H> {
    kind: ServiceKind,
    running: AtomicBool,
    handle: Mutex<Option<H>>,
}

impl<H> ManagedService<H> {
    fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stores a started handle and marks the service running.
    fn install(&self, handle: H) -> Result<(), ControlError> {
        let mut slot = self.handle.lock()?;
        *slot = Some(handle);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Removes the handle for stopping. The service still reports running.
    fn take(&self) -> Result<Option<H>, ControlError> {
        Ok(self.handle.lock()?.take())
    }

    /// Removes the handle and marks the service stopped in one step.
    fn retire(&self) -> Result<Option<H>, ControlError> {
        let mut slot = self.handle.lock()?;
        let handle = slot.take();
        if handle.is_some() {
            self.running.store(false, Ordering::Release);
        }
        Ok(handle)
    }

    /// Puts back a handle whose stop failed; the service keeps running.
    fn restore(&self, handle: H) -> Result<(), ControlError> {
        *self.handle.lock()? = Some(handle);
        Ok(())
    }

    fn mark_stopped(&self) -> Result<(), ControlError> {
        let _slot = self.handle.lock()?;
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn start_error(&self, source: std::io::Error) -> ControlError {
        ControlError::ServiceStartError {
            service: self.kind.to_string(),
            source,
        }
    }

    fn stop_error(&self, source: std::io::Error) -> ControlError {
        ControlError::ServiceStopError {
            service: self.kind.to_string(),
            source,
        }
    }
}

/// Process-wide coordinator for the archive services.
pub struct ServiceController {
    settings: ServerSettings,
    factory: Arc<dyn ServiceFactory>,
    sink: Arc<dyn LogSink>,
    task_manager: TaskManager,
    storage: ManagedService<Box<dyn StorageService>>,
    query_retrieve: ManagedService<Box<dyn QueryRetrieveService>>,
    /// Also backs the legacy web services status, which reads the same flag.
    web_server: ManagedService<Arc<dyn WebPlatform>>,
}

impl ServiceController {
    /// Builds the controller and starts every service the settings enable.
    pub fn new(
        settings: ServerSettings,
        factory: Arc<dyn ServiceFactory>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let task_manager = TaskManager::new(settings.task_threads());
        debug!(
            "Initializing service controller with {} task threads",
            task_manager.threads()
        );

        let controller = Self {
            settings,
            factory,
            sink,
            task_manager,
            storage: ManagedService::new(ServiceKind::Storage),
            query_retrieve: ManagedService::new(ServiceKind::QueryRetrieve),
            web_server: ManagedService::new(ServiceKind::WebServer),
        };
        controller.start_all_configured();
        controller
    }

    /// Reads the settings with `load` and builds the controller.
    ///
    /// A loader error is logged and yields a controller with every service stopped.
    pub fn bootstrap<F>(
        load: F,
        factory: Arc<dyn ServiceFactory>,
        sink: Arc<dyn LogSink>,
    ) -> Self
    where
        F: FnOnce() -> Result<ServerSettings, ControlError>,
    {
        let settings = match load() {
            Ok(settings) => settings,
            Err(err) => {
                error!("Failed to read server settings: {err}");
                sink.record("Server settings unavailable; no services started");
                ServerSettings::disabled()
            }
        };
        Self::new(settings, factory, sink)
    }

    /// The process-wide controller cell owned by the entry point.
    pub fn global() -> &'static ControllerCell {
        static GLOBAL: ControllerCell = ControllerCell::new();
        &GLOBAL
    }

    /// Settings snapshot the controller was built from.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Worker pool sized from the settings at construction.
    pub fn task_manager(&self) -> TaskManager {
        self.task_manager
    }

    /// Starts the enabled services in a fixed order. Failures are logged and never stop the sequence.
    fn start_all_configured(&self) {
        let settings = &self.settings;

        if settings.storage.enabled {
            match self.start_storage() {
                Ok(STORAGE_UNCONFIGURED) => {
                    warn!("Storage is enabled but no storage path or SOP classes are configured")
                }
                Ok(_) => {}
                Err(err) => error!("Failed to start storage during startup: {err}"),
            }
        }

        if settings.query_retrieve.enabled
            && let Err(err) = self.start_query_retrieve()
        {
            error!("Failed to start query/retrieve during startup: {err}");
        }

        if settings.web.web_server {
            self.start_web_server();
        }

        if settings.web.web_services {
            self.start_web_services();
        }
    }

    /// Stops every service, attempting each stop even when an earlier one fails.
    ///
    /// Returns `false` if any stop failed.
    pub fn stop_all_services(&self) -> bool {
        let results = [
            (ServiceKind::Storage, self.stop_storage()),
            (ServiceKind::QueryRetrieve, self.try_stop_query_retrieve()),
            (ServiceKind::WebServer, self.try_stop_web_server()),
        ];

        let mut success = true;
        for (kind, result) in results {
            if let Err(err) = result {
                error!("Failed to stop {kind} during shutdown: {err}");
                success = false;
            }
        }
        success
    }

    /// Starts the storage SCP.
    ///
    /// Returns [`STORAGE_STARTED`], [`STORAGE_UNCONFIGURED`] or
    /// [`STORAGE_ALREADY_RUNNING`]; `Err` if the listener cannot be built or started.
    pub fn start_storage(&self) -> Result<i32, ControlError> {
        self.try_start_storage().map(StorageStart::code)
    }

    fn try_start_storage(&self) -> Result<StorageStart, ControlError> {
        if !self.settings.storage_configured() {
            return Ok(StorageStart::Unconfigured);
        }
        if self.storage.is_running() {
            return Ok(StorageStart::AlreadyRunning);
        }

        let identifiers = self.settings.sop_classes.clone();
        let mut handle = self
            .factory
            .storage(&self.settings.storage, identifiers)
            .map_err(|err| self.storage.start_error(err))?;
        handle.start().map_err(|err| self.storage.start_error(err))?;

        self.storage.install(handle)?;
        self.sink.record("Starting DICOM Storage SCP");
        Ok(StorageStart::Started)
    }

    /// Stops the storage SCP. A failing stop is returned to the caller and the
    /// service keeps running.
    pub fn stop_storage(&self) -> Result<(), ControlError> {
        let Some(mut handle) = self.storage.take()? else {
            return Ok(());
        };

        if let Err(err) = handle.stop() {
            self.storage.restore(handle)?;
            return Err(self.storage.stop_error(err));
        }

        drop(handle);
        self.storage.mark_stopped()?;
        self.sink.record("Stopping DICOM Storage SCP");
        Ok(())
    }

    pub fn storage_is_running(&self) -> bool {
        self.storage.is_running()
    }

    /// Starts the query/retrieve SCP. Does nothing if it is already running.
    pub fn start_query_retrieve(&self) -> Result<(), ControlError> {
        self.try_start_query_retrieve().map(|_| ())
    }

    fn try_start_query_retrieve(&self) -> Result<StartOutcome, ControlError> {
        if self.query_retrieve.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let mut handle = self
            .factory
            .query_retrieve(&self.settings.query_retrieve)
            .map_err(|err| self.query_retrieve.start_error(err))?;
        handle
            .start_listening()
            .map_err(|err| self.query_retrieve.start_error(err))?;

        self.query_retrieve.install(handle)?;
        self.sink.record("Starting DICOM Query/Retrieve SCP");
        Ok(StartOutcome::Started)
    }

    /// Stops the query/retrieve SCP. Failures are logged, not returned.
    pub fn stop_query_retrieve(&self) {
        if let Err(err) = self.try_stop_query_retrieve() {
            error!("{err}");
        }
    }

    /// The handle is discarded even when its stop fails.
    fn try_stop_query_retrieve(&self) -> Result<(), ControlError> {
        let Some(mut handle) = self.query_retrieve.take()? else {
            return Ok(());
        };

        let result = handle.stop_listening();
        drop(handle);
        self.query_retrieve.mark_stopped()?;

        result.map_err(|err| self.query_retrieve.stop_error(err))?;
        self.sink.record("Stopping DICOM Query/Retrieve SCP");
        Ok(())
    }

    pub fn query_retrieve_is_running(&self) -> bool {
        self.query_retrieve.is_running()
    }

    /// Starts the web server on the configured port. Failures are logged, not returned.
    pub fn start_web_server(&self) {
        info!("Starting web server");
        match self.try_start_web_server() {
            Ok(StartOutcome::Started) => {}
            Ok(outcome) => debug!("Web server start ignored: {outcome:?}"),
            Err(err) => error!("Failed to launch the web server: {err}"),
        }
    }

    fn try_start_web_server(&self) -> Result<StartOutcome, ControlError> {
        if self.web_server.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }

        let port = self.settings.web.server_port;
        let handle = self
            .factory
            .web_server(port)
            .map_err(|err| self.web_server.start_error(err))?;

        self.web_server.install(handle)?;
        self.sink.record(&format!("Starting web server on port {port}"));
        Ok(StartOutcome::Started)
    }

    /// Stops the web server. Failures are logged, not returned.
    pub fn stop_web_server(&self) {
        info!("Stopping web server");
        if let Err(err) = self.try_stop_web_server() {
            error!("{err}");
        }
    }

    /// The web server and web services statuses drop before the handle is stopped;
    /// the handle is discarded either way.
    fn try_stop_web_server(&self) -> Result<(), ControlError> {
        let Some(handle) = self.web_server.retire()? else {
            return Ok(());
        };

        let result = handle.stop();
        drop(handle);

        result.map_err(|err| self.web_server.stop_error(err))?;
        self.sink.record("Stopping web server");
        Ok(())
    }

    pub fn web_server_is_running(&self) -> bool {
        self.web_server.is_running()
    }

    /// The running web server, if any.
    pub fn web_service_platform(&self) -> Option<Arc<dyn WebPlatform>> {
        self.web_server
            .handle
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone))
    }

    /// Legacy entry point. Web services are served by the web server now; this
    /// never changes state. See [`Lifecycle::Mirror`].
    pub fn start_web_services(&self) {
        self.legacy_web_services("start");
    }

    /// Legacy entry point; never changes state. See [`Lifecycle::Mirror`].
    pub fn stop_web_services(&self) {
        self.legacy_web_services("stop");
    }

    fn legacy_web_services(&self, action: &str) -> StartOutcome {
        debug!("Ignoring legacy request to {action} web services");
        StartOutcome::SilentlyIgnored
    }

    /// Mirrors [`Self::web_server_is_running`].
    pub fn web_services_is_running(&self) -> bool {
        self.web_server.is_running()
    }

    /// Running state for `kind`, following mirrored kinds.
    pub fn is_running(&self, kind: ServiceKind) -> bool {
        match kind {
            ServiceKind::Storage => self.storage_is_running(),
            ServiceKind::QueryRetrieve => self.query_retrieve_is_running(),
            ServiceKind::WebServer => self.web_server_is_running(),
            ServiceKind::WebServices => self.web_services_is_running(),
        }
    }
}

/// Holds the single controller of a process.
///
/// Construction happens at most once, even when several threads ask for the
/// controller at the same time; the others block until it exists.
pub struct ControllerCell {
    cell: OnceLock<ServiceController>,
}

impl ControllerCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Returns the controller, building it with `init` on first access.
    pub fn get_or_init<F>(&self, init: F) -> &ServiceController
    where
        F: FnOnce() -> ServiceController,
    {
        self.cell.get_or_init(init)
    }

    /// Returns the controller if it has been built.
    pub fn get(&self) -> Option<&ServiceController> {
        self.cell.get()
    }
}

impl Default for ControllerCell {
    fn default() -> Self {
        Self::new()
    }
}
