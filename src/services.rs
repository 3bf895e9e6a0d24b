//! Service handles managed by the controller and the TCP listener adapters
//! that back them by default.
//!
//! The controller only ever talks to the traits in this module. Protocol
//! handling lives behind them; the bundled adapters bind their port, accept
//! connections on a background thread and close them again.
use std::{
    fs, io,
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::config::{QueryRetrieveSettings, StorageSettings};

/// Interval at which idle accept loops re-check their shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Storage SCP handle.
pub trait StorageService: Send {
    /// Starts accepting submissions. Returns once background work is spawned.
    fn start(&mut self) -> io::Result<()>;
    /// Stops the service, blocking until shutdown completes.
    fn stop(&mut self) -> io::Result<()>;
}

/// Query/retrieve SCP handle.
pub trait QueryRetrieveService: Send {
    /// Starts listening. Returns once background work is spawned.
    fn start_listening(&mut self) -> io::Result<()>;
    /// Stops listening, blocking until shutdown completes.
    fn stop_listening(&mut self) -> io::Result<()>;
}

/// Web server handle. Construction starts serving; shared with callers of
/// `ServiceController::web_service_platform`.
pub trait WebPlatform: Send + Sync {
    /// Port the server was constructed with.
    fn port(&self) -> u16;
    /// Stops serving, blocking until shutdown completes.
    fn stop(&self) -> io::Result<()>;
}

/// Builds the handles for each managed service.
pub trait ServiceFactory: Send + Sync {
    /// Builds a storage SCP bound to a snapshot of the known storage identifiers.
    fn storage(
        &self,
        settings: &StorageSettings,
        identifiers: Vec<String>,
    ) -> io::Result<Box<dyn StorageService>>;

    /// Builds a query/retrieve SCP.
    fn query_retrieve(
        &self,
        settings: &QueryRetrieveSettings,
    ) -> io::Result<Box<dyn QueryRetrieveService>>;

    /// Builds and starts a web server on `port`.
    fn web_server(&self, port: u16) -> io::Result<Arc<dyn WebPlatform>>;
}

/// Background accept loop shared by the listener adapters.
struct Acceptor {
    name: &'static str,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Acceptor {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            local_addr: None,
        }
    }

    /// Binds `host:port` and spawns the accept thread. A second call is a no-op.
    fn bind(&mut self, host: &str, port: u16) -> io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let name = self.name;
        let handle = thread::Builder::new()
            .name(format!("{name}-accept"))
            .spawn(move || Self::accept_loop(listener, running, name))?;

        debug!("{} listening on {:?}", self.name, self.local_addr);
        self.thread = Some(handle);
        Ok(())
    }

    fn accept_loop(listener: TcpListener, running: Arc<AtomicBool>, name: &str) {
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!("{name} accepted connection from {peer}; closing");
                    drop(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!("{name} failed to accept connection: {err}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }
        debug!("{name} accept loop exited");
    }

    /// Signals the accept thread and joins it. The listener closes with the thread.
    fn shutdown(&mut self) -> io::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| io::Error::other(format!("{} accept thread panicked", self.name)))?;
        }
        self.local_addr = None;
        Ok(())
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Storage SCP listener.
pub struct StorageListener {
    acceptor: Acceptor,
    host: String,
    port: u16,
    storage_dir: Option<PathBuf>,
    identifiers: Vec<String>,
}

impl StorageListener {
    pub fn new(host: &str, settings: &StorageSettings, identifiers: Vec<String>) -> Self {
        Self {
            acceptor: Acceptor::new("storage-scp"),
            host: host.to_string(),
            port: settings.port,
            storage_dir: settings.path.as_ref().map(PathBuf::from),
            identifiers,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr
    }
}

impl StorageService for StorageListener {
    /// Creates the storage directory if needed, then starts accepting.
    fn start(&mut self) -> io::Result<()> {
        if let Some(dir) = &self.storage_dir {
            fs::create_dir_all(dir)?;
        }
        debug!(
            "Storage SCP accepting {} SOP classes into {:?}",
            self.identifiers.len(),
            self.storage_dir
        );
        self.acceptor.bind(&self.host, self.port)
    }

    fn stop(&mut self) -> io::Result<()> {
        self.acceptor.shutdown()
    }
}

/// Query/retrieve SCP listener.
pub struct QueryRetrieveListener {
    acceptor: Acceptor,
    host: String,
    port: u16,
}

impl QueryRetrieveListener {
    pub fn new(host: &str, settings: &QueryRetrieveSettings) -> Self {
        Self {
            acceptor: Acceptor::new("query-retrieve-scp"),
            host: host.to_string(),
            port: settings.port,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr
    }
}

impl QueryRetrieveService for QueryRetrieveListener {
    fn start_listening(&mut self) -> io::Result<()> {
        self.acceptor.bind(&self.host, self.port)
    }

    fn stop_listening(&mut self) -> io::Result<()> {
        self.acceptor.shutdown()
    }
}

/// Web server bound at construction.
pub struct WebServer {
    acceptor: Mutex<Acceptor>,
    port: u16,
}

impl WebServer {
    /// Binds `host:port` and starts serving. Fails if the port is unavailable.
    pub fn bind(host: &str, port: u16) -> io::Result<Self> {
        let mut acceptor = Acceptor::new("web-server");
        acceptor.bind(host, port)?;
        Ok(Self {
            acceptor: Mutex::new(acceptor),
            port,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.lock().ok().and_then(|acceptor| acceptor.local_addr)
    }
}

impl WebPlatform for WebServer {
    fn port(&self) -> u16 {
        self.port
    }

    fn stop(&self) -> io::Result<()> {
        let mut acceptor = self
            .acceptor
            .lock()
            .map_err(|err| io::Error::other(err.to_string()))?;
        acceptor.shutdown()
    }
}

/// Default factory: TCP listeners on the configured ports.
#[derive(Debug, Clone)]
pub struct ListenerFactory {
    host: String,
}

impl ListenerFactory {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for ListenerFactory {
    fn default() -> Self {
        Self::new("0.0.0.0")
    }
}

impl ServiceFactory for ListenerFactory {
    fn storage(
        &self,
        settings: &StorageSettings,
        identifiers: Vec<String>,
    ) -> io::Result<Box<dyn StorageService>> {
        Ok(Box::new(StorageListener::new(&self.host, settings, identifiers)))
    }

    fn query_retrieve(
        &self,
        settings: &QueryRetrieveSettings,
    ) -> io::Result<Box<dyn QueryRetrieveService>> {
        Ok(Box::new(QueryRetrieveListener::new(&self.host, settings)))
    }

    fn web_server(&self, port: u16) -> io::Result<Arc<dyn WebPlatform>> {
        Ok(Arc::new(WebServer::bind(&self.host, port)?))
    }
}
