//! Server assembly: rendezvous acceptor, worker pool, lifecycle.
//!
//! One acceptor (the thread that calls [`Server::run`]) owns the
//! well-known rendezvous FIFO and turns valid setup frames into sessions;
//! a fixed pool of worker threads drains the session queue and serves one
//! session each at a time. Shutdown is cooperative: an interrupt clears
//! the running flag and shuts the queue down, the acceptor stops between
//! polls, workers drain out of `pop`, and the rendezvous FIFO is removed
//! once every worker has been joined.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use zerocopy::FromBytes;

use crate::catalog::Catalog;
use crate::codec;
use crate::queue::SessionQueue;
use crate::session::{self, Session};
use crate::signals::{self, SignalController};
use crate::wire::{MAX_SESSIONS, Opcode, PIPE_MODE, SETUP_FRAME_LEN, SetupFrame};

/// How long the acceptor waits for a setup frame before rechecking the
/// running and dump flags, in milliseconds.
const ACCEPT_POLL_INTERVAL_MS: u16 = 250;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the rendezvous FIFO clients connect on.
    pub pipe_path: PathBuf,
    /// Per-operation catalog access delay.
    pub access_delay: Duration,
    /// Number of worker threads, and the session-queue bound.
    pub workers: usize,
}

impl ServerConfig {
    /// Configuration with the default pool size and no access delay.
    pub fn new<P: Into<PathBuf>>(pipe_path: P) -> ServerConfig {
        ServerConfig {
            pipe_path: pipe_path.into(),
            access_delay: Duration::ZERO,
            workers: MAX_SESSIONS,
        }
    }

    /// Sets the per-operation catalog access delay.
    pub fn access_delay(mut self, access_delay: Duration) -> ServerConfig {
        self.access_delay = access_delay;
        self
    }

    /// Sets the worker-pool size. Must be at least 1.
    pub fn workers(mut self, workers: usize) -> ServerConfig {
        self.workers = workers;
        self
    }
}

/// State shared by the acceptor, the worker pool and the signal thread.
#[derive(Debug)]
pub(crate) struct ServerState {
    running: AtomicBool,
    dump_requested: AtomicBool,
    active_sessions: AtomicUsize,
    next_session_id: AtomicU32,
    queue: SessionQueue,
    catalog: Catalog,
}

impl ServerState {
    fn new(config: &ServerConfig) -> ServerState {
        ServerState {
            running: AtomicBool::new(true),
            dump_requested: AtomicBool::new(false),
            active_sessions: AtomicUsize::new(0),
            next_session_id: AtomicU32::new(0),
            queue: SessionQueue::new(config.workers),
            catalog: Catalog::new(config.access_delay),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the acceptor and drains the worker pool. Idempotent.
    pub(crate) fn begin_shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.queue.shutdown();
        }
    }

    /// Asks the acceptor to dump the catalog at its next opportunity.
    pub(crate) fn request_dump(&self) {
        self.dump_requested.store(true, Ordering::SeqCst);
    }

    fn take_dump_request(&self) -> bool {
        self.dump_requested.swap(false, Ordering::SeqCst)
    }
}

/// The rendezvous FIFO: created on startup, unlinked when the server
/// winds down.
struct Rendezvous {
    path: PathBuf,
    pipe: File,
}

impl Rendezvous {
    fn create(path: &Path) -> io::Result<Rendezvous> {
        match mkfifo(path, Mode::from_bits_truncate(PIPE_MODE)) {
            Ok(()) => {}
            Err(nix::errno::Errno::EEXIST) => {
                warn!("rendezvous pipe {} already exists", path.display());
            }
            Err(err) => return Err(err.into()),
        }
        // Read-write, not read-only: the server then holds a writer
        // reference of its own, so opens don't block on the first client
        // and reads block for the next frame instead of returning EOF
        // whenever a client closes its write end.
        let pipe = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Rendezvous {
            path: path.to_owned(),
            pipe,
        })
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(
                "failed to remove rendezvous pipe {}: {err}",
                self.path.display()
            );
        }
    }
}

/// An event management server, ready to accept sessions.
pub struct Server {
    state: Arc<ServerState>,
    rendezvous: Rendezvous,
    workers: Vec<JoinHandle<()>>,
    // Held for its Drop: stops the signal thread when the server goes.
    _signals: SignalController,
}

impl Server {
    /// Creates the rendezvous FIFO, installs the signal controller and
    /// starts the worker pool. Any failure here is a startup failure.
    pub fn new(config: ServerConfig) -> io::Result<Server> {
        if config.workers == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "worker pool must have at least one thread",
            ));
        }
        let state = Arc::new(ServerState::new(&config));
        let rendezvous = Rendezvous::create(&config.pipe_path)?;
        let signals = SignalController::install(Arc::clone(&state))?;

        let mut workers = Vec::with_capacity(config.workers);
        for worker_idx in 0..config.workers {
            let worker_state = Arc::clone(&state);
            let spawned = thread::Builder::new()
                .name(format!("ems-worker-{worker_idx}"))
                .spawn(move || worker_main(worker_state, worker_idx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Unwind the part of the pool that did start.
                    state.begin_shutdown();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Server {
            state,
            rendezvous,
            workers,
            _signals: signals,
        })
    }

    /// Runs the acceptor until shutdown, then joins the pool and removes
    /// the rendezvous FIFO. This is the server's main loop; it does not
    /// return while the server is healthy.
    pub fn run(mut self) -> io::Result<()> {
        let result = self.accept_loop();
        self.state.begin_shutdown();
        for handle in mem::take(&mut self.workers) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("server stopped");
        result
    }

    /// Runs the server on a background thread and returns a guard that
    /// shuts it down and joins it when dropped.
    pub fn spawn(self) -> io::Result<BackgroundServer> {
        BackgroundServer::new(self)
    }

    fn accept_loop(&self) -> io::Result<()> {
        info!(
            "serving on {} with {} worker(s)",
            self.rendezvous.path.display(),
            self.workers.len()
        );
        while let Some(frame) = self.await_setup()? {
            if frame.opcode != Opcode::Setup as u32 {
                warn!("ignoring setup frame with opcode {}", frame.opcode);
                continue;
            }
            let (req_path, resp_path) = match (frame.req_path(), frame.resp_path()) {
                (Some(req_path), Some(resp_path)) => (req_path, resp_path),
                _ => {
                    warn!("ignoring setup frame with malformed pipe paths");
                    continue;
                }
            };

            let id = self.state.next_session_id.fetch_add(1, Ordering::Relaxed);
            let session = Session {
                id,
                req_path,
                resp_path,
            };
            let active = self.state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
            info!("session {id}: accepted ({active} active)");
            if active > self.workers.len() {
                debug!("pool saturated, waiting for a free worker");
            }
            if self.state.queue.push(session).is_err() {
                // Shut down while blocked on a full queue.
                self.state.active_sessions.fetch_sub(1, Ordering::SeqCst);
                break;
            }
        }
        Ok(())
    }

    /// Waits for the next complete setup frame.
    ///
    /// Blocks in bounded poll slices so the running and dump flags are
    /// observed promptly; returns `None` once shutdown is requested.
    fn await_setup(&self) -> io::Result<Option<SetupFrame>> {
        loop {
            if !self.state.running() {
                return Ok(None);
            }
            if self.state.take_dump_request() {
                dump_catalog(&self.state.catalog);
            }

            let mut poll_fd = PollFd::new(self.rendezvous.pipe.as_fd(), PollFlags::POLLIN);
            match poll(
                slice::from_mut(&mut poll_fd),
                PollTimeout::from(ACCEPT_POLL_INTERVAL_MS),
            ) {
                Ok(0) => continue,
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }

            let mut raw = [0u8; SETUP_FRAME_LEN];
            let mut pipe = &self.rendezvous.pipe;
            if !codec::read_full_or_closed(&mut pipe, &mut raw)? {
                // No writer yet; keep waiting.
                continue;
            }
            match SetupFrame::read_from_bytes(&raw) {
                Ok(frame) => return Ok(Some(frame)),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "setup frame buffer size mismatch",
                    ));
                }
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("pipe_path", &self.rendezvous.path)
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Body of each pool thread: drain the queue until shutdown, serving one
/// session at a time.
fn worker_main(state: Arc<ServerState>, worker_idx: usize) {
    if let Err(err) = signals::mask_diagnostic_signal() {
        warn!("worker {worker_idx}: failed to mask SIGUSR1: {err}");
    }
    debug!("worker {worker_idx}: waiting for sessions");
    while let Some(session) = state.queue.pop() {
        debug!("worker {worker_idx}: adopted session {}", session.id);
        match session::serve(&session, &state.catalog, &state.running) {
            Ok(()) => info!("session {} ended", session.id),
            Err(err) => warn!("session {} aborted: {err}", session.id),
        }
        let left = state.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("worker {worker_idx}: session done ({left} active)");
    }
    debug!("worker {worker_idx}: exiting");
}

/// Writes every event's id and seat grid through the logger. Runs on the
/// acceptor when a SIGUSR1 dump has been requested.
fn dump_catalog(catalog: &Catalog) {
    let ids = catalog.list();
    info!("catalog dump: {} event(s)", ids.len());
    for id in ids {
        if let Ok(view) = catalog.show(id) {
            info!("event {id} ({}x{})", view.rows, view.cols);
            for row in view.seats.chunks(view.cols) {
                let cells: Vec<String> = row.iter().map(u32::to_string).collect();
                info!("  {}", cells.join(" "));
            }
        }
    }
}

/// A server running on a background thread.
///
/// Dropping the guard shuts the server down and joins it; [`shutdown`]
/// does the same but reports the acceptor's outcome.
///
/// [`shutdown`]: BackgroundServer::shutdown
pub struct BackgroundServer {
    state: Arc<ServerState>,
    guard: Option<JoinHandle<io::Result<()>>>,
}

impl BackgroundServer {
    fn new(server: Server) -> io::Result<BackgroundServer> {
        let state = Arc::clone(&server.state);
        let guard = thread::Builder::new()
            .name("ems-acceptor".to_owned())
            .spawn(move || server.run())?;
        Ok(BackgroundServer {
            state,
            guard: Some(guard),
        })
    }

    /// Number of sessions currently accepted and not yet finished.
    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions.load(Ordering::SeqCst)
    }

    /// Shuts the server down and waits for it to stop.
    pub fn shutdown(mut self) -> io::Result<()> {
        self.state.begin_shutdown();
        match self.guard.take() {
            Some(guard) => guard
                .join()
                .map_err(|_| io::Error::other("server thread panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        self.state.begin_shutdown();
        if let Some(guard) = self.guard.take() {
            let _ = guard.join();
        }
    }
}

impl fmt::Debug for BackgroundServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundServer")
            .field("active_sessions", &self.active_sessions())
            .finish()
    }
}
