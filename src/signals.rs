//! Process signal discipline.
//!
//! Handlers themselves only flip flags; the real work happens on a
//! dedicated thread draining a signal iterator, so the queue broadcast on
//! interrupt runs in normal thread context rather than inside a handler.
//!
//! SIGPIPE is replaced process-wide: a worker writing to a vanished
//! client must see an `EPIPE` error, not die.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};

use log::{info, warn};
use nix::sys::signal::{SigSet, Signal};
use signal_hook::consts::{SIGINT, SIGPIPE, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};

use crate::server::ServerState;

/// The dedicated signal thread and the handle that stops it.
pub(crate) struct SignalController {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalController {
    /// Installs the process-wide handlers and starts the signal thread.
    ///
    /// Interrupt (SIGINT/SIGTERM) begins server shutdown; SIGUSR1 requests
    /// a catalog dump, serviced by the acceptor at the top of its loop.
    pub(crate) fn install(state: Arc<ServerState>) -> io::Result<SignalController> {
        // Swap SIGPIPE's default kill action for a flag nobody reads.
        let sigpipe_sink = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGPIPE, sigpipe_sink)?;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("ems-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGINT | SIGTERM => {
                            info!("interrupt received, shutting down");
                            state.begin_shutdown();
                        }
                        SIGUSR1 => {
                            info!("SIGUSR1 received, scheduling catalog dump");
                            state.request_dump();
                        }
                        _ => {}
                    }
                }
            })?;
        Ok(SignalController {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalController {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("signal thread panicked");
            }
        }
    }
}

/// Blocks SIGUSR1 delivery to the calling thread, leaving diagnostics to
/// the acceptor side. Called by each worker before it starts serving.
pub(crate) fn mask_diagnostic_signal() -> io::Result<()> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGUSR1);
    mask.thread_block()?;
    Ok(())
}
