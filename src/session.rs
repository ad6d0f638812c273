//! One client session: the record handed through the queue and the
//! dispatch loop a worker runs to serve it.
//!
//! The worker owns both per-session FIFOs exclusively while the session is
//! active. Requests are strictly serial, so each response is written before
//! the next request is read and the client observes replies in send order.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{error, fmt};

use log::debug;

use crate::catalog::{Catalog, CatalogError};
use crate::codec;
use crate::request::{self, Incoming, Request, RequestError};
use crate::wire::{STATUS_ERR, STATUS_OK};

/// One established client relationship: a process-unique id plus the two
/// per-session FIFO paths from the client's setup frame.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) id: u32,
    pub(crate) req_path: PathBuf,
    pub(crate) resp_path: PathBuf,
}

/// Why a session was torn down early.
///
/// Either kind terminates only the offending session; the server keeps
/// serving everyone else.
#[derive(Debug)]
pub(crate) enum SessionError {
    /// The client violated the framing rules.
    Protocol(RequestError),
    /// A pipe open, read or write failed.
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Protocol(err) => write!(f, "protocol violation: {err}"),
            SessionError::Io(err) => write!(f, "pipe failure: {err}"),
        }
    }
}

impl error::Error for SessionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SessionError::Protocol(err) => Some(err),
            SessionError::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> SessionError {
        SessionError::Io(err)
    }
}

impl From<RequestError> for SessionError {
    fn from(err: RequestError) -> SessionError {
        match err {
            RequestError::Io(err) => SessionError::Io(err),
            err => SessionError::Protocol(err),
        }
    }
}

/// Serves one session to completion.
///
/// Adoption first: open the response pipe for writing, announce the
/// assigned id, then open the request pipe for reading. The order mirrors
/// the client's (response-read, then request-write); swapping the opens
/// deadlocks both sides.
pub(crate) fn serve(
    session: &Session,
    catalog: &Catalog,
    running: &AtomicBool,
) -> Result<(), SessionError> {
    let mut responses = OpenOptions::new().write(true).open(&session.resp_path)?;
    codec::write_value(&mut responses, &session.id)?;
    let mut requests = File::open(&session.req_path)?;
    debug!("session {}: pipes open", session.id);

    while running.load(Ordering::SeqCst) {
        let request = match request::read_request(&mut requests)? {
            Incoming::Closed => {
                debug!("session {}: client closed its request pipe", session.id);
                return Ok(());
            }
            Incoming::Request(request) => request,
        };
        debug!("session {}: {:?}", session.id, request);

        match request {
            Request::Quit => return Ok(()),
            Request::Create {
                event_id,
                rows,
                cols,
            } => {
                let status = status_of(session.id, catalog.create(event_id, rows, cols));
                codec::write_value(&mut responses, &status)?;
            }
            Request::Reserve { event_id, seats } => {
                let status = status_of(session.id, catalog.reserve(event_id, &seats));
                codec::write_value(&mut responses, &status)?;
            }
            Request::Show { event_id } => match catalog.show(event_id) {
                Ok(view) => {
                    codec::write_value(&mut responses, &STATUS_OK)?;
                    codec::write_value(&mut responses, &view.rows)?;
                    codec::write_value(&mut responses, &view.cols)?;
                    codec::write_slice(&mut responses, &view.seats)?;
                }
                Err(err) => {
                    debug!("session {}: show rejected: {err}", session.id);
                    codec::write_value(&mut responses, &STATUS_ERR)?;
                }
            },
            Request::List => {
                let ids = catalog.list();
                codec::write_value(&mut responses, &STATUS_OK)?;
                codec::write_value(&mut responses, &ids.len())?;
                codec::write_slice(&mut responses, &ids)?;
            }
        }
    }
    // Interrupted between exchanges; the pipes close on drop.
    debug!("session {}: shutdown observed", session.id);
    Ok(())
}

fn status_of(id: u32, result: Result<(), CatalogError>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(err) => {
            debug!("session {id}: rejected: {err}");
            STATUS_ERR
        }
    }
}
