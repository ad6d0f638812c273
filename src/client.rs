//! Thin blocking client for the EMS pipe protocol.
//!
//! A [`Client`] owns the session's two FIFOs: it creates both before
//! announcing itself on the rendezvous pipe, so the server's blocking
//! opens always have something to open. Calls are strictly serial; each
//! writes one request frame and reads the matching reply before
//! returning.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::{error, fmt};

use log::debug;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;

use crate::catalog::EventView;
use crate::codec;
use crate::request::Seat;
use crate::wire::{Opcode, PIPE_MODE, SetupFrame, STATUS_OK};

/// Errors surfaced by client calls.
#[derive(Debug)]
pub enum ClientError {
    /// A pipe open, read or write failed, or the server hung up.
    Io(io::Error),
    /// The server processed the request and rejected it with the given
    /// nonzero status.
    Rejected(i32),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "session pipe error: {err}"),
            ClientError::Rejected(status) => write!(f, "server rejected request (status {status})"),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ClientError::Io(err) => Some(err),
            ClientError::Rejected(_) => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> ClientError {
        ClientError::Io(err)
    }
}

/// One established session with an EMS server.
#[derive(Debug)]
pub struct Client {
    session_id: u32,
    requests: File,
    responses: File,
    req_path: PathBuf,
    resp_path: PathBuf,
    quit_sent: bool,
}

impl Client {
    /// Establishes a session.
    ///
    /// Creates the two per-session FIFOs, sends the setup frame on the
    /// server's rendezvous pipe, then opens response-read before
    /// request-write (the mirror image of the server's open order) and
    /// reads the assigned session id. Blocks until a worker adopts the
    /// session.
    pub fn connect(
        server_pipe: &Path,
        req_path: &Path,
        resp_path: &Path,
    ) -> Result<Client, ClientError> {
        let frame = SetupFrame::new(req_path, resp_path)?;
        make_session_fifo(req_path)?;
        if let Err(err) = make_session_fifo(resp_path) {
            let _ = fs::remove_file(req_path);
            return Err(err);
        }

        match establish(server_pipe, &frame, req_path, resp_path) {
            Ok((session_id, requests, responses)) => {
                debug!("connected as session {session_id}");
                Ok(Client {
                    session_id,
                    requests,
                    responses,
                    req_path: req_path.to_owned(),
                    resp_path: resp_path.to_owned(),
                    quit_sent: false,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(req_path);
                let _ = fs::remove_file(resp_path);
                Err(err)
            }
        }
    }

    /// The server-assigned session id.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Creates an event with an all-free `rows x cols` seat grid.
    pub fn create(&mut self, event_id: u32, rows: usize, cols: usize) -> Result<(), ClientError> {
        codec::write_value(&mut self.requests, &(Opcode::Create as u32))?;
        codec::write_value(&mut self.requests, &event_id)?;
        codec::write_value(&mut self.requests, &rows)?;
        codec::write_value(&mut self.requests, &cols)?;
        self.read_status()
    }

    /// Reserves the given seats (1-based row/column pairs), all or
    /// nothing.
    pub fn reserve(&mut self, event_id: u32, seats: &[Seat]) -> Result<(), ClientError> {
        let xs: Vec<usize> = seats.iter().map(|&(row, _)| row).collect();
        let ys: Vec<usize> = seats.iter().map(|&(_, col)| col).collect();
        codec::write_value(&mut self.requests, &(Opcode::Reserve as u32))?;
        codec::write_value(&mut self.requests, &event_id)?;
        codec::write_value(&mut self.requests, &seats.len())?;
        codec::write_slice(&mut self.requests, &xs)?;
        codec::write_slice(&mut self.requests, &ys)?;
        self.read_status()
    }

    /// Fetches a snapshot of one event's seat grid.
    pub fn show(&mut self, event_id: u32) -> Result<EventView, ClientError> {
        codec::write_value(&mut self.requests, &(Opcode::Show as u32))?;
        codec::write_value(&mut self.requests, &event_id)?;
        self.read_status()?;
        let rows: usize = codec::read_value(&mut self.responses)?;
        let cols: usize = codec::read_value(&mut self.responses)?;
        let seat_count = rows.checked_mul(cols).ok_or_else(|| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "seat grid dimensions overflow",
            ))
        })?;
        let seats = codec::read_array(&mut self.responses, seat_count)?;
        Ok(EventView { rows, cols, seats })
    }

    /// Fetches the ids of all events, in no particular order.
    pub fn list(&mut self) -> Result<Vec<u32>, ClientError> {
        codec::write_value(&mut self.requests, &(Opcode::List as u32))?;
        self.read_status()?;
        let count: usize = codec::read_value(&mut self.responses)?;
        Ok(codec::read_array(&mut self.responses, count)?)
    }

    /// Ends the session. The server sends no reply to a quit.
    pub fn quit(mut self) -> Result<(), ClientError> {
        self.send_quit()?;
        Ok(())
    }

    fn send_quit(&mut self) -> Result<(), ClientError> {
        if !self.quit_sent {
            self.quit_sent = true;
            codec::write_value(&mut self.requests, &(Opcode::Quit as u32))?;
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<(), ClientError> {
        let status: i32 = codec::read_value(&mut self.responses)?;
        if status == STATUS_OK {
            Ok(())
        } else {
            Err(ClientError::Rejected(status))
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best effort: a dead server means the pipes just close.
        let _ = self.send_quit();
        let _ = fs::remove_file(&self.req_path);
        let _ = fs::remove_file(&self.resp_path);
    }
}

/// Announces the session and completes the pipe handshake: setup frame on
/// the rendezvous pipe, then response-read, assigned id, request-write.
fn establish(
    server_pipe: &Path,
    frame: &SetupFrame,
    req_path: &Path,
    resp_path: &Path,
) -> Result<(u32, File, File), ClientError> {
    {
        let mut rendezvous = OpenOptions::new().write(true).open(server_pipe)?;
        codec::write_value(&mut rendezvous, frame)?;
    }
    let mut responses = File::open(resp_path)?;
    let session_id: u32 = codec::read_value(&mut responses)?;
    let requests = OpenOptions::new().write(true).open(req_path)?;
    Ok((session_id, requests, responses))
}

fn make_session_fifo(path: &Path) -> Result<(), ClientError> {
    // A pipe left behind by a crashed client would fail the mkfifo.
    let _ = fs::remove_file(path);
    match mkfifo(path, Mode::from_bits_truncate(PIPE_MODE)) {
        Ok(()) => Ok(()),
        Err(err) => Err(ClientError::Io(err.into())),
    }
}
