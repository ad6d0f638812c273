//! Per-session request decoding.
//!
//! A request is one framed command on an established session's request
//! pipe: a 4-byte opcode followed by the opcode's payload. Decoding turns
//! the raw frames into a [`Request`] value so the dispatcher can match on
//! operations instead of switching on integers.

use std::io::{self, Read};
use std::{error, fmt};

use crate::codec;
use crate::wire::{MAX_RESERVATION_SIZE, Opcode};

/// Row/column pair identifying one seat, 1-based.
pub type Seat = (usize, usize);

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// End the session.
    Quit,
    /// Create an event with the given seat-grid dimensions.
    Create {
        /// Id of the event to create.
        event_id: u32,
        /// Number of seat rows.
        rows: usize,
        /// Number of seat columns.
        cols: usize,
    },
    /// Reserve a set of seats in one event, all or nothing.
    Reserve {
        /// Id of the event to reserve in.
        event_id: u32,
        /// The requested seats.
        seats: Vec<Seat>,
    },
    /// Snapshot one event's seat grid.
    Show {
        /// Id of the event to snapshot.
        event_id: u32,
    },
    /// List the ids of all events.
    List,
}

/// Error that may occur while reading and parsing a request frame.
#[derive(Debug)]
pub enum RequestError {
    /// The request pipe failed or ended mid-frame.
    Io(io::Error),
    /// The client sent an opcode outside the per-session set.
    UnknownOpcode(u32),
    /// A reservation named more seats than a single request may carry.
    OversizedReservation(usize),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Io(err) => write!(f, "request pipe error: {err}"),
            RequestError::UnknownOpcode(opcode) => write!(f, "unknown opcode ({opcode})"),
            RequestError::OversizedReservation(count) => write!(
                f,
                "reservation of {count} seats exceeds the {MAX_RESERVATION_SIZE}-seat limit"
            ),
        }
    }
}

impl error::Error for RequestError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RequestError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RequestError {
    fn from(err: io::Error) -> RequestError {
        RequestError::Io(err)
    }
}

/// What one read on the request pipe produced.
#[derive(Debug)]
pub(crate) enum Incoming {
    /// The client closed its write end on a frame boundary.
    Closed,
    /// A complete request frame.
    Request(Request),
}

/// Reads one request frame, blocking until it is complete.
///
/// End-of-stream on the opcode boundary is a normal hang-up; a partially
/// transferred opcode or payload is an error.
pub(crate) fn read_request<R: Read>(r: &mut R) -> Result<Incoming, RequestError> {
    let mut raw = [0u8; 4];
    if !codec::read_full_or_closed(r, &mut raw)? {
        return Ok(Incoming::Closed);
    }
    let raw = u32::from_ne_bytes(raw);
    let request = match Opcode::try_from(raw) {
        // Setup is only meaningful on the rendezvous pipe.
        Err(_) | Ok(Opcode::Setup) => return Err(RequestError::UnknownOpcode(raw)),
        Ok(Opcode::Quit) => Request::Quit,
        Ok(Opcode::Create) => Request::Create {
            event_id: codec::read_value(r)?,
            rows: codec::read_value(r)?,
            cols: codec::read_value(r)?,
        },
        Ok(Opcode::Reserve) => {
            let event_id: u32 = codec::read_value(r)?;
            let count: usize = codec::read_value(r)?;
            if count > MAX_RESERVATION_SIZE {
                return Err(RequestError::OversizedReservation(count));
            }
            let xs: Vec<usize> = codec::read_array(r, count)?;
            let ys: Vec<usize> = codec::read_array(r, count)?;
            Request::Reserve {
                event_id,
                seats: xs.into_iter().zip(ys).collect(),
            }
        }
        Ok(Opcode::Show) => Request::Show {
            event_id: codec::read_value(r)?,
        },
        Ok(Opcode::List) => Request::List,
    };
    Ok(Incoming::Request(request))
}
