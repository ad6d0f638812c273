//! Wire vocabulary for the EMS pipe protocol.
//!
//! Every message is a sequence of fixed-layout fields in the host byte order
//! of the server process; the protocol is strictly host-local, so no
//! byte-order normalization is performed. A client must be built for the
//! same target as the server it talks to (`usize` fields are native
//! pointer-width).

use std::ffi::OsStr;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use num_enum::TryFromPrimitive;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Default number of worker threads in the pool, and with it the bound of
/// the pending-session queue.
pub const MAX_SESSIONS: usize = 8;

/// Fixed width of each FIFO path field in a setup frame, terminator
/// included. Paths longer than `PATH_LEN - 1` bytes do not fit.
pub const PATH_LEN: usize = 40;

/// Upper bound on the number of seats in a single reservation request.
/// A count above this is a protocol violation, not a catalog rejection.
pub const MAX_RESERVATION_SIZE: usize = 256;

/// Permission bits for every FIFO created by the server or the client.
pub(crate) const PIPE_MODE: libc::mode_t = 0o640;

/// Reply status for a request the catalog accepted.
pub(crate) const STATUS_OK: i32 = 0;
/// Reply status for a request the catalog rejected.
pub(crate) const STATUS_ERR: i32 = 1;

/// Operation codes, sent as the leading `u32` of every request frame.
///
/// `Setup` is only valid on the rendezvous pipe; the remaining opcodes are
/// only valid on an established session's request pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Opcode {
    /// Establish a session (rendezvous pipe only).
    Setup = 1,
    /// End the session.
    Quit = 2,
    /// Create an event.
    Create = 3,
    /// Reserve seats in an event.
    Reserve = 4,
    /// Snapshot one event's seat grid.
    Show = 5,
    /// List all event ids.
    List = 6,
}

/// The first message a client writes on the rendezvous pipe.
///
/// | Offset       | Size       | Field                             |
/// |--------------|------------|-----------------------------------|
/// | 0            | 4          | opcode, must be [`Opcode::Setup`] |
/// | 4            | `PATH_LEN` | request-pipe path, null-padded    |
/// | 4 + PATH_LEN | `PATH_LEN` | response-pipe path, null-padded   |
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub(crate) struct SetupFrame {
    pub(crate) opcode: u32,
    pub(crate) req_path: [u8; PATH_LEN],
    pub(crate) resp_path: [u8; PATH_LEN],
}

/// Size in bytes of a setup frame on the wire.
pub(crate) const SETUP_FRAME_LEN: usize = mem::size_of::<SetupFrame>();

impl SetupFrame {
    /// Builds a setup frame carrying the two per-session FIFO paths.
    /// Fails if either path does not fit its fixed-width field.
    pub(crate) fn new(req_path: &Path, resp_path: &Path) -> io::Result<SetupFrame> {
        Ok(SetupFrame {
            opcode: Opcode::Setup as u32,
            req_path: pack_path(req_path)?,
            resp_path: pack_path(resp_path)?,
        })
    }

    /// The request-pipe path, or `None` if the field is malformed.
    pub(crate) fn req_path(&self) -> Option<PathBuf> {
        unpack_path(&self.req_path)
    }

    /// The response-pipe path, or `None` if the field is malformed.
    pub(crate) fn resp_path(&self) -> Option<PathBuf> {
        unpack_path(&self.resp_path)
    }
}

/// Encodes a path into a fixed-width, null-padded field.
fn pack_path(path: &Path) -> io::Result<[u8; PATH_LEN]> {
    let bytes = path.as_os_str().as_bytes();
    // One byte is reserved for the terminator.
    if bytes.len() >= PATH_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("FIFO path {} exceeds {} bytes", path.display(), PATH_LEN - 1),
        ));
    }
    let mut field = [0u8; PATH_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Decodes a fixed-width path field. An empty or unterminated field is
/// malformed and yields `None`.
fn unpack_path(field: &[u8; PATH_LEN]) -> Option<PathBuf> {
    let len = memchr::memchr(0, field)?;
    if len == 0 {
        return None;
    }
    Some(PathBuf::from(OsStr::from_bytes(&field[..len])))
}
