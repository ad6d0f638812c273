//! Event management server and thin client over host-local named pipes.
//!
//! A server process owns a well-known rendezvous FIFO. Clients announce
//! themselves there with a fixed-layout setup frame naming two FIFOs of
//! their own; the acceptor turns each valid frame into a session and hands
//! it to a bounded queue, where a fixed pool of worker threads serves one
//! session each at a time. Within a session, requests are compact binary
//! frames (a 4-byte opcode plus payload) answered strictly in order, and
//! all sessions share one in-memory catalog of seated events.
//!
//! The protocol is deliberately host-local: integers travel in native byte
//! order and native widths, so a client must be built for the same target
//! as the server (the in-tree [`Client`] always is).
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use ems::{Client, Server, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new(ServerConfig::new("/tmp/ems.pipe"))?.spawn()?;
//!
//! let mut client = Client::connect(
//!     Path::new("/tmp/ems.pipe"),
//!     Path::new("/tmp/ems.req"),
//!     Path::new("/tmp/ems.resp"),
//! )?;
//! client.create(7, 2, 3)?;
//! client.reserve(7, &[(1, 1), (2, 3)])?;
//! let view = client.show(7)?;
//! assert_eq!(view.seats.iter().filter(|&&s| s != 0).count(), 2);
//! client.quit()?;
//!
//! server.shutdown()?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::catalog::{Catalog, CatalogError, EventView};
pub use crate::client::{Client, ClientError};
pub use crate::request::{Request, RequestError, Seat};
pub use crate::server::{BackgroundServer, Server, ServerConfig};
pub use crate::wire::{MAX_RESERVATION_SIZE, MAX_SESSIONS, Opcode, PATH_LEN};

mod catalog;
mod client;
mod codec;
mod queue;
mod request;
mod server;
mod session;
mod signals;
mod wire;
