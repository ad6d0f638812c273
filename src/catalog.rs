//! Shared event catalog.
//!
//! Process-wide store of seated events, shared by every worker in the pool.
//! The registry sits behind a read-write lock and each event's seat grid
//! behind its own mutex, so sessions operating on different events do not
//! contend. Reservations are all-or-nothing: a request either fills every
//! seat it names with one fresh reservation number or changes nothing.
//!
//! An optional per-operation access delay stretches each operation's
//! critical window, making pool saturation and contention observable from
//! the outside.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::{error, fmt};

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::request::Seat;

/// Reasons the catalog rejects an operation.
///
/// All of these surface to the client as a nonzero reply status; the
/// session itself continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    /// An event with the requested id already exists.
    DuplicateEvent(u32),
    /// No event with the requested id exists.
    NoSuchEvent(u32),
    /// A seat grid dimension was zero or the grid would overflow.
    BadDimensions,
    /// A reservation named no seats.
    EmptyReservation,
    /// A reservation named the same seat twice.
    DuplicateSeat(Seat),
    /// A seat lies outside the event's grid.
    SeatOutOfBounds(Seat),
    /// A seat is already held by an earlier reservation.
    SeatTaken(Seat),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::DuplicateEvent(id) => write!(f, "event {id} already exists"),
            CatalogError::NoSuchEvent(id) => write!(f, "no event {id}"),
            CatalogError::BadDimensions => write!(f, "invalid seat grid dimensions"),
            CatalogError::EmptyReservation => write!(f, "reservation names no seats"),
            CatalogError::DuplicateSeat((row, col)) => {
                write!(f, "seat ({row},{col}) named twice")
            }
            CatalogError::SeatOutOfBounds((row, col)) => {
                write!(f, "seat ({row},{col}) outside the grid")
            }
            CatalogError::SeatTaken((row, col)) => write!(f, "seat ({row},{col}) already taken"),
        }
    }
}

impl error::Error for CatalogError {}

/// Owned snapshot of one event's seat grid.
///
/// `seats` is row-major: seat `(row, col)` (1-based) lives at
/// `(row - 1) * cols + (col - 1)`. A free seat holds 0; a reserved seat
/// holds its reservation number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventView {
    /// Number of seat rows.
    pub rows: usize,
    /// Number of seat columns.
    pub cols: usize,
    /// The seat grid, row-major.
    pub seats: Vec<u32>,
}

#[derive(Debug)]
struct Event {
    rows: usize,
    cols: usize,
    grid: Mutex<Grid>,
}

#[derive(Debug)]
struct Grid {
    seats: Vec<u32>,
    next_reservation: u32,
}

impl Event {
    fn new(rows: usize, cols: usize, seat_count: usize) -> Event {
        Event {
            rows,
            cols,
            grid: Mutex::new(Grid {
                seats: vec![0; seat_count],
                next_reservation: 1,
            }),
        }
    }

    fn seat_index(&self, (row, col): Seat) -> usize {
        (row - 1) * self.cols + (col - 1)
    }

    fn contains(&self, (row, col): Seat) -> bool {
        (1..=self.rows).contains(&row) && (1..=self.cols).contains(&col)
    }
}

/// The process-wide event store.
#[derive(Debug)]
pub struct Catalog {
    access_delay: Duration,
    events: RwLock<HashMap<u32, Arc<Event>>>,
}

impl Catalog {
    /// Creates an empty catalog. Every subsequent operation sleeps
    /// `access_delay` before touching event state.
    pub fn new(access_delay: Duration) -> Catalog {
        Catalog {
            access_delay,
            events: RwLock::new(HashMap::new()),
        }
    }

    fn delay(&self) {
        if !self.access_delay.is_zero() {
            thread::sleep(self.access_delay);
        }
    }

    fn lookup(&self, event_id: u32) -> Result<Arc<Event>, CatalogError> {
        self.events
            .read()
            .get(&event_id)
            .cloned()
            .ok_or(CatalogError::NoSuchEvent(event_id))
    }

    /// Creates a new event with an all-free `rows x cols` seat grid.
    pub fn create(&self, event_id: u32, rows: usize, cols: usize) -> Result<(), CatalogError> {
        if rows == 0 || cols == 0 {
            return Err(CatalogError::BadDimensions);
        }
        let seat_count = rows.checked_mul(cols).ok_or(CatalogError::BadDimensions)?;
        self.delay();
        let mut events = self.events.write();
        if events.contains_key(&event_id) {
            return Err(CatalogError::DuplicateEvent(event_id));
        }
        events.insert(event_id, Arc::new(Event::new(rows, cols, seat_count)));
        debug!("created event {event_id} ({rows}x{cols})");
        Ok(())
    }

    /// Reserves every named seat under one fresh reservation number, or
    /// fails without touching the grid.
    pub fn reserve(&self, event_id: u32, seats: &[Seat]) -> Result<(), CatalogError> {
        if seats.is_empty() {
            return Err(CatalogError::EmptyReservation);
        }
        self.delay();
        let event = self.lookup(event_id)?;
        for (i, &seat) in seats.iter().enumerate() {
            if !event.contains(seat) {
                return Err(CatalogError::SeatOutOfBounds(seat));
            }
            // Small bounded lists; a scan beats building a set.
            if seats[..i].contains(&seat) {
                return Err(CatalogError::DuplicateSeat(seat));
            }
        }

        let mut grid = event.grid.lock();
        for &seat in seats {
            if grid.seats[event.seat_index(seat)] != 0 {
                return Err(CatalogError::SeatTaken(seat));
            }
        }
        let reservation = grid.next_reservation;
        grid.next_reservation += 1;
        for &seat in seats {
            let index = event.seat_index(seat);
            grid.seats[index] = reservation;
        }
        debug!(
            "event {event_id}: reservation {reservation} holds {} seat(s)",
            seats.len()
        );
        Ok(())
    }

    /// Snapshots one event's dimensions and seat grid.
    pub fn show(&self, event_id: u32) -> Result<EventView, CatalogError> {
        self.delay();
        let event = self.lookup(event_id)?;
        let seats = event.grid.lock().seats.clone();
        Ok(EventView {
            rows: event.rows,
            cols: event.cols,
            seats,
        })
    }

    /// Ids of every event, in no particular order.
    pub fn list(&self) -> Vec<u32> {
        self.delay();
        self.events.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn catalog() -> Catalog {
        Catalog::new(Duration::ZERO)
    }

    #[test]
    fn create_then_show_round_trip() {
        let catalog = catalog();
        catalog.create(7, 2, 3).unwrap();
        let view = catalog.show(7).unwrap();
        assert_eq!((view.rows, view.cols), (2, 3));
        assert_eq!(view.seats, vec![0; 6]);
    }

    #[test]
    fn duplicate_and_bad_dimension_creates() {
        let catalog = catalog();
        catalog.create(7, 2, 3).unwrap();
        assert_eq!(catalog.create(7, 1, 1), Err(CatalogError::DuplicateEvent(7)));
        assert_eq!(catalog.create(8, 0, 3), Err(CatalogError::BadDimensions));
        assert_eq!(catalog.create(8, 3, 0), Err(CatalogError::BadDimensions));
        assert_eq!(
            catalog.create(8, usize::MAX, 2),
            Err(CatalogError::BadDimensions)
        );
    }

    #[test]
    fn reserve_fills_all_seats_with_one_number() {
        let catalog = catalog();
        catalog.create(7, 2, 3).unwrap();
        catalog.reserve(7, &[(1, 1), (2, 3)]).unwrap();
        let view = catalog.show(7).unwrap();
        assert_eq!(view.seats, vec![1, 0, 0, 0, 0, 1]);

        // The next reservation gets a fresh number.
        catalog.reserve(7, &[(1, 2)]).unwrap();
        assert_eq!(catalog.show(7).unwrap().seats, vec![1, 2, 0, 0, 0, 1]);
    }

    #[test]
    fn failed_reserve_changes_nothing() {
        let catalog = catalog();
        catalog.create(7, 2, 3).unwrap();
        catalog.reserve(7, &[(1, 1)]).unwrap();
        let before = catalog.show(7).unwrap();

        assert_eq!(
            catalog.reserve(7, &[(1, 2), (5, 1)]),
            Err(CatalogError::SeatOutOfBounds((5, 1)))
        );
        assert_eq!(
            catalog.reserve(7, &[(1, 2), (1, 1)]),
            Err(CatalogError::SeatTaken((1, 1)))
        );
        assert_eq!(
            catalog.reserve(7, &[(1, 2), (1, 2)]),
            Err(CatalogError::DuplicateSeat((1, 2)))
        );
        assert_eq!(catalog.reserve(7, &[]), Err(CatalogError::EmptyReservation));
        assert_eq!(
            catalog.reserve(9, &[(1, 1)]),
            Err(CatalogError::NoSuchEvent(9))
        );

        assert_eq!(catalog.show(7).unwrap(), before);
    }

    #[test]
    fn list_is_an_unordered_set() {
        let catalog = catalog();
        assert!(catalog.list().is_empty());
        catalog.create(7, 1, 1).unwrap();
        catalog.create(9, 1, 1).unwrap();
        let mut ids = catalog.list();
        ids.sort_unstable();
        assert_eq!(ids, vec![7, 9]);
    }

    #[test]
    fn show_snapshot_is_isolated() {
        let catalog = catalog();
        catalog.create(7, 1, 2).unwrap();
        let view = catalog.show(7).unwrap();
        catalog.reserve(7, &[(1, 1)]).unwrap();
        // The earlier snapshot does not observe the reservation.
        assert_eq!(view.seats, vec![0, 0]);
    }

    #[test]
    fn contended_reserves_stay_atomic() {
        let catalog = Arc::new(catalog());
        catalog.create(7, 10, 10).unwrap();

        // Every thread wants a pair overlapping all others at (1, 1).
        let handles: Vec<_> = (2usize..=9)
            .map(|row| {
                let catalog = Arc::clone(&catalog);
                thread::spawn(move || catalog.reserve(7, &[(1, 1), (row, row)]).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();

        // Exactly one reservation can hold (1, 1); every loser left no trace.
        assert_eq!(wins, 1);
        let view = catalog.show(7).unwrap();
        let taken = view.seats.iter().filter(|&&seat| seat != 0).count();
        assert_eq!(taken, 2, "partial reservation leaked");
    }
}
