//! Exact-count framing over blocking pipe streams.
//!
//! The protocol has no length-prefixed envelope; both sides read and write
//! field by field, so every transfer must move exactly the requested byte
//! count. The routines here loop over short reads and writes, retry
//! interrupted system calls, and report a stream that ends mid-field as
//! [`io::ErrorKind::UnexpectedEof`]. This is the only module that moves
//! typed values across the wire.

use std::io::{self, Read, Write};

use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Reads exactly `buf.len()` bytes.
///
/// Returns `Ok(false)` when the peer was already closed before the first
/// byte, so callers sitting on a frame boundary can treat end-of-stream as
/// a normal hang-up rather than a truncated frame.
pub(crate) fn read_full_or_closed<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipe closed mid-frame",
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(true)
}

/// Reads exactly `buf.len()` bytes; any end-of-stream is an error.
pub(crate) fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<()> {
    if read_full_or_closed(r, buf)? {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "pipe closed before frame",
        ))
    }
}

/// Writes all of `buf`.
pub(crate) fn write_full<W: Write>(w: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut sent = 0;
    while sent < buf.len() {
        match w.write(&buf[sent..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "pipe refused further bytes",
                ));
            }
            Ok(n) => sent += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Reads one fixed-layout value.
pub(crate) fn read_value<R, T>(r: &mut R) -> io::Result<T>
where
    R: Read,
    T: FromBytes + IntoBytes + Immutable,
{
    let mut value = T::new_zeroed();
    read_full(r, value.as_mut_bytes())?;
    Ok(value)
}

/// Reads a contiguous run of `count` fixed-layout values.
pub(crate) fn read_array<R, T>(r: &mut R, count: usize) -> io::Result<Vec<T>>
where
    R: Read,
    T: FromBytes + IntoBytes + Immutable + Clone,
{
    let mut values = vec![T::new_zeroed(); count];
    read_full(r, values.as_mut_slice().as_mut_bytes())?;
    Ok(values)
}

/// Writes one fixed-layout value.
pub(crate) fn write_value<W, T>(w: &mut W, value: &T) -> io::Result<()>
where
    W: Write,
    T: IntoBytes + Immutable,
{
    write_full(w, value.as_bytes())
}

/// Writes a contiguous run of fixed-layout values.
pub(crate) fn write_slice<W, T>(w: &mut W, values: &[T]) -> io::Result<()>
where
    W: Write,
    T: IntoBytes + Immutable,
{
    write_full(w, values.as_bytes())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Reader that yields one byte per call and fails with EINTR between
    /// them, like a pipe read racing a signal.
    struct Interrupted {
        data: Vec<u8>,
        pos: usize,
        hiccup: bool,
    }

    impl Read for Interrupted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.hiccup {
                self.hiccup = false;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.hiccup = true;
            if self.pos == self.data.len() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn value_round_trip() {
        let mut buf = Vec::new();
        write_value(&mut buf, &0x1234_5678u32).unwrap();
        write_value(&mut buf, &7usize).unwrap();
        let mut r = Cursor::new(buf);
        assert_eq!(read_value::<_, u32>(&mut r).unwrap(), 0x1234_5678);
        assert_eq!(read_value::<_, usize>(&mut r).unwrap(), 7);
    }

    #[test]
    fn array_round_trip() {
        let seats = [1usize, 2, 3, 5, 8];
        let mut buf = Vec::new();
        write_slice(&mut buf, &seats).unwrap();
        let mut r = Cursor::new(buf);
        assert_eq!(read_array::<_, usize>(&mut r, seats.len()).unwrap(), seats);
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let mut r = Interrupted {
            data: 0xdead_beefu32.as_bytes().to_vec(),
            pos: 0,
            hiccup: false,
        };
        assert_eq!(read_value::<_, u32>(&mut r).unwrap(), 0xdead_beef);
    }

    #[test]
    fn eof_before_frame_is_closed() {
        let mut r = Cursor::new(Vec::new());
        let mut buf = [0u8; 4];
        assert!(!read_full_or_closed(&mut r, &mut buf).unwrap());
    }

    #[test]
    fn eof_mid_frame_is_an_error() {
        let mut r = Cursor::new(vec![1u8, 2]);
        let mut buf = [0u8; 4];
        let err = read_full_or_closed(&mut r, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn eof_is_an_error_for_read_full() {
        let mut r = Cursor::new(Vec::new());
        let err = read_value::<_, u32>(&mut r).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
