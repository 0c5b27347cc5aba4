/*!
Byte stream abstraction underneath the codec.

Two capabilities: [`Source`] (pull bytes) and [`Sink`] (push bytes). The
codec is generic over both, so the same state machines run over an in-memory
[`Buffer`], a plain `&[u8]`, a growing `Vec<u8>`, or a [`PullSource`] fed by
an external refill callback.

All operations are infallible at this layer: a short read means end of
input. Error classification happens above, in the codec.
*/

use std::fmt::Debug;

/// A readable stream of bytes.
///
/// `can_read` and the `read_*` operations may trigger refills on adapters
/// that buffer an external source, which is why they take `&mut self`.
pub trait Source {
    /// Returns `true` if at least `n` more bytes can be read.
    fn can_read(&mut self, n: usize) -> bool;

    /// A hint of how many bytes are immediately available without further
    /// I/O. May be 0 even when more data is reachable through a refill.
    fn suggest_available(&self) -> usize;

    /// Reads up to `buf.len()` bytes. A short count means end of input.
    fn read_raw(&mut self, buf: &mut [u8]) -> usize;

    /// Discards up to `n` bytes, returning how many were discarded.
    fn read_skip(&mut self, n: usize) -> usize {
        let mut scratch = [0u8; 256];
        let mut skipped = 0;
        while skipped < n {
            let want = (n - skipped).min(scratch.len());
            let got = self.read_raw(&mut scratch[..want]);
            if got == 0 {
                break;
            }
            skipped += got;
        }
        skipped
    }

    /// Reads `width` bytes (1..=8) as a big-endian unsigned integer.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `width` bytes remain; check [`Source::can_read`]
    /// first.
    fn read_raw_be(&mut self, width: usize) -> u64 {
        debug_assert!((1..=8).contains(&width));
        let mut buf = [0u8; 8];
        let got = self.read_raw(&mut buf[..width]);
        assert!(got == width, "short read of {got} bytes, wanted {width}");
        buf[..width].iter().fold(0u64, |v, b| (v << 8) | u64::from(*b))
    }

    /// Drains the stream, asking for the suggested amount each round and
    /// concatenating the collected chunks once at the end.
    fn read_all_available(&mut self) -> Vec<u8> {
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        loop {
            let want = self.suggest_available();
            if want == 0 {
                if !self.can_read(1) {
                    break;
                }
                continue;
            }
            let mut chunk = vec![0u8; want];
            let got = self.read_raw(&mut chunk);
            chunk.truncate(got);
            if got == 0 {
                break;
            }
            chunks.push(chunk);
        }
        let total = chunks.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in chunks {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// A writable stream of bytes.
///
/// Writes are infallible; the sink grows (or is assumed large enough) on
/// demand. [`Sink::total_written`] is a monotone counter used for
/// declared-size assertions.
pub trait Sink {
    /// Appends the given bytes.
    fn write_raw(&mut self, bytes: &[u8]);

    /// Total bytes written to this sink so far.
    fn total_written(&self) -> u64;

    /// Writes a single byte.
    fn write_u8(&mut self, value: u8) {
        self.write_raw(&[value]);
    }

    /// Writes the `width` (1..=8) least-significant bytes of `value`,
    /// most-significant first.
    fn write_raw_be(&mut self, value: u64, width: usize) {
        debug_assert!((1..=8).contains(&width));
        let bytes = value.to_be_bytes();
        self.write_raw(&bytes[8 - width..]);
    }

    /// Writes a big-endian `f32` by bit pattern.
    fn write_f32(&mut self, value: f32) {
        self.write_raw_be(u64::from(value.to_bits()), 4);
    }

    /// Writes a big-endian `f64` by bit pattern.
    fn write_f64(&mut self, value: f64) {
        self.write_raw_be(value.to_bits(), 8);
    }
}

impl Source for &[u8] {
    fn can_read(&mut self, n: usize) -> bool {
        self.len() >= n
    }

    fn suggest_available(&self) -> usize {
        self.len()
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.len());
        buf[..n].copy_from_slice(&self[..n]);
        *self = &self[n..];
        n
    }

    fn read_skip(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        *self = &self[n..];
        n
    }
}

impl Sink for Vec<u8> {
    fn write_raw(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn total_written(&self) -> u64 {
        self.len() as u64
    }
}

/// Growth floor for [`Buffer`] storage.
const BUFFER_FLOOR: usize = 16;

/// An owned, growable byte buffer with independent read and write cursors.
///
/// Writing appends at the end; reading advances from the front. Storage
/// doubles on demand from a floor of 16 bytes and is retained across
/// [`Buffer::reset`] so an instance can be reused.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    read: usize,
}

impl Buffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer with at least `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.max(BUFFER_FLOOR)),
            read: 0,
        }
    }

    /// Creates a buffer whose readable content is `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, read: 0 }
    }

    /// Clears both cursors, keeping the allocated storage.
    pub fn reset(&mut self) {
        self.data.clear();
        self.read = 0;
    }

    /// All bytes written so far, including already-read ones.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The not-yet-read portion.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read..]
    }

    /// Consumes the buffer, returning the written bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn grow(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if needed > self.data.capacity() {
            let mut cap = self.data.capacity().max(BUFFER_FLOOR);
            while cap < needed {
                cap *= 2;
            }
            self.data.reserve_exact(cap - self.data.len());
        }
    }
}

impl Sink for Buffer {
    fn write_raw(&mut self, bytes: &[u8]) {
        self.grow(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    fn total_written(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Source for Buffer {
    fn can_read(&mut self, n: usize) -> bool {
        self.data.len() - self.read >= n
    }

    fn suggest_available(&self) -> usize {
        self.data.len() - self.read
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len() - self.read);
        buf[..n].copy_from_slice(&self.data[self.read..self.read + n]);
        self.read += n;
        n
    }

    fn read_skip(&mut self, n: usize) -> usize {
        let n = n.min(self.data.len() - self.read);
        self.read += n;
        n
    }
}

/// A refill callback for [`PullSource`].
///
/// `read_chunk` fills as much of `buf` as it likes, returning the byte count
/// (`Some(0)` is permitted when a later call may yield more) or `None` at
/// end of input.
pub trait Pull {
    /// Refills `buf`, returning the number of bytes produced, or `None` at
    /// end of input.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Discards up to `len` bytes at the source, returning the number
    /// discarded, or `None` at end of input. The default reads into a
    /// scratch buffer.
    fn skip_chunk(&mut self, len: usize) -> Option<usize> {
        let mut scratch = [0u8; 512];
        let want = len.min(scratch.len());
        self.read_chunk(&mut scratch[..want])
    }
}

impl<F> Pull for F
where
    F: FnMut(&mut [u8]) -> Option<usize>,
{
    fn read_chunk(&mut self, buf: &mut [u8]) -> Option<usize> {
        self(buf)
    }
}

/// Minimum internal buffer size for [`PullSource`].
const MIN_PULL_BUFFER: usize = 4096;

/// A [`Source`] over a [`Pull`] refill callback.
///
/// Maintains a bounded internal buffer (at least 4096 bytes, grown to
/// whatever a single read demands), compacting it before each refill. End
/// of input is sticky: once the callback reports it, no further refills are
/// attempted.
pub struct PullSource<P> {
    pull: P,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<P: Pull> PullSource<P> {
    /// Wraps a refill callback.
    pub fn new(pull: P) -> Self {
        Self {
            pull,
            buf: vec![0; MIN_PULL_BUFFER],
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// Consumes the adapter, returning the callback.
    pub fn into_inner(self) -> P {
        self.pull
    }

    fn buffered(&self) -> usize {
        self.end - self.start
    }

    fn fill(&mut self, want: usize) {
        if self.buffered() >= want || self.eof {
            return;
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if want > self.buf.len() {
            self.buf.resize(want, 0);
        }
        while self.buffered() < want && !self.eof {
            match self.pull.read_chunk(&mut self.buf[self.end..]) {
                None => self.eof = true,
                Some(n) => self.end += n,
            }
        }
    }
}

impl<P: Pull> Source for PullSource<P> {
    fn can_read(&mut self, n: usize) -> bool {
        self.fill(n);
        self.buffered() >= n
    }

    fn suggest_available(&self) -> usize {
        self.buffered()
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        let have = self.buffered().min(buf.len());
        buf[..have].copy_from_slice(&self.buf[self.start..self.start + have]);
        self.start += have;
        let mut done = have;
        while done < buf.len() && !self.eof {
            match self.pull.read_chunk(&mut buf[done..]) {
                None => self.eof = true,
                Some(n) => done += n,
            }
        }
        done
    }

    fn read_skip(&mut self, n: usize) -> usize {
        let mut done = self.buffered().min(n);
        self.start += done;
        while done < n && !self.eof {
            match self.pull.skip_chunk(n - done) {
                None => self.eof = true,
                Some(s) => done += s,
            }
        }
        done
    }
}

impl<P: Pull> Debug for PullSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSource")
            .field("buffered", &self.buffered())
            .field("eof", &self.eof)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source() {
        let mut s: &[u8] = &[1, 2, 3, 4, 5];
        assert!(s.can_read(5));
        assert!(!s.can_read(6));
        assert_eq!(s.read_raw_be(2), 0x0102);
        assert_eq!(s.read_skip(1), 1);
        assert_eq!(s.read_raw_be(2), 0x0405);
        assert!(!s.can_read(1));
    }

    #[test]
    fn buffer_roundtrip() {
        let mut b = Buffer::new();
        b.write_raw_be(0x0102_0304, 4);
        b.write_f64(1.5);
        assert_eq!(b.total_written(), 12);
        assert_eq!(b.read_raw_be(4), 0x0102_0304);
        assert_eq!(f64::from_bits(b.read_raw_be(8)), 1.5);
        assert!(!b.can_read(1));
        b.reset();
        assert_eq!(b.total_written(), 0);
    }

    #[test]
    fn pull_source_single_byte_chunks() {
        let data: Vec<u8> = (0..=255).collect();
        let mut at = 0;
        let mut src = PullSource::new(move |buf: &mut [u8]| {
            if at == data.len() {
                return None;
            }
            buf[0] = data[at];
            at += 1;
            Some(1)
        });
        assert!(src.can_read(256));
        let mut out = vec![0u8; 256];
        assert_eq!(src.read_raw(&mut out), 256);
        assert_eq!(out, (0..=255).collect::<Vec<u8>>());
        assert!(!src.can_read(1));
    }

    #[test]
    fn pull_source_skip() {
        let mut remaining = 100usize;
        let mut src = PullSource::new(move |buf: &mut [u8]| {
            if remaining == 0 {
                return None;
            }
            let n = buf.len().min(remaining).min(7);
            for b in &mut buf[..n] {
                *b = 0x42;
            }
            remaining -= n;
            Some(n)
        });
        assert_eq!(src.read_skip(60), 60);
        assert_eq!(src.read_all_available().len(), 40);
    }

    #[test]
    fn read_all_available_concatenates() {
        let mut s: &[u8] = b"hello world";
        assert_eq!(s.read_all_available(), b"hello world");
        assert!(s.read_all_available().is_empty());
    }
}
