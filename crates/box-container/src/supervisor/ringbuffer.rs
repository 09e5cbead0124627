//! Fixed-capacity byte ring buffer backing each I/O forwarder (spec §4.G,
//! default 256 KiB). Grounded on the shape of
//! `original_source/src/linyaps_box/io/forwarder.cpp`'s internal buffer,
//! re-expressed as a plain `Vec<u8>`-backed ring since Rust's slice APIs
//! make the wrap-around bookkeeping straightforward without a raw buffer.

pub const DEFAULT_CAPACITY: usize = 256 * 1024;

pub struct RingBuffer {
    buf: Vec<u8>,
    head: usize, // next byte to read
    len: usize,  // bytes currently stored
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        RingBuffer { buf: vec![0; capacity], head: 0, len: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    pub fn free_space(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Appends as much of `data` as fits; returns the number of bytes
    /// actually written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free_space());
        let tail = (self.head + self.len) % self.buf.len();
        let first = n.min(self.buf.len() - tail);
        self.buf[tail..tail + first].copy_from_slice(&data[..first]);
        if first < n {
            self.buf[..n - first].copy_from_slice(&data[first..n]);
        }
        self.len += n;
        n
    }

    /// Calls `write_fn` with a contiguous readable slice (at most one
    /// wrap-around segment), removing exactly the bytes it reports consuming.
    pub fn drain_with<F>(&mut self, mut write_fn: F) -> std::io::Result<usize>
    where
        F: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        if self.is_empty() {
            return Ok(0);
        }
        let first_len = (self.buf.len() - self.head).min(self.len);
        let n = write_fn(&self.buf[self.head..self.head + first_len])?;
        self.head = (self.head + n) % self.buf.len();
        self.len -= n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_drain_round_trips() {
        let mut rb = RingBuffer::with_capacity(8);
        assert_eq!(rb.write(b"hello"), 5);
        let mut out = Vec::new();
        rb.drain_with(|chunk| {
            out.extend_from_slice(chunk);
            Ok(chunk.len())
        })
        .unwrap();
        assert_eq!(out, b"hello");
        assert!(rb.is_empty());
    }

    #[test]
    fn write_truncates_at_capacity() {
        let mut rb = RingBuffer::with_capacity(4);
        assert_eq!(rb.write(b"abcdef"), 4);
        assert!(rb.is_full());
    }

    #[test]
    fn wrap_around_write_and_drain() {
        let mut rb = RingBuffer::with_capacity(4);
        rb.write(b"ab");
        let mut first = Vec::new();
        rb.drain_with(|c| {
            first.extend_from_slice(c);
            Ok(c.len())
        })
        .unwrap();
        rb.write(b"cdef"); // wraps: head was advanced past 0
        let mut second = Vec::new();
        while !rb.is_empty() {
            rb.drain_with(|c| {
                second.extend_from_slice(c);
                Ok(c.len())
            })
            .unwrap();
        }
        assert_eq!(second, b"cdef");
    }
}
