//! Fixed-capacity circular byte buffer.
//!
//! Receive notifications are written into the buffer as they arrive and the
//! protocol layer drains it sequentially. When more bytes arrive than fit,
//! the oldest unread bytes are overwritten: bootloader output is short-lived
//! text, so only the most recent `capacity` bytes matter.

/// Default capacity used by [`crate::session::BootloaderSession`].
pub const DEFAULT_CAPACITY: usize = 300;

/// Circular byte buffer that overwrites its oldest bytes on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    // Index of the next byte to read.
    head: usize,
    // Index where the next byte is written.
    tail: usize,
    count: usize,
}

impl RingBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    ///
    /// A zero capacity is clamped to one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Maximum number of bytes held.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered, unread bytes.
    pub fn available(&self) -> usize {
        self.count
    }

    /// Whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the next write will overwrite an unread byte.
    pub fn is_full(&self) -> bool {
        self.count == self.capacity()
    }

    /// Append bytes, dropping the oldest unread bytes on overflow.
    pub fn write(&mut self, data: &[u8]) {
        for &byte in data {
            self.buf[self.tail] = byte;
            self.tail = self.next(self.tail);

            if self.is_full() {
                self.head = self.next(self.head);
            } else {
                self.count += 1;
            }
        }
    }

    /// Remove and return up to `n` bytes in arrival order.
    pub fn read(&mut self, n: usize) -> Vec<u8> {
        let len = n.min(self.count);
        let mut out = Vec::with_capacity(len);

        for _ in 0..len {
            out.push(self.buf[self.head]);
            self.head = self.next(self.head);
        }
        self.count -= len;

        out
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_capacity() {
        let mut rb = RingBuffer::new(16);
        rb.write(b"Boot");
        rb.write(b"loader");

        assert_eq!(rb.available(), 10);
        assert_eq!(rb.read(10), b"Bootloader");
        assert!(rb.is_empty());
    }

    #[test]
    fn test_round_trip_exactly_full() {
        let mut rb = RingBuffer::new(8);
        rb.write(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(rb.is_full());
        assert_eq!(rb.read(8), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_overwrite_keeps_most_recent_bytes() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"abcdef");

        assert_eq!(rb.available(), 4);
        assert_eq!(rb.read(4), b"cdef");
    }

    #[test]
    fn test_overwrite_across_many_writes() {
        let mut rb = RingBuffer::new(5);
        let data: Vec<u8> = (0u8..=200).collect();
        for chunk in data.chunks(7) {
            rb.write(chunk);
        }

        assert_eq!(rb.read(usize::MAX), &data[data.len() - 5..]);
    }

    #[test]
    fn test_short_read_returns_what_is_available() {
        let mut rb = RingBuffer::new(8);
        assert!(rb.read(4).is_empty());

        rb.write(b"ok");
        assert_eq!(rb.read(100), b"ok");
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn test_interleaved_reads_and_writes_wrap() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"abc");
        assert_eq!(rb.read(2), b"ab");

        rb.write(b"def");
        assert_eq!(rb.available(), 4);
        assert_eq!(rb.read(4), b"cdef");
    }

    #[test]
    fn test_clear() {
        let mut rb = RingBuffer::new(4);
        rb.write(b"xyz");
        rb.clear();

        assert!(rb.is_empty());
        rb.write(b"q");
        assert_eq!(rb.read(4), b"q");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut rb = RingBuffer::new(0);
        rb.write(b"12");

        assert_eq!(rb.capacity(), 1);
        assert_eq!(rb.read(2), b"2");
    }
}
