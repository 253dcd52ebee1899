// Growable byte buffer with separate read/write cursors
//
// Modeled on a classic ring-free network buffer: bytes accumulate at the
// write cursor (typically filled straight from a socket read), get
// inspected and consumed from the read cursor, and the buffer compacts
// itself once consumed bytes stop being worth keeping around.

const DEFAULT_CAPACITY: usize = 4096;
const COMPACT_THRESHOLD: usize = 4096;

pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes available to read
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Marks `n` bytes as consumed from the front of the readable region
    pub fn erase(&mut self, n: usize) {
        assert!(n <= self.readable_len(), "erase past write cursor");
        self.read_pos += n;

        if self.read_pos >= COMPACT_THRESHOLD || self.read_pos == self.write_pos {
            self.compact();
        }
    }

    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }

        self.data.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Ensures at least `additional` bytes are writable past the write cursor
    pub fn reserve(&mut self, additional: usize) {
        if self.write_pos + additional <= self.data.len() {
            return;
        }

        self.compact();

        if self.write_pos + additional > self.data.len() {
            self.data.resize(self.write_pos + additional, 0);
        }
    }

    /// Writable region a reader (e.g. a socket) can fill directly
    pub fn writable_mut(&mut self, min_len: usize) -> &mut [u8] {
        self.reserve(min_len);
        &mut self.data[self.write_pos..]
    }

    /// Advances the write cursor after bytes were written into `writable_mut`
    pub fn commit(&mut self, n: usize) {
        assert!(self.write_pos + n <= self.data.len());
        self.write_pos += n;
    }

    /// Appends bytes to the end of the buffer
    pub fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_erase_round_trip() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello world");
        assert_eq!(buf.readable(), b"hello world");

        buf.erase(6);
        assert_eq!(buf.readable(), b"world");
    }

    #[test]
    fn compacts_after_threshold() {
        let mut buf = ByteBuffer::with_capacity(16);
        buf.append(&vec![1u8; 10]);
        buf.erase(10);
        assert_eq!(buf.readable_len(), 0);

        buf.append(&vec![2u8; 10]);
        assert_eq!(buf.readable(), vec![2u8; 10].as_slice());
    }

    #[test]
    fn writable_mut_grows_buffer() {
        let mut buf = ByteBuffer::with_capacity(4);
        let slice = buf.writable_mut(10);
        assert!(slice.len() >= 10);
        slice[..3].copy_from_slice(b"abc");
        buf.commit(3);
        assert_eq!(buf.readable(), b"abc");
    }
}
