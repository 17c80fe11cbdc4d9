use super::{SaveCursor, SaveResult};

/// Growable in-memory cursor. Writes extend the buffer, reads stop at the
/// end of what was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemCursor {
    buf: Vec<u8>,
    it: usize,
}

impl MemCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            it: 0,
        }
    }

    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf, it: 0 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn position(&self) -> usize {
        self.it
    }

    /// Moves back to the start, keeping the contents for reading.
    pub fn rewind(&mut self) {
        self.it = 0;
    }

    /// Drops the contents but keeps the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.it = 0;
    }

    /// Replaces the contents with exactly `len` bytes pulled from `src` and
    /// rewinds for reading.
    pub fn fill_from(&mut self, src: &mut dyn SaveCursor, len: usize) -> SaveResult<()> {
        self.buf.clear();
        self.buf.resize(len, 0);
        self.it = 0;
        src.read_exact(&mut self.buf)
    }
}

impl SaveCursor for MemCursor {
    fn write(&mut self, src: &[u8]) -> usize {
        let end = self.it + src.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.it..end].copy_from_slice(src);
        self.it = end;
        src.len()
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(self.buf.len() - self.it);
        dst[..len].copy_from_slice(&self.buf[self.it..self.it + len]);
        self.it += len;
        len
    }

    fn len(&self) -> usize {
        self.it
    }

    fn cap(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stop_at_written_end() {
        let mut save = MemCursor::new();
        assert_eq!(save.write(b"abc"), 3);
        save.rewind();

        let mut dst = [0u8; 8];
        assert_eq!(save.read(&mut dst), 3);
        assert_eq!(&dst[..3], b"abc");
        assert_eq!(save.read(&mut dst), 0);
    }

    #[test]
    fn rewrite_after_rewind_overwrites_in_place() {
        let mut save = MemCursor::new();
        save.write(b"hello");
        save.rewind();
        save.write(b"J");
        assert_eq!(save.as_slice(), b"Jello");
    }

    #[test]
    fn fill_from_copies_exact_span() {
        let mut src = MemCursor::from_vec(b"0123456789".to_vec());
        let mut dst = MemCursor::new();
        dst.fill_from(&mut src, 4).unwrap();
        assert_eq!(dst.as_slice(), b"0123");
        assert_eq!(src.position(), 4);
        assert!(dst.fill_from(&mut src, 10).is_err());
    }
}
