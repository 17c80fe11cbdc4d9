mod file;
mod mem;
mod ring;

pub use file::{SAVE_VERSION, SaveFile};
pub use mem::MemCursor;
pub use ring::{ReadCursor, RingReader, RingWriter, SaveRing, Wake, WriteCursor};

/// One-byte structural tags written between sections so a reader can tell
/// a corrupted or misaligned stream from a valid one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    Sim = 0x10,
    World = 0x11,
    Tech = 0x14,
    Atoms = 0x20,
    Mods = 0x21,
    Mod = 0x22,
    Chunks = 0x28,
    Chunk = 0x29,
    State = 0x30,
    StateChunk = 0x33,
    Status = 0x38,
    Cmd = 0x39,
    Ack = 0x3A,
    User = 0x3B,
    Io = 0x3C,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of save: {missing} bytes missing")]
    Eof { missing: usize },
    #[error("magic mismatch: expected {expected:?}, found 0x{found:02x}")]
    Magic { expected: Magic, found: u8 },
    #[error("unsupported save version {found}, expected {expected}")]
    Version { expected: u8, found: u8 },
    #[error("not a save file")]
    NotSave,
    #[error("save file was never sealed")]
    Unsealed,
    #[error("invalid {what}: {value}")]
    Invalid { what: &'static str, value: u64 },
}

pub type SaveResult<T> = Result<T, SaveError>;

/// Byte cursor shared by the memory, file and ring backings.
///
/// Writes that don't fit are truncated rather than overrunning; callers that
/// need all-or-nothing semantics check [`SaveCursor::remaining`] first.
pub trait SaveCursor {
    /// Writes as much of `src` as fits and returns the number of bytes written.
    fn write(&mut self, src: &[u8]) -> usize;

    /// Reads up to `dst.len()` bytes and returns the number of bytes read.
    fn read(&mut self, dst: &mut [u8]) -> usize;

    /// Bytes written or read through this cursor so far.
    fn len(&self) -> usize;

    /// Total span of the cursor.
    fn cap(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remaining(&self) -> usize {
        self.cap().saturating_sub(self.len())
    }

    fn eof(&self) -> bool {
        self.remaining() == 0
    }

    fn write_u8(&mut self, value: u8) {
        self.write(&[value]);
    }

    fn write_u16(&mut self, value: u16) {
        self.write(&value.to_le_bytes());
    }

    fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    fn write_magic(&mut self, magic: Magic) {
        self.write_u8(magic as u8);
    }

    /// Short string with a u16 length prefix. Longer strings are cut on a
    /// char boundary.
    fn write_str(&mut self, value: &str) {
        let mut len = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        self.write_u16(len as u16);
        self.write(&value.as_bytes()[..len]);
    }

    /// Blob with a u32 length prefix.
    fn write_bytes(&mut self, value: &[u8]) {
        let len = value.len().min(u32::MAX as usize);
        self.write_u32(len as u32);
        self.write(&value[..len]);
    }

    fn read_exact(&mut self, dst: &mut [u8]) -> SaveResult<()> {
        let read = self.read(dst);
        if read != dst.len() {
            return Err(SaveError::Eof {
                missing: dst.len() - read,
            });
        }
        Ok(())
    }

    fn read_u8(&mut self) -> SaveResult<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> SaveResult<u16> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> SaveResult<u32> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> SaveResult<u64> {
        let mut buf = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_magic(&mut self, expected: Magic) -> SaveResult<()> {
        let found = self.read_u8()?;
        if found != expected as u8 {
            return Err(SaveError::Magic { expected, found });
        }
        Ok(())
    }

    fn read_str(&mut self) -> SaveResult<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_vec(len)?;
        String::from_utf8(bytes).map_err(|err| SaveError::Invalid {
            what: "utf-8 string",
            value: err.utf8_error().valid_up_to() as u64,
        })
    }

    fn read_bytes(&mut self) -> SaveResult<Vec<u8>> {
        let len = self.read_u32()? as usize;
        self.read_vec(len)
    }

    /// Reads exactly `len` bytes, refusing lengths the cursor can't hold so a
    /// corrupted prefix never triggers a huge allocation.
    fn read_vec(&mut self, len: usize) -> SaveResult<Vec<u8>> {
        if len > self.remaining() {
            return Err(SaveError::Eof {
                missing: len - self.remaining(),
            });
        }
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}
