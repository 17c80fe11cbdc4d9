use crate::save::{MemCursor, RingReader, RingWriter, SaveCursor};

use super::{HEADER_LEN, Header, HeaderType, ProtocolError};

/// Writes header and payload into the ring as one unit. Returns `Ok(false)`
/// without writing anything when the frame doesn't fit yet, and an error
/// when it could never fit.
pub fn write_frame(
    ring: &mut RingWriter,
    kind: HeaderType,
    payload: &[u8],
) -> Result<bool, ProtocolError> {
    let header = Header::new(kind, payload.len())?;
    check_fits(payload.len(), ring.capacity())?;
    let mut cursor = ring.write();
    if cursor.remaining() < HEADER_LEN + payload.len() {
        return Ok(false);
    }
    cursor.write(&header.encode());
    cursor.write(payload);
    cursor.commit();
    Ok(true)
}

/// Appends a frame to an in-memory stream.
pub fn append_frame(
    out: &mut MemCursor,
    kind: HeaderType,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let header = Header::new(kind, payload.len())?;
    out.write(&header.encode());
    out.write(payload);
    Ok(())
}

/// Parses the next frame from `src` into `payload`.
///
/// Returns `Ok(None)` while the frame is incomplete; what was read from `src`
/// in that case must be discarded by the caller so the header is parsed
/// again once more bytes arrive.
pub fn next_frame(
    src: &mut dyn SaveCursor,
    payload: &mut MemCursor,
) -> Result<Option<Header>, ProtocolError> {
    parse_frame(src, payload, None)
}

/// Pops one complete frame off the ring. Nothing is retired unless a whole
/// frame was read. A header announcing more than the ring can ever hold is
/// an error: that frame would never complete.
pub fn read_frame(
    ring: &mut RingReader,
    payload: &mut MemCursor,
) -> Result<Option<Header>, ProtocolError> {
    let capacity = ring.capacity();
    let mut cursor = ring.read();
    let header = parse_frame(&mut cursor, payload, Some(capacity))?;
    if header.is_some() {
        cursor.commit();
    }
    Ok(header)
}

fn check_fits(len: usize, capacity: usize) -> Result<(), ProtocolError> {
    if HEADER_LEN + len > capacity {
        return Err(ProtocolError::FrameTooLarge {
            len: HEADER_LEN + len,
            max: capacity,
        });
    }
    Ok(())
}

fn parse_frame(
    src: &mut dyn SaveCursor,
    payload: &mut MemCursor,
    capacity: Option<usize>,
) -> Result<Option<Header>, ProtocolError> {
    if src.remaining() < HEADER_LEN {
        return Ok(None);
    }
    let mut bytes = [0u8; HEADER_LEN];
    src.read_exact(&mut bytes)?;
    let header = Header::decode(bytes)?;
    if let Some(capacity) = capacity {
        check_fits(header.len as usize, capacity)?;
    }

    if src.remaining() < header.len as usize {
        return Ok(None);
    }
    payload.fill_from(src, header.len as usize)?;
    Ok(Some(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::SaveRing;

    #[test]
    fn partial_frame_is_not_consumed() {
        let (mut tx, mut rx) = SaveRing::new(64);
        let header = Header::new(HeaderType::Cmd, 6).unwrap();

        let mut cursor = tx.write();
        cursor.write(&header.encode());
        cursor.write(b"abc");
        cursor.commit();

        let mut payload = MemCursor::new();
        assert!(read_frame(&mut rx, &mut payload).unwrap().is_none());
        assert_eq!(rx.len(), HEADER_LEN + 3);

        let mut cursor = tx.write();
        cursor.write(b"def");
        cursor.commit();

        let parsed = read_frame(&mut rx, &mut payload).unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload.as_slice(), b"abcdef");
        assert!(rx.is_empty());
    }

    #[test]
    fn frame_that_does_not_fit_is_deferred() {
        let (mut tx, _rx) = SaveRing::new(16);
        assert!(write_frame(&mut tx, HeaderType::Status, &[0; 8]).unwrap());
        assert!(!write_frame(&mut tx, HeaderType::Status, &[0; 1]).unwrap());
        assert_eq!(tx.len(), 16);
    }

    #[test]
    fn frame_longer_than_the_ring_is_refused() {
        let (mut tx, mut rx) = SaveRing::new(64);
        assert!(matches!(
            write_frame(&mut tx, HeaderType::Cmd, &[0; 57]),
            Err(ProtocolError::FrameTooLarge { len: 65, max: 64 })
        ));
        assert!(tx.is_empty());
        assert!(write_frame(&mut tx, HeaderType::Cmd, &[0; 56]).unwrap());

        let mut payload = MemCursor::new();
        assert!(read_frame(&mut rx, &mut payload).unwrap().is_some());

        // A header that promises more than the ring holds, followed by
        // enough filler to fill it up.
        let header = Header::new(HeaderType::Cmd, 1000).unwrap();
        let mut cursor = tx.write();
        cursor.write(&header.encode());
        cursor.write(&[0; 56]);
        cursor.commit();
        assert_eq!(tx.free(), 0);
        assert!(matches!(
            read_frame(&mut rx, &mut payload),
            Err(ProtocolError::FrameTooLarge { len: 1008, max: 64 })
        ));
    }

    #[test]
    fn bad_magic_surfaces_and_retires_nothing() {
        let (mut tx, mut rx) = SaveRing::new(32);
        let mut cursor = tx.write();
        cursor.write(&[0xAA; 12]);
        cursor.commit();

        let mut payload = MemCursor::new();
        assert!(matches!(
            read_frame(&mut rx, &mut payload),
            Err(ProtocolError::BadMagic { found: 0xAAAA_AAAA })
        ));
        assert_eq!(rx.len(), 12);
    }

    #[test]
    fn memory_stream_holds_several_frames() {
        let mut stream = MemCursor::new();
        append_frame(&mut stream, HeaderType::State, b"state").unwrap();
        append_frame(&mut stream, HeaderType::Mod, b"mod").unwrap();
        stream.rewind();

        let mut payload = MemCursor::new();
        let first = next_frame(&mut stream, &mut payload).unwrap().unwrap();
        assert_eq!((first.kind, payload.as_slice()), (HeaderType::State, &b"state"[..]));
        let second = next_frame(&mut stream, &mut payload).unwrap().unwrap();
        assert_eq!((second.kind, payload.as_slice()), (HeaderType::Mod, &b"mod"[..]));
        assert!(next_frame(&mut stream, &mut payload).unwrap().is_none());
    }
}
