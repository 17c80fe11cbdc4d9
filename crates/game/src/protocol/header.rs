use super::ProtocolError;

pub const HEADER_MAGIC: u32 = 0xF0FC_CF0F;
pub const HEADER_LEN: usize = 8;
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HeaderType {
    Cmd = 1,
    State = 2,
    Status = 3,
    User = 4,
    Mod = 5,
}

impl TryFrom<u8> for HeaderType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            1 => Self::Cmd,
            2 => Self::State,
            3 => Self::Status,
            4 => Self::User,
            5 => Self::Mod,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

/// Frame descriptor: magic in the low 32 bits, type in the next 8 and the
/// payload length in the top 24, stored little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: HeaderType,
    pub len: u32,
}

impl Header {
    pub fn new(kind: HeaderType, len: usize) -> Result<Self, ProtocolError> {
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        Ok(Self {
            kind,
            len: len as u32,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let word = HEADER_MAGIC as u64 | (self.kind as u64) << 32 | (self.len as u64) << 40;
        word.to_le_bytes()
    }

    /// Magic is validated before anything else so a desynchronized stream
    /// never yields a trusted length.
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let word = u64::from_le_bytes(bytes);
        let magic = word as u32;
        if magic != HEADER_MAGIC {
            return Err(ProtocolError::BadMagic { found: magic });
        }
        Ok(Self {
            kind: HeaderType::try_from((word >> 32) as u8)?,
            len: (word >> 40) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KINDS: [HeaderType; 5] = [
        HeaderType::Cmd,
        HeaderType::State,
        HeaderType::Status,
        HeaderType::User,
        HeaderType::Mod,
    ];

    #[test]
    fn header_round_trip_over_length_edges() {
        for kind in KINDS {
            for len in [0, 1, 127, 128, 0xFFFF, 0x10000, MAX_FRAME_LEN - 1, MAX_FRAME_LEN] {
                let header = Header::new(kind, len).unwrap();
                assert_eq!(Header::decode(header.encode()).unwrap(), header);
            }
        }
    }

    #[test]
    fn magic_sits_in_the_first_four_bytes() {
        let bytes = Header::new(HeaderType::State, 3).unwrap().encode();
        assert_eq!(&bytes[..4], &HEADER_MAGIC.to_le_bytes());
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..], &[3, 0, 0]);
    }

    #[test]
    fn oversized_len_is_refused() {
        assert!(matches!(
            Header::new(HeaderType::Cmd, MAX_FRAME_LEN + 1),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn bad_magic_and_type_are_rejected() {
        let mut bytes = Header::new(HeaderType::Cmd, 4).unwrap().encode();
        bytes[0] ^= 0xff;
        assert!(matches!(Header::decode(bytes), Err(ProtocolError::BadMagic { .. })));

        let mut bytes = Header::new(HeaderType::Cmd, 4).unwrap().encode();
        bytes[4] = 9;
        assert!(matches!(Header::decode(bytes), Err(ProtocolError::UnknownType(9))));
    }
}
