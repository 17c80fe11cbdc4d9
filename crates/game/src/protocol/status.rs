use std::fmt;

use super::ProtocolError;

pub const STATUS_LEN: usize = 128;
pub const STATUS_MSG_LEN: usize = STATUS_LEN - 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusType {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl StatusType {
    pub fn level(self) -> log::Level {
        match self {
            StatusType::Info => log::Level::Info,
            StatusType::Warn => log::Level::Warn,
            StatusType::Error => log::Level::Error,
        }
    }
}

impl TryFrom<u8> for StatusType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::Info,
            1 => Self::Warn,
            2 => Self::Error,
            other => {
                return Err(ProtocolError::Invalid {
                    what: "status type",
                    value: other as u64,
                });
            }
        })
    }
}

/// Human-readable log line with a fixed 128 byte wire form. Longer messages
/// are cut on a character boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusType,
    msg: String,
}

impl Status {
    pub fn new(kind: StatusType, msg: impl Into<String>) -> Self {
        let mut msg = msg.into();
        if msg.len() > STATUS_MSG_LEN {
            let mut end = STATUS_MSG_LEN;
            while !msg.is_char_boundary(end) {
                end -= 1;
            }
            msg.truncate(end);
        }
        Self { kind, msg }
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(StatusType::Info, msg)
    }

    pub fn warn(msg: impl Into<String>) -> Self {
        Self::new(StatusType::Warn, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(StatusType::Error, msg)
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// Emits the line through the `log` facade at its own level.
    pub fn log(&self) {
        log::log!(self.kind.level(), "{}", self.msg);
    }

    pub fn encode(&self) -> [u8; STATUS_LEN] {
        let mut out = [0u8; STATUS_LEN];
        out[0] = self.kind as u8;
        out[1] = self.msg.len() as u8;
        out[2..2 + self.msg.len()].copy_from_slice(self.msg.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != STATUS_LEN {
            return Err(ProtocolError::Invalid {
                what: "status length",
                value: bytes.len() as u64,
            });
        }
        let kind = StatusType::try_from(bytes[0])?;
        let len = bytes[1] as usize;
        if len > STATUS_MSG_LEN {
            return Err(ProtocolError::Invalid {
                what: "status message length",
                value: len as u64,
            });
        }
        let msg = String::from_utf8_lossy(&bytes[2..2 + len]).into_owned();
        Ok(Self { kind, msg })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_fixed_size() {
        let status = Status::warn("ring full");
        let bytes = status.encode();
        assert_eq!(bytes.len(), STATUS_LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 9);
        assert_eq!(Status::decode(&bytes).unwrap(), status);
    }

    #[test]
    fn long_messages_are_cut_on_char_boundary() {
        let status = Status::info("é".repeat(100));
        assert!(status.msg().len() <= STATUS_MSG_LEN);
        assert_eq!(status.msg().chars().count(), STATUS_MSG_LEN / 2);
        assert_eq!(Status::decode(&status.encode()).unwrap(), status);
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(Status::decode(&[0; 12]).is_err());
    }
}
