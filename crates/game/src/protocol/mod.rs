mod cmd;
mod frame;
mod header;
mod program;
mod state;
mod status;
mod user;

pub use cmd::{Ack, ChunkAck, Cmd, MAX_IO_ARGS, MAX_NAME_LEN, MAX_SOURCE_LEN, Speed};
pub use frame::{append_frame, next_frame, read_frame, write_frame};
pub use header::{HEADER_LEN, HEADER_MAGIC, Header, HeaderType, MAX_FRAME_LEN};
pub use program::{ModFrame, ModKind};
pub use state::{ChunkName, State, StateCtx, StateUpdate, save_state};
pub use status::{STATUS_LEN, STATUS_MSG_LEN, Status, StatusType};
pub use user::{Credentials, Token, UserId};

use crate::save::SaveError;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid header magic: 0x{found:08x}")]
    BadMagic { found: u32 },
    #[error("unknown header type: {0}")]
    UnknownType(u8),
    #[error("unknown cmd tag: 0x{0:02x}")]
    UnknownCmd(u8),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("invalid {what}: {value}")]
    Invalid { what: &'static str, value: u64 },
    #[error(transparent)]
    Save(#[from] SaveError),
}
