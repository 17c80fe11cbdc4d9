use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::save::{Magic, SaveCursor};
use crate::world::{Coord, ModId, ModMaj, Tick, Word};

use super::{ProtocolError, Token, UserId};

pub const MAX_IO_ARGS: usize = 4;
pub const MAX_NAME_LEN: usize = 64;

/// Largest mod source a `ModCompile` carries. Kept well under the default
/// cmd ring so the frame always fits.
pub const MAX_SOURCE_LEN: usize = 1 << 15;

const TAG_QUIT: u8 = 0x01;
const TAG_SAVE: u8 = 0x10;
const TAG_LOAD: u8 = 0x11;
const TAG_USER: u8 = 0x12;
const TAG_AUTH: u8 = 0x13;
const TAG_ACK: u8 = 0x20;
const TAG_SPEED: u8 = 0x21;
const TAG_CHUNK: u8 = 0x22;
const TAG_MOD_SELECT: u8 = 0x30;
const TAG_MOD_REGISTER: u8 = 0x31;
const TAG_MOD_PUBLISH: u8 = 0x32;
const TAG_MOD_COMPILE: u8 = 0x33;
const TAG_IO: u8 = 0x40;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Speed {
    #[default]
    Paused = 0,
    Slow = 1,
    Fast = 2,
    Faster = 3,
    Fastest = 4,
}

impl Speed {
    pub const ALL: [Speed; 5] = [
        Speed::Paused,
        Speed::Slow,
        Speed::Fast,
        Speed::Faster,
        Speed::Fastest,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Speed::Paused => "paused",
            Speed::Slow => "slow",
            Speed::Fast => "fast",
            Speed::Faster => "faster",
            Speed::Fastest => "fastest",
        }
    }
}

impl TryFrom<u8> for Speed {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Speed::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::Invalid {
                what: "speed",
                value: value as u64,
            })
    }
}

impl FromStr for Speed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        Speed::ALL
            .into_iter()
            .find(|speed| speed.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown speed '{s}'"))
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which epoch of the selected chunk the peer holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkAck {
    pub coord: Coord,
    pub time: Tick,
}

/// Watermark of the state a peer has applied. Within one stream `time`
/// never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack {
    pub stream: u64,
    pub time: Tick,
    pub atoms: u32,
    pub chunk: ChunkAck,
}

impl Ack {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn reset_chunk(&mut self) {
        self.chunk = ChunkAck::default();
    }

    /// Moves to `time` on `stream`. A new stream restarts the watermark,
    /// otherwise the time only grows.
    pub fn advance(&mut self, stream: u64, time: Tick) {
        if stream != self.stream {
            self.reset();
            self.stream = stream;
        }
        self.time = self.time.max(time);
    }

    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::Ack);
        save.write_u64(self.stream);
        save.write_u64(self.time);
        save.write_u32(self.atoms);
        save.write_u64(self.chunk.coord.to_u64());
        save.write_u64(self.chunk.time);
        save.write_magic(Magic::Ack);
    }

    pub fn load(save: &mut dyn SaveCursor) -> Result<Self, ProtocolError> {
        save.read_magic(Magic::Ack)?;
        let ack = Self {
            stream: save.read_u64()?,
            time: save.read_u64()?,
            atoms: save.read_u32()?,
            chunk: ChunkAck {
                coord: Coord::from_u64(save.read_u64()?),
                time: save.read_u64()?,
            },
        };
        save.read_magic(Magic::Ack)?;
        Ok(ack)
    }
}

/// Mutation request for the sim. Consumed exactly once, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cmd {
    Quit,
    Save,
    Load,
    User {
        server: Token,
        name: String,
    },
    Auth {
        server: Token,
        id: UserId,
        private: Token,
    },
    Ack(Ack),
    Speed(Speed),
    Chunk(Coord),
    ModSelect(ModId),
    ModRegister(String),
    ModPublish(ModMaj),
    ModCompile {
        maj: ModMaj,
        source: String,
    },
    Io {
        io: Word,
        dst: u32,
        args: Vec<Word>,
    },
}

impl Cmd {
    pub fn name(&self) -> &'static str {
        match self {
            Cmd::Quit => "quit",
            Cmd::Save => "save",
            Cmd::Load => "load",
            Cmd::User { .. } => "user",
            Cmd::Auth { .. } => "auth",
            Cmd::Ack(_) => "ack",
            Cmd::Speed(_) => "speed",
            Cmd::Chunk(_) => "chunk",
            Cmd::ModSelect(_) => "mod",
            Cmd::ModRegister(_) => "mod-register",
            Cmd::ModPublish(_) => "mod-publish",
            Cmd::ModCompile { .. } => "mod-compile",
            Cmd::Io { .. } => "io",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Cmd::Quit => TAG_QUIT,
            Cmd::Save => TAG_SAVE,
            Cmd::Load => TAG_LOAD,
            Cmd::User { .. } => TAG_USER,
            Cmd::Auth { .. } => TAG_AUTH,
            Cmd::Ack(_) => TAG_ACK,
            Cmd::Speed(_) => TAG_SPEED,
            Cmd::Chunk(_) => TAG_CHUNK,
            Cmd::ModSelect(_) => TAG_MOD_SELECT,
            Cmd::ModRegister(_) => TAG_MOD_REGISTER,
            Cmd::ModPublish(_) => TAG_MOD_PUBLISH,
            Cmd::ModCompile { .. } => TAG_MOD_COMPILE,
            Cmd::Io { .. } => TAG_IO,
        }
    }

    /// Whether the sim accepts this cmd from a pipe that hasn't
    /// authenticated.
    pub fn is_anonymous(&self) -> bool {
        matches!(
            self,
            Cmd::User { .. } | Cmd::Auth { .. } | Cmd::Ack(_) | Cmd::Chunk(_)
        )
    }

    pub fn save(&self, save: &mut dyn SaveCursor) -> Result<(), ProtocolError> {
        save.write_magic(Magic::Cmd);
        save.write_u8(self.tag());

        match self {
            Cmd::Quit | Cmd::Save | Cmd::Load => {}
            Cmd::User { server, name } => {
                save.write_u64(*server);
                save.write_str(check_name(name)?);
            }
            Cmd::Auth {
                server,
                id,
                private,
            } => {
                save.write_u64(*server);
                save.write_u64(*id);
                save.write_u64(*private);
            }
            Cmd::Ack(ack) => ack.save(save),
            Cmd::Speed(speed) => save.write_u8(*speed as u8),
            Cmd::Chunk(coord) => save.write_u64(coord.to_u64()),
            Cmd::ModSelect(id) => save.write_u32(id.raw()),
            Cmd::ModRegister(name) => save.write_str(check_name(name)?),
            Cmd::ModPublish(maj) => save.write_u16(*maj),
            Cmd::ModCompile { maj, source } => {
                if source.len() > MAX_SOURCE_LEN {
                    return Err(ProtocolError::Invalid {
                        what: "mod source length",
                        value: source.len() as u64,
                    });
                }
                save.write_u16(*maj);
                save.write_bytes(source.as_bytes());
            }
            Cmd::Io { io, dst, args } => {
                if args.len() > MAX_IO_ARGS {
                    return Err(ProtocolError::Invalid {
                        what: "io argument count",
                        value: args.len() as u64,
                    });
                }
                save.write_magic(Magic::Io);
                save.write_u64(*io);
                save.write_u32(*dst);
                save.write_u8(args.len() as u8);
                for arg in args {
                    save.write_u64(*arg);
                }
                save.write_magic(Magic::Io);
            }
        }

        save.write_magic(Magic::Cmd);
        Ok(())
    }

    pub fn load(save: &mut dyn SaveCursor) -> Result<Self, ProtocolError> {
        save.read_magic(Magic::Cmd)?;

        let cmd = match save.read_u8()? {
            TAG_QUIT => Cmd::Quit,
            TAG_SAVE => Cmd::Save,
            TAG_LOAD => Cmd::Load,
            TAG_USER => Cmd::User {
                server: save.read_u64()?,
                name: load_name(save)?,
            },
            TAG_AUTH => Cmd::Auth {
                server: save.read_u64()?,
                id: save.read_u64()?,
                private: save.read_u64()?,
            },
            TAG_ACK => Cmd::Ack(Ack::load(save)?),
            TAG_SPEED => Cmd::Speed(Speed::try_from(save.read_u8()?)?),
            TAG_CHUNK => Cmd::Chunk(Coord::from_u64(save.read_u64()?)),
            TAG_MOD_SELECT => Cmd::ModSelect(ModId::from_raw(save.read_u32()?)),
            TAG_MOD_REGISTER => Cmd::ModRegister(load_name(save)?),
            TAG_MOD_PUBLISH => Cmd::ModPublish(save.read_u16()?),
            TAG_MOD_COMPILE => {
                let maj = save.read_u16()?;
                let source = save.read_bytes()?;
                let source = String::from_utf8(source).map_err(|err| ProtocolError::Invalid {
                    what: "mod source encoding",
                    value: err.utf8_error().valid_up_to() as u64,
                })?;
                Cmd::ModCompile { maj, source }
            }
            TAG_IO => {
                save.read_magic(Magic::Io)?;
                let io = save.read_u64()?;
                let dst = save.read_u32()?;
                let len = save.read_u8()? as usize;
                if len > MAX_IO_ARGS {
                    return Err(ProtocolError::Invalid {
                        what: "io argument count",
                        value: len as u64,
                    });
                }
                let mut args = Vec::with_capacity(len);
                for _ in 0..len {
                    args.push(save.read_u64()?);
                }
                save.read_magic(Magic::Io)?;
                Cmd::Io { io, dst, args }
            }
            other => return Err(ProtocolError::UnknownCmd(other)),
        };

        save.read_magic(Magic::Cmd)?;
        Ok(cmd)
    }
}

fn check_name(name: &str) -> Result<&str, ProtocolError> {
    if name.len() > MAX_NAME_LEN {
        return Err(ProtocolError::Invalid {
            what: "name length",
            value: name.len() as u64,
        });
    }
    Ok(name)
}

fn load_name(save: &mut dyn SaveCursor) -> Result<String, ProtocolError> {
    let name = save.read_str()?;
    check_name(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::MemCursor;

    fn reload(cmd: &Cmd) -> Result<Cmd, ProtocolError> {
        let mut save = MemCursor::new();
        cmd.save(&mut save)?;
        save.rewind();
        Cmd::load(&mut save)
    }

    #[test]
    fn variant_bodies_survive_encoding() {
        let cmds = [
            Cmd::Speed(Speed::Faster),
            Cmd::Ack(Ack {
                stream: 9,
                time: 120,
                atoms: 4,
                chunk: ChunkAck {
                    coord: Coord::new(3, 4),
                    time: 118,
                },
            }),
            Cmd::ModCompile {
                maj: 2,
                source: "(loop (mine))".to_string(),
            },
            Cmd::Io {
                io: 1,
                dst: 7,
                args: vec![1, 2, 3, 4],
            },
            Cmd::Auth {
                server: 1,
                id: 2,
                private: 3,
            },
        ];
        for cmd in &cmds {
            assert_eq!(&reload(cmd).unwrap(), cmd);
        }
    }

    #[test]
    fn io_with_too_many_args_is_refused() {
        let cmd = Cmd::Io {
            io: 1,
            dst: 1,
            args: vec![0; 5],
        };
        assert!(matches!(reload(&cmd), Err(ProtocolError::Invalid { .. })));
    }

    #[test]
    fn unknown_tag_is_a_hard_error() {
        let mut save = MemCursor::new();
        save.write_magic(Magic::Cmd);
        save.write_u8(0x7f);
        save.write_magic(Magic::Cmd);
        save.rewind();
        assert!(matches!(Cmd::load(&mut save), Err(ProtocolError::UnknownCmd(0x7f))));
    }

    #[test]
    fn ack_advance_never_regresses_within_a_stream() {
        let mut ack = Ack::default();
        ack.advance(5, 10);
        ack.advance(5, 7);
        assert_eq!((ack.stream, ack.time), (5, 10));
        ack.advance(6, 3);
        assert_eq!((ack.stream, ack.time), (6, 3));
    }

    #[test]
    fn speed_parses_case_insensitively() {
        assert_eq!("Fast".parse::<Speed>(), Ok(Speed::Fast));
        assert!("warp".parse::<Speed>().is_err());
        assert!(Speed::try_from(5).is_err());
    }
}
