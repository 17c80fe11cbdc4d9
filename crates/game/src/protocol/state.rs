use std::collections::BTreeMap;

use crate::save::{Magic, SaveCursor};
use crate::world::{Atoms, Chunk, Coord, ModEntry, ModId, Seed, Tick, Word, World};

use super::{Ack, ChunkAck, ProtocolError, Speed};

const CHUNK_NONE: u8 = 0;
const CHUNK_SAME: u8 = 1;
const CHUNK_FULL: u8 = 2;

const MAX_ENTRIES: u32 = 1 << 20;

/// Everything the sim needs to serialize one peer's view of the world.
pub struct StateCtx<'a, W: World> {
    pub stream: u64,
    pub speed: Speed,
    pub world: &'a W,
    pub chunk: Coord,
    pub ack: &'a Ack,
}

/// Serializes the world as seen by a peer holding `ctx.ack`: atoms past the
/// acked count, chunk names touched since the acked time and the selected
/// chunk unless its exact epoch was acked. An ack from another stream counts
/// as no ack at all.
pub fn save_state<W: World>(save: &mut dyn SaveCursor, ctx: &StateCtx<'_, W>) {
    let world = ctx.world;
    let ack = if ctx.ack.stream == ctx.stream {
        *ctx.ack
    } else {
        Ack::default()
    };

    save.write_magic(Magic::State);
    save.write_u64(ctx.stream);
    save.write_u64(world.seed());
    save.write_u64(world.time());
    save.write_u8(ctx.speed as u8);
    save.write_u64(world.home().to_u64());

    world.atoms().save_delta(save, ack.atoms as usize);

    let mods = world.mods().list();
    save.write_magic(Magic::Mods);
    save.write_u32(mods.len() as u32);
    for entry in &mods {
        save.write_u32(entry.id.raw());
        save.write_str(&entry.name);
    }
    save.write_magic(Magic::Mods);

    save.write_magic(Magic::Tech);
    save.write_u32(world.tech().len() as u32);
    for &tech in world.tech() {
        save.write_u64(tech);
    }
    save.write_magic(Magic::Tech);

    let touched: Vec<&Chunk> = world
        .chunks()
        .filter(|chunk| chunk.updated >= ack.time)
        .collect();
    save.write_magic(Magic::Chunks);
    save.write_u32(touched.len() as u32);
    for chunk in touched {
        save.write_u64(chunk.coord.to_u64());
        save.write_u64(chunk.name);
        save.write_u64(chunk.updated);
    }
    save.write_magic(Magic::Chunks);

    save.write_magic(Magic::StateChunk);
    save.write_u64(ctx.chunk.to_u64());
    match world.chunk(ctx.chunk) {
        None => save.write_u8(CHUNK_NONE),
        Some(chunk) if ack.chunk.coord == ctx.chunk && ack.chunk.time == chunk.updated => {
            save.write_u8(CHUNK_SAME)
        }
        Some(chunk) => {
            save.write_u8(CHUNK_FULL);
            chunk.save(save);
        }
    }
    save.write_magic(Magic::StateChunk);

    save.write_magic(Magic::State);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkName {
    pub name: Word,
    pub updated: Tick,
}

/// Outcome of applying a state message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// The stream changed and the mirror was rebuilt from scratch.
    pub reset: bool,
    /// Stars whose name entries arrived in this message.
    pub changed: Vec<Coord>,
}

/// Client-side mirror of server-confirmed state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub stream: u64,
    pub seed: Seed,
    pub time: Tick,
    pub speed: Speed,
    pub home: Coord,
    pub atoms: Atoms,
    pub mods: Vec<ModEntry>,
    pub tech: Vec<Word>,
    pub chunks: BTreeMap<Coord, ChunkName>,
    pub chunk: Option<Chunk>,
}

impl State {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Applies one state message and moves `ack` to the applied watermark.
    ///
    /// A message that fails to parse leaves `ack` where it was. The next
    /// message is a delta against that ack and overwrites whatever was
    /// partially applied; a mirror left on another stream is cleared.
    pub fn load(
        &mut self,
        save: &mut dyn SaveCursor,
        ack: &mut Ack,
    ) -> Result<StateUpdate, ProtocolError> {
        let acked = *ack;
        let result = self.load_inner(save, ack);
        if result.is_err() {
            *ack = acked;
            if self.stream != ack.stream {
                self.clear();
            }
        }
        result
    }

    fn load_inner(
        &mut self,
        save: &mut dyn SaveCursor,
        ack: &mut Ack,
    ) -> Result<StateUpdate, ProtocolError> {
        save.read_magic(Magic::State)?;

        let stream = save.read_u64()?;
        let reset = stream != self.stream || stream != ack.stream;
        if reset {
            self.clear();
            ack.reset();
        }

        self.stream = stream;
        self.seed = save.read_u64()?;
        self.time = save.read_u64()?;
        self.speed = Speed::try_from(save.read_u8()?)?;
        self.home = Coord::from_u64(save.read_u64()?);

        self.atoms.load_delta(save)?;

        save.read_magic(Magic::Mods)?;
        let len = bounded(save.read_u32()?, "mod count")?;
        self.mods.clear();
        for _ in 0..len {
            let id = ModId::from_raw(save.read_u32()?);
            let name = save.read_str()?;
            self.mods.push(ModEntry { id, name });
        }
        save.read_magic(Magic::Mods)?;

        save.read_magic(Magic::Tech)?;
        let len = bounded(save.read_u32()?, "tech count")?;
        self.tech.clear();
        for _ in 0..len {
            self.tech.push(save.read_u64()?);
        }
        save.read_magic(Magic::Tech)?;

        save.read_magic(Magic::Chunks)?;
        let len = bounded(save.read_u32()?, "chunk count")?;
        let mut changed = Vec::with_capacity(len as usize);
        for _ in 0..len {
            let coord = Coord::from_u64(save.read_u64()?);
            let name = save.read_u64()?;
            let updated = save.read_u64()?;
            self.chunks.insert(coord, ChunkName { name, updated });
            changed.push(coord);
        }
        save.read_magic(Magic::Chunks)?;

        save.read_magic(Magic::StateChunk)?;
        let coord = Coord::from_u64(save.read_u64()?);
        match save.read_u8()? {
            CHUNK_NONE => self.chunk = None,
            CHUNK_SAME => {
                if self.chunk.as_ref().map(|chunk| chunk.coord) != Some(coord) {
                    return Err(ProtocolError::Invalid {
                        what: "unchanged chunk we don't hold",
                        value: coord.to_u64(),
                    });
                }
            }
            CHUNK_FULL => self.chunk = Some(Chunk::load(save)?),
            other => {
                return Err(ProtocolError::Invalid {
                    what: "chunk flag",
                    value: other as u64,
                });
            }
        }
        save.read_magic(Magic::StateChunk)?;
        save.read_magic(Magic::State)?;

        ack.advance(stream, self.time);
        ack.atoms = self.atoms.len() as u32;
        ack.chunk = match &self.chunk {
            Some(chunk) => ChunkAck {
                coord: chunk.coord,
                time: chunk.updated,
            },
            None => ChunkAck::default(),
        };

        Ok(StateUpdate { reset, changed })
    }
}

fn bounded(value: u32, what: &'static str) -> Result<u32, ProtocolError> {
    if value > MAX_ENTRIES {
        return Err(ProtocolError::Invalid {
            what,
            value: value as u64,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::MemCursor;
    use crate::world::Universe;

    fn publish(world: &Universe, stream: u64, chunk: Coord, ack: &Ack) -> MemCursor {
        let mut save = MemCursor::new();
        save_state(
            &mut save,
            &StateCtx {
                stream,
                speed: Speed::Slow,
                world,
                chunk,
                ack,
            },
        );
        save.rewind();
        save
    }

    #[test]
    fn first_message_is_a_full_reset() {
        let world = Universe::new(1);
        let mut state = State::default();
        let mut ack = Ack::default();

        let mut save = publish(&world, 7, world.home(), &ack);
        let update = state.load(&mut save, &mut ack).unwrap();

        assert!(update.reset);
        assert_eq!(update.changed.len(), world.chunks().count());
        assert_eq!(state.atoms, *world.atoms());
        assert_eq!(state.chunk.as_ref(), world.chunk(world.home()));
        assert_eq!(state.speed, Speed::Slow);
        assert_eq!(ack.stream, 7);
        assert_eq!(ack.atoms as usize, world.atoms().len());
    }

    #[test]
    fn acked_chunk_epoch_is_not_resent() {
        let mut world = Universe::new(1);
        let mut state = State::default();
        let mut ack = Ack::default();
        let home = world.home();

        let mut save = publish(&world, 7, home, &ack);
        state.load(&mut save, &mut ack).unwrap();
        let full_len = save.cap();

        let mut save = publish(&world, 7, home, &ack);
        let update = state.load(&mut save, &mut ack).unwrap();
        assert!(!update.reset);
        assert!(save.cap() < full_len);
        assert_eq!(state.chunk.as_ref(), world.chunk(home));

        assert!(world.io(home, crate::world::IO_SET, 1, &[42]));
        let mut save = publish(&world, 7, home, &ack);
        state.load(&mut save, &mut ack).unwrap();
        assert_eq!(state.chunk.as_ref().unwrap().item(1).unwrap().state, 42);
    }

    #[test]
    fn stream_change_resets_the_mirror() {
        let world = Universe::new(1);
        let other = Universe::new(2);
        let mut state = State::default();
        let mut ack = Ack::default();

        let mut save = publish(&world, 7, Coord::NIL, &ack);
        state.load(&mut save, &mut ack).unwrap();

        let mut save = publish(&other, 8, Coord::NIL, &ack);
        let update = state.load(&mut save, &mut ack).unwrap();
        assert!(update.reset);
        assert_eq!(state.home, other.home());
        assert_eq!(state.chunks.len(), other.chunks().count());
        assert!(state.chunks.keys().all(|coord| other.chunk(*coord).is_some()));
    }

    #[test]
    fn truncated_first_message_leaves_an_empty_mirror() {
        let world = Universe::new(1);
        let mut state = State::default();
        let mut ack = Ack::default();

        let save = publish(&world, 7, Coord::NIL, &ack);
        let mut bytes = save.into_inner();
        bytes.truncate(bytes.len() / 2);
        let mut save = MemCursor::from_vec(bytes);

        assert!(state.load(&mut save, &mut ack).is_err());
        assert_eq!(ack, Ack::default());
        assert_eq!(state, State::default());
    }

    #[test]
    fn truncated_delta_keeps_the_ack_and_heals() {
        let mut world = Universe::new(1);
        let mut state = State::default();
        let mut ack = Ack::default();
        let mut save = publish(&world, 7, Coord::NIL, &ack);
        state.load(&mut save, &mut ack).unwrap();
        let good = ack;

        for _ in 0..3 {
            world.step();
        }
        let mut bytes = publish(&world, 7, Coord::NIL, &ack).into_inner();
        bytes.truncate(bytes.len() - 4);
        let mut save = MemCursor::from_vec(bytes);
        assert!(state.load(&mut save, &mut ack).is_err());
        assert_eq!(ack, good);

        let mut save = publish(&world, 7, Coord::NIL, &ack);
        let update = state.load(&mut save, &mut ack).unwrap();
        assert!(!update.reset);
        assert_eq!(state.time, world.time());
        assert_eq!(ack.time, world.time());
        assert!(ack.time > good.time);
    }
}
