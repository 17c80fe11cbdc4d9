mod atoms;
mod chunk;
mod coord;
mod mods;
mod universe;

pub use atoms::Atoms;
pub use chunk::{Chunk, Item};
pub use coord::{Coord, SECTOR_BITS};
pub use mods::{Mod, ModCompiler, ModEntry, ModId, ModMaj, ModVer, Mods, SourceCompiler};
pub use universe::Universe;

use crate::save::{SaveCursor, SaveResult};

pub type Tick = u64;
pub type Seed = u64;
pub type Word = u64;

/// IO codes understood by item endpoints.
pub const IO_SET: Word = 0x01;
pub const IO_RESET: Word = 0x02;

/// Authoritative simulation state. Owned by the sim thread; everything other
/// threads see of it goes through serialized snapshots.
pub trait World: Send + Sized + 'static {
    fn seed(&self) -> Seed;
    fn time(&self) -> Tick;
    fn home(&self) -> Coord;

    /// Advances the world by one tick.
    fn step(&mut self);

    fn atoms(&self) -> &Atoms;
    fn mods(&self) -> &Mods;
    fn mods_mut(&mut self) -> &mut Mods;
    fn tech(&self) -> &[Word];

    fn chunks(&self) -> impl Iterator<Item = &Chunk>;
    fn chunk(&self, coord: Coord) -> Option<&Chunk>;

    /// Sends `io` to item `dst` on the star at `star`. Returns false when
    /// there is no such star, item or io.
    fn io(&mut self, star: Coord, io: Word, dst: u32, args: &[Word]) -> bool;

    fn save(&self, save: &mut dyn SaveCursor);
    fn load(save: &mut dyn SaveCursor) -> SaveResult<Self>;
}
