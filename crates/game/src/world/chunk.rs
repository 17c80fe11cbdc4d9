use crate::save::{Magic, SaveCursor, SaveError, SaveResult};

use super::{Coord, Tick, Word};

const MAX_ITEMS: u32 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub id: u32,
    pub state: Word,
}

/// Contents of one star. `updated` is the tick of the last change and acts
/// as the chunk's epoch when acknowledging it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub coord: Coord,
    pub name: Word,
    pub updated: Tick,
    pub items: Vec<Item>,
}

impl Chunk {
    pub fn new(coord: Coord, name: Word) -> Self {
        Self {
            coord,
            name,
            updated: 0,
            items: Vec::new(),
        }
    }

    pub fn item(&self, id: u32) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: u32) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Records a change at `now`. Two changes within one tick still yield
    /// distinct epochs.
    pub fn touch(&mut self, now: Tick) {
        self.updated = (self.updated + 1).max(now);
    }

    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::Chunk);
        save.write_u64(self.coord.to_u64());
        save.write_u64(self.name);
        save.write_u64(self.updated);
        save.write_u32(self.items.len() as u32);
        for item in &self.items {
            save.write_u32(item.id);
            save.write_u64(item.state);
        }
        save.write_magic(Magic::Chunk);
    }

    pub fn load(save: &mut dyn SaveCursor) -> SaveResult<Self> {
        save.read_magic(Magic::Chunk)?;
        let coord = Coord::from_u64(save.read_u64()?);
        let name = save.read_u64()?;
        let updated = save.read_u64()?;

        let len = save.read_u32()?;
        if len > MAX_ITEMS {
            return Err(SaveError::Invalid {
                what: "chunk item count",
                value: len as u64,
            });
        }
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(Item {
                id: save.read_u32()?,
                state: save.read_u64()?,
            });
        }

        save.read_magic(Magic::Chunk)?;
        Ok(Self {
            coord,
            name,
            updated,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_is_strictly_increasing() {
        let mut chunk = Chunk::new(Coord::new(1, 1), 1);
        chunk.touch(10);
        assert_eq!(chunk.updated, 10);
        chunk.touch(10);
        assert_eq!(chunk.updated, 11);
        chunk.touch(30);
        assert_eq!(chunk.updated, 30);
    }
}
