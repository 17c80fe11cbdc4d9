use std::fmt;

pub const SECTOR_BITS: u32 = 16;

/// Position of a star on the galaxy grid. `(0, 0)` doubles as "no star".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    pub const NIL: Coord = Coord { x: 0, y: 0 };

    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }

    pub fn sector(self) -> Coord {
        Coord {
            x: (self.x >> SECTOR_BITS) << SECTOR_BITS,
            y: (self.y >> SECTOR_BITS) << SECTOR_BITS,
        }
    }

    pub fn to_u64(self) -> u64 {
        ((self.x as u64) << 32) | self.y as u64
    }

    pub fn from_u64(id: u64) -> Self {
        Self {
            x: (id >> 32) as u32,
            y: id as u32,
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}.{:04x}", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_x_in_the_high_word() {
        let coord = Coord::new(0x1234_5678, 0x9abc_def0);
        assert_eq!(coord.to_u64(), 0x1234_5678_9abc_def0);
        assert_eq!(Coord::from_u64(coord.to_u64()), coord);
    }

    #[test]
    fn sector_masks_low_bits() {
        let coord = Coord::new(0x0003_ffff, 0x0001_0001);
        assert_eq!(coord.sector(), Coord::new(0x0003_0000, 0x0001_0000));
    }
}
