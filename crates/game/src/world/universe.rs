use std::collections::BTreeMap;

use crate::save::{Magic, SaveCursor, SaveError, SaveResult};

use super::{
    Atoms, Chunk, Coord, IO_RESET, IO_SET, Item, Mods, Seed, Tick, Word, World,
};

const STARS: usize = 16;
const ITEMS_PER_STAR: u32 = 4;
const SPREAD: u32 = 0x0004_0000;
const UPDATE_PERIOD: u64 = 16;
const MAX_CHUNKS: u32 = 1 << 20;
const MAX_TECH: u32 = 1 << 16;

const NAMES: [&str; 8] = [
    "sol", "vega", "rigel", "deneb", "altair", "antares", "mira", "castor",
];

/// Small deterministic world: a handful of stars around a home star whose
/// item counters tick over at staggered intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    seed: Seed,
    time: Tick,
    home: Coord,
    atoms: Atoms,
    mods: Mods,
    tech: Vec<Word>,
    chunks: BTreeMap<Coord, Chunk>,
}

impl Universe {
    pub fn new(seed: Seed) -> Self {
        let mut rng = seed;
        let origin = 0x4000_0000;
        let home = Coord::new(
            origin + (splitmix(&mut rng) as u32 % SPREAD),
            origin + (splitmix(&mut rng) as u32 % SPREAD),
        );

        let mut atoms = Atoms::new();
        let mut chunks = BTreeMap::new();
        for i in 0..STARS {
            let coord = if i == 0 {
                home
            } else {
                Coord::new(
                    origin + (splitmix(&mut rng) as u32 % (SPREAD * 4)),
                    origin + (splitmix(&mut rng) as u32 % (SPREAD * 4)),
                )
            };
            let name = format!("{}-{}", NAMES[i % NAMES.len()], i);
            let mut chunk = Chunk::new(coord, atoms.intern(&name));
            chunk.items = (1..=ITEMS_PER_STAR)
                .map(|id| Item { id, state: 0 })
                .collect();
            chunks.insert(coord, chunk);
        }

        Self {
            seed,
            time: 0,
            home,
            atoms,
            mods: Mods::new(),
            tech: Vec::new(),
            chunks,
        }
    }

    pub fn learn(&mut self, tech: Word) {
        if !self.tech.contains(&tech) {
            self.tech.push(tech);
        }
    }
}

impl World for Universe {
    fn seed(&self) -> Seed {
        self.seed
    }

    fn time(&self) -> Tick {
        self.time
    }

    fn home(&self) -> Coord {
        self.home
    }

    fn step(&mut self) {
        self.time += 1;
        for chunk in self.chunks.values_mut() {
            if (chunk.coord.to_u64() ^ self.seed).wrapping_add(self.time) % UPDATE_PERIOD != 0 {
                continue;
            }
            for item in &mut chunk.items {
                item.state = item.state.wrapping_add(1);
            }
            chunk.touch(self.time);
        }
    }

    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn mods(&self) -> &Mods {
        &self.mods
    }

    fn mods_mut(&mut self) -> &mut Mods {
        &mut self.mods
    }

    fn tech(&self) -> &[Word] {
        &self.tech
    }

    fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    fn chunk(&self, coord: Coord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    fn io(&mut self, star: Coord, io: Word, dst: u32, args: &[Word]) -> bool {
        let time = self.time;
        let Some(chunk) = self.chunks.get_mut(&star) else {
            return false;
        };
        let Some(item) = chunk.item_mut(dst) else {
            return false;
        };
        match io {
            IO_SET => item.state = args.first().copied().unwrap_or(0),
            IO_RESET => item.state = 0,
            _ => return false,
        }
        chunk.touch(time);
        true
    }

    fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::World);
        save.write_u64(self.seed);
        save.write_u64(self.time);
        save.write_u64(self.home.to_u64());
        self.atoms.save(save);
        self.mods.save(save);

        save.write_magic(Magic::Tech);
        save.write_u32(self.tech.len() as u32);
        for &tech in &self.tech {
            save.write_u64(tech);
        }
        save.write_magic(Magic::Tech);

        save.write_magic(Magic::Chunks);
        save.write_u32(self.chunks.len() as u32);
        for chunk in self.chunks.values() {
            chunk.save(save);
        }
        save.write_magic(Magic::Chunks);
        save.write_magic(Magic::World);
    }

    fn load(save: &mut dyn SaveCursor) -> SaveResult<Self> {
        save.read_magic(Magic::World)?;
        let seed = save.read_u64()?;
        let time = save.read_u64()?;
        let home = Coord::from_u64(save.read_u64()?);
        let atoms = Atoms::load(save)?;
        let mods = Mods::load(save)?;

        save.read_magic(Magic::Tech)?;
        let len = bounded(save.read_u32()?, MAX_TECH, "tech count")?;
        let mut tech = Vec::with_capacity(len as usize);
        for _ in 0..len {
            tech.push(save.read_u64()?);
        }
        save.read_magic(Magic::Tech)?;

        save.read_magic(Magic::Chunks)?;
        let len = bounded(save.read_u32()?, MAX_CHUNKS, "chunk count")?;
        let mut chunks = BTreeMap::new();
        for _ in 0..len {
            let chunk = Chunk::load(save)?;
            chunks.insert(chunk.coord, chunk);
        }
        save.read_magic(Magic::Chunks)?;
        save.read_magic(Magic::World)?;

        Ok(Self {
            seed,
            time,
            home,
            atoms,
            mods,
            tech,
            chunks,
        })
    }
}

fn bounded(value: u32, max: u32, what: &'static str) -> SaveResult<u32> {
    if value > max {
        return Err(SaveError::Invalid {
            what,
            value: value as u64,
        });
    }
    Ok(value)
}

fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
