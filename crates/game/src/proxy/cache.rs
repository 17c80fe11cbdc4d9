use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::protocol::ChunkName;
use crate::world::Coord;

/// Stars of the mirror grouped by sector, built lazily on lookup.
#[derive(Debug, Default)]
pub struct SectorCache {
    sectors: HashMap<Coord, Vec<Coord>>,
}

impl SectorCache {
    pub fn clear(&mut self) {
        self.sectors.clear();
    }

    /// Drops the sectors holding any of `changed`.
    pub fn evict(&mut self, changed: &[Coord]) {
        for coord in changed {
            self.sectors.remove(&coord.sector());
        }
    }

    pub fn is_cached(&self, sector: Coord) -> bool {
        self.sectors.contains_key(&sector.sector())
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Stars in the sector containing `coord`.
    pub fn get(&mut self, coord: Coord, chunks: &BTreeMap<Coord, ChunkName>) -> &[Coord] {
        let sector = coord.sector();
        self.sectors.entry(sector).or_insert_with(|| {
            chunks
                .keys()
                .copied()
                .filter(|star| star.sector() == sector)
                .collect()
        })
    }
}

/// Sectors holding at least one known star.
pub fn active_sectors(chunks: &BTreeMap<Coord, ChunkName>) -> BTreeSet<Coord> {
    chunks.keys().map(|star| star.sector()).collect()
}
