use std::collections::HashMap;

use crate::save::{Magic, SaveCursor, SaveError, SaveResult};

use super::Word;

/// Interned names. Ids start at 1 so that 0 can mean "no name".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Atoms {
    names: Vec<String>,
    index: HashMap<String, Word>,
}

impl Atoms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> Word {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        self.names.push(name.to_string());
        let id = self.names.len() as Word;
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, id: Word) -> Option<&str> {
        let idx = (id as usize).checked_sub(1)?;
        self.names.get(idx).map(String::as_str)
    }

    pub fn find(&self, name: &str) -> Option<Word> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.index.clear();
    }

    fn truncate(&mut self, len: usize) {
        for name in self.names.drain(len.min(self.names.len())..) {
            self.index.remove(&name);
        }
    }

    pub fn save(&self, save: &mut dyn SaveCursor) {
        self.save_delta(save, 0);
    }

    pub fn load(save: &mut dyn SaveCursor) -> SaveResult<Self> {
        let mut atoms = Self::new();
        atoms.load_delta(save)?;
        Ok(atoms)
    }

    /// Writes every name from index `from` onwards.
    pub fn save_delta(&self, save: &mut dyn SaveCursor, from: usize) {
        let from = from.min(self.names.len());
        save.write_magic(Magic::Atoms);
        save.write_u32(from as u32);
        save.write_u32((self.names.len() - from) as u32);
        for name in &self.names[from..] {
            save.write_str(name);
        }
        save.write_magic(Magic::Atoms);
    }

    /// Applies a delta written by [`Atoms::save_delta`]. Names past the
    /// delta's start are replaced; a start beyond what we hold is a gap and
    /// rejected.
    pub fn load_delta(&mut self, save: &mut dyn SaveCursor) -> SaveResult<()> {
        save.read_magic(Magic::Atoms)?;
        let from = save.read_u32()? as usize;
        if from > self.names.len() {
            return Err(SaveError::Invalid {
                what: "atoms delta start",
                value: from as u64,
            });
        }
        self.truncate(from);

        let count = save.read_u32()?;
        for _ in 0..count {
            let name = save.read_str()?;
            self.intern(&name);
        }
        save.read_magic(Magic::Atoms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::MemCursor;

    #[test]
    fn interning_is_idempotent() {
        let mut atoms = Atoms::new();
        let a = atoms.intern("sol");
        let b = atoms.intern("vega");
        assert_eq!(atoms.intern("sol"), a);
        assert_ne!(a, b);
        assert_eq!(atoms.get(b), Some("vega"));
        assert_eq!(atoms.get(0), None);
    }

    #[test]
    fn delta_appends_to_mirror() {
        let mut atoms = Atoms::new();
        atoms.intern("a");
        atoms.intern("b");

        let mut mirror = Atoms::new();
        let mut save = MemCursor::new();
        atoms.save_delta(&mut save, 0);
        save.rewind();
        mirror.load_delta(&mut save).unwrap();

        atoms.intern("c");
        let mut save = MemCursor::new();
        atoms.save_delta(&mut save, mirror.len());
        save.rewind();
        mirror.load_delta(&mut save).unwrap();

        assert_eq!(mirror, atoms);
    }

    #[test]
    fn delta_with_gap_is_rejected() {
        let mut atoms = Atoms::new();
        for name in ["a", "b", "c"] {
            atoms.intern(name);
        }
        let mut save = MemCursor::new();
        atoms.save_delta(&mut save, 2);
        save.rewind();

        let mut mirror = Atoms::new();
        assert!(mirror.load_delta(&mut save).is_err());
    }
}
