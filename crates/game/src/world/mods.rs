use std::collections::BTreeMap;
use std::fmt;

use crate::save::{Magic, SaveCursor, SaveError, SaveResult};

pub type ModMaj = u16;
pub type ModVer = u16;

const MAX_BYTECODE: usize = 1 << 20;

/// Major/version pair packed into 32 bits. Version 0 names a compile
/// candidate that hasn't been published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModId(u32);

impl ModId {
    pub const fn new(maj: ModMaj, ver: ModVer) -> Self {
        Self(((maj as u32) << 16) | ver as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn maj(self) -> ModMaj {
        (self.0 >> 16) as ModMaj
    }

    pub const fn ver(self) -> ModVer {
        self.0 as ModVer
    }
}

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.maj(), self.ver())
    }
}

/// Compiled program. Opaque to everything but the scripting runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    pub id: ModId,
    pub errors: u32,
    pub bytecode: Vec<u8>,
}

impl Mod {
    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::Mod);
        save.write_u32(self.id.raw());
        save.write_u32(self.errors);
        save.write_bytes(&self.bytecode);
        save.write_magic(Magic::Mod);
    }

    pub fn load(save: &mut dyn SaveCursor) -> SaveResult<Self> {
        save.read_magic(Magic::Mod)?;
        let id = ModId::from_raw(save.read_u32()?);
        let errors = save.read_u32()?;
        let bytecode = save.read_bytes()?;
        if bytecode.len() > MAX_BYTECODE {
            return Err(SaveError::Invalid {
                what: "mod bytecode length",
                value: bytecode.len() as u64,
            });
        }
        save.read_magic(Magic::Mod)?;
        Ok(Self {
            id,
            errors,
            bytecode,
        })
    }
}

/// Summary line of a registered mod: its latest published id and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModEntry {
    pub id: ModId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModSlot {
    name: String,
    versions: Vec<Mod>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mods {
    slots: BTreeMap<ModMaj, ModSlot>,
}

impl Mods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a major for `name`. Fails if the name is taken or every
    /// major is in use.
    pub fn register(&mut self, name: &str) -> Option<ModId> {
        if name.is_empty() || self.find(name).is_some() {
            return None;
        }
        let maj = match self.slots.last_key_value() {
            Some((&last, _)) => last.checked_add(1)?,
            None => 1,
        };
        self.slots.insert(
            maj,
            ModSlot {
                name: name.to_string(),
                versions: Vec::new(),
            },
        );
        Some(ModId::new(maj, 0))
    }

    /// Stores `module` as the next version of its major.
    pub fn publish(&mut self, mut module: Mod) -> Option<ModId> {
        let slot = self.slots.get_mut(&module.id.maj())?;
        let ver = ModVer::try_from(slot.versions.len() + 1).ok()?;
        module.id = ModId::new(module.id.maj(), ver);
        let id = module.id;
        slot.versions.push(module);
        Some(id)
    }

    pub fn get(&self, id: ModId) -> Option<&Mod> {
        let slot = self.slots.get(&id.maj())?;
        let idx = (id.ver() as usize).checked_sub(1)?;
        slot.versions.get(idx)
    }

    pub fn latest(&self, maj: ModMaj) -> Option<ModId> {
        let slot = self.slots.get(&maj)?;
        Some(ModId::new(maj, slot.versions.len() as ModVer))
    }

    pub fn find(&self, name: &str) -> Option<ModMaj> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.name == name)
            .map(|(&maj, _)| maj)
    }

    pub fn name(&self, maj: ModMaj) -> Option<&str> {
        self.slots.get(&maj).map(|slot| slot.name.as_str())
    }

    pub fn list(&self) -> Vec<ModEntry> {
        self.slots
            .iter()
            .map(|(&maj, slot)| ModEntry {
                id: ModId::new(maj, slot.versions.len() as ModVer),
                name: slot.name.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::Mods);
        save.write_u16(self.slots.len() as u16);
        for (&maj, slot) in &self.slots {
            save.write_u16(maj);
            save.write_str(&slot.name);
            save.write_u16(slot.versions.len() as u16);
            for module in &slot.versions {
                module.save(save);
            }
        }
        save.write_magic(Magic::Mods);
    }

    pub fn load(save: &mut dyn SaveCursor) -> SaveResult<Self> {
        save.read_magic(Magic::Mods)?;
        let mut slots = BTreeMap::new();
        for _ in 0..save.read_u16()? {
            let maj = save.read_u16()?;
            let name = save.read_str()?;
            let mut versions = Vec::new();
            for _ in 0..save.read_u16()? {
                versions.push(Mod::load(save)?);
            }
            slots.insert(maj, ModSlot { name, versions });
        }
        save.read_magic(Magic::Mods)?;
        Ok(Self { slots })
    }
}

/// The scripting compiler. Compilation never fails outright; problems are
/// reported through [`Mod::errors`].
pub trait ModCompiler: Send {
    fn compile(&self, maj: ModMaj, source: &str) -> Mod;
}

/// Minimal compiler that keeps the source as its bytecode and reports one
/// error per unbalanced bracket.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceCompiler;

impl ModCompiler for SourceCompiler {
    fn compile(&self, maj: ModMaj, source: &str) -> Mod {
        let mut depth = 0i64;
        let mut errors = 0u32;
        for c in source.chars() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => errors += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
        errors += depth as u32;

        Mod {
            id: ModId::new(maj, 0),
            errors,
            bytecode: source.as_bytes().to_vec(),
        }
    }
}
