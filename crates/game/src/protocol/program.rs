use crate::save::{Magic, SaveCursor};
use crate::world::Mod;

use super::ProtocolError;

/// Why a compiled program is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModKind {
    /// A published version the peer selected.
    Select = 0,
    /// The peer's latest compile candidate, errors included.
    Compile = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFrame {
    pub kind: ModKind,
    pub module: Mod,
}

impl ModFrame {
    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::Mod);
        save.write_u8(self.kind as u8);
        self.module.save(save);
        save.write_magic(Magic::Mod);
    }

    pub fn load(save: &mut dyn SaveCursor) -> Result<Self, ProtocolError> {
        save.read_magic(Magic::Mod)?;
        let kind = match save.read_u8()? {
            0 => ModKind::Select,
            1 => ModKind::Compile,
            other => {
                return Err(ProtocolError::Invalid {
                    what: "mod frame kind",
                    value: other as u64,
                });
            }
        };
        let module = Mod::load(save)?;
        save.read_magic(Magic::Mod)?;
        Ok(Self { kind, module })
    }
}
