use serde::{Deserialize, Serialize};

use crate::save::{Magic, SaveCursor};

use super::ProtocolError;

pub type Token = u64;
pub type UserId = u64;

/// What a client needs to re-authenticate with a given server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub server: Token,
    pub id: UserId,
    pub private: Token,
}

impl Credentials {
    pub fn save(&self, save: &mut dyn SaveCursor) {
        save.write_magic(Magic::User);
        save.write_u64(self.server);
        save.write_u64(self.id);
        save.write_u64(self.private);
        save.write_magic(Magic::User);
    }

    pub fn load(save: &mut dyn SaveCursor) -> Result<Self, ProtocolError> {
        save.read_magic(Magic::User)?;
        let credentials = Self {
            server: save.read_u64()?,
            id: save.read_u64()?,
            private: save.read_u64()?,
        };
        save.read_magic(Magic::User)?;
        Ok(credentials)
    }
}
