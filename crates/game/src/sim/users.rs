use std::collections::BTreeMap;

use crate::protocol::{Credentials, MAX_NAME_LEN, Token, UserId};

use super::rand_u64;

#[derive(Debug, Clone)]
struct User {
    name: String,
    private: Token,
}

/// Accounts known to this sim. `server` identifies the registry so a client
/// can tell credentials issued elsewhere apart.
#[derive(Debug)]
pub struct Users {
    server: Token,
    users: BTreeMap<UserId, User>,
}

impl Users {
    pub fn new() -> Self {
        Self {
            server: rand_u64() | 1,
            users: BTreeMap::new(),
        }
    }

    pub fn server(&self) -> Token {
        self.server
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn name(&self, id: UserId) -> Option<&str> {
        self.users.get(&id).map(|user| user.name.as_str())
    }

    /// Registers `name` and returns its freshly minted credentials. Names are
    /// unique.
    pub fn create(&mut self, name: &str) -> Option<Credentials> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return None;
        }
        if self.users.values().any(|user| user.name == name) {
            return None;
        }

        let id = self.users.last_key_value().map_or(1, |(&id, _)| id + 1);
        let private = rand_u64() ^ id.rotate_left(32);
        self.users.insert(
            id,
            User {
                name: name.to_string(),
                private,
            },
        );

        Some(Credentials {
            server: self.server,
            id,
            private,
        })
    }

    pub fn auth(&self, server: Token, id: UserId, private: Token) -> bool {
        server == self.server
            && self
                .users
                .get(&id)
                .is_some_and(|user| user.private == private)
    }
}

impl Default for Users {
    fn default() -> Self {
        Self::new()
    }
}
