//! Directory of live connections
//!
//! Identity → connection mapping owned by the coordinator. The directory is
//! also the live-connection set: an identity is live exactly when it has an
//! entry here.

use std::collections::HashMap;

use crate::connection::Connection;
use crate::types::{ClientId, Roster, SessionId};

#[derive(Debug, Default)]
pub struct Directory {
    entries: HashMap<ClientId, Connection>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under its own identity
    ///
    /// An identity that is already present is left untouched and the
    /// rejected connection is handed back.
    pub fn insert(&mut self, connection: Connection) -> Result<(), Connection> {
        if self.entries.contains_key(&connection.id) {
            return Err(connection);
        }
        self.entries.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove and return a connection, dropping it releases its mailbox
    pub fn remove(&mut self, id: &ClientId) -> Option<Connection> {
        self.entries.remove(id)
    }

    /// Remove a connection only if `session` is the one registered under `id`
    pub fn remove_session(&mut self, id: &ClientId, session: SessionId) -> Option<Connection> {
        match self.entries.get(id) {
            Some(connection) if connection.session == session => self.entries.remove(id),
            _ => None,
        }
    }

    pub fn get(&self, id: &ClientId) -> Option<&Connection> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.entries.values()
    }

    /// Snapshot of identities and display names
    pub fn roster(&self) -> Roster {
        self.entries
            .values()
            .map(|c| (c.id.clone(), c.display_name.clone()))
            .collect()
    }
}
