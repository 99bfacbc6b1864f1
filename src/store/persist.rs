//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Postbox.
//
// Postbox is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published by  the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Postbox is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Postbox. If not, see <http://www.gnu.org/licenses/>.

//! The record store, i.e., the external durable-persistence collaborator.
//!
//! The mailbox store treats this purely as a create/read/update/delete
//! surface keyed by opaque record ids. The in-memory implementation below is
//! what the stock binary and the tests run against; a real deployment would
//! put a database behind the same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::model::{MessageId, MessageRecord, StoredMessage, INBOX};
use crate::support::error::Error;

pub trait RecordStore: Send + Sync {
    /// Create a folder record for `identity` if one does not already exist.
    /// Idempotent.
    fn create_folder(
        &self,
        identity: &str,
        name: &str,
        system: bool,
    ) -> Result<(), Error>;

    /// All folder records for `identity`, as `(name, system)` pairs.
    fn folders(&self, identity: &str) -> Result<Vec<(String, bool)>, Error>;

    /// Delete the folder record. The caller is responsible for ensuring the
    /// folder is deletable (not a system folder, not populated).
    fn delete_folder(&self, identity: &str, name: &str) -> Result<(), Error>;

    /// Persist a freshly delivered message into the recipient's inbox,
    /// assigning and returning its id.
    fn create_message(
        &self,
        record: &MessageRecord,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, Error>;

    /// All message records owned by `identity`, in delivery order.
    fn messages(&self, identity: &str) -> Result<Vec<StoredMessage>, Error>;

    fn set_read(&self, id: MessageId, read: bool) -> Result<(), Error>;

    fn set_folder(&self, id: MessageId, folder: &str) -> Result<(), Error>;

    fn delete_message(&self, id: MessageId) -> Result<(), Error>;
}

/// In-memory `RecordStore`.
///
/// Survives for the life of the process only. Ids are assigned from a
/// monotonic counter starting at 1, so `MessageId(0)` never denotes a real
/// record.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    next_id: u64,
    /// identity => folder records, in creation order.
    folders: HashMap<String, Vec<(String, bool)>>,
    /// Keyed by id; BTreeMap so `messages()` yields delivery order.
    messages: BTreeMap<u64, StoredMessage>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl RecordStore for MemoryStore {
    fn create_folder(
        &self,
        identity: &str,
        name: &str,
        system: bool,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let folders = inner.folders.entry(identity.to_owned()).or_default();
        if !folders.iter().any(|(n, _)| n == name) {
            folders.push((name.to_owned(), system));
        }
        Ok(())
    }

    fn folders(&self, identity: &str) -> Result<Vec<(String, bool)>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.folders.get(identity).cloned().unwrap_or_default())
    }

    fn delete_folder(&self, identity: &str, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(folders) = inner.folders.get_mut(identity) {
            folders.retain(|(n, _)| n != name);
        }
        Ok(())
    }

    fn create_message(
        &self,
        record: &MessageRecord,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = MessageId(inner.next_id);
        inner.messages.insert(
            id.0,
            StoredMessage {
                id,
                from: record.from.clone(),
                to: record.to.clone(),
                subject: record.subject.clone(),
                body: record.body.clone(),
                timestamp,
                read: false,
                folder: INBOX.to_owned(),
            },
        );
        Ok(id)
    }

    fn messages(&self, identity: &str) -> Result<Vec<StoredMessage>, Error> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .values()
            .filter(|m| m.to == identity)
            .cloned()
            .collect())
    }

    fn set_read(&self, id: MessageId, read: bool) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        match inner.messages.get_mut(&id.0) {
            Some(m) => {
                m.read = read;
                Ok(())
            },
            None => Err(Error::NotFound),
        }
    }

    fn set_folder(&self, id: MessageId, folder: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        match inner.messages.get_mut(&id.0) {
            Some(m) => {
                m.folder = folder.to_owned();
                Ok(())
            },
            None => Err(Error::NotFound),
        }
    }

    fn delete_message(&self, id: MessageId) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        match inner.messages.remove(&id.0) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound),
        }
    }
}
