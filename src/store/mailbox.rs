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

//! The in-memory per-user mailbox store.
//!
//! One mailbox per identity, one lock per mailbox. The store is shared by
//! every connection worker; an operation takes the outer registry lock only
//! long enough to resolve the mailbox handle, then works under that
//! mailbox's own lock. Delivery into another user's mailbox therefore never
//! contends with anything but operations on that same mailbox, and since
//! every operation touches at most one mailbox there is no lock ordering to
//! get wrong.
//!
//! All message lookups go through the stable message id. See
//! `model::MessageId` for why positions are never used.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::model::{
    normalize_folder_name, FolderSnapshot, MessageId, StoredMessage, INBOX,
    SPAM,
};
use super::persist::RecordStore;
use crate::support::error::Error;

pub struct MailboxStore {
    persist: Arc<dyn RecordStore>,
    mailboxes: Mutex<HashMap<String, Arc<Mutex<Mailbox>>>>,
}

struct Mailbox {
    folders: Vec<Folder>,
}

struct Folder {
    name: String,
    system: bool,
    messages: Vec<StoredMessage>,
}

impl Mailbox {
    fn folder_ix(&self, name: &str) -> Option<usize> {
        self.folders.iter().position(|f| f.name == name)
    }

    /// Locate a message by id anywhere in the mailbox, returning
    /// `(folder index, position)`.
    fn locate(&self, id: MessageId) -> Option<(usize, usize)> {
        for (fx, folder) in self.folders.iter().enumerate() {
            if let Some(mx) =
                folder.messages.iter().position(|m| m.id == id)
            {
                return Some((fx, mx));
            }
        }
        None
    }
}

impl MailboxStore {
    pub fn new(persist: Arc<dyn RecordStore>) -> Self {
        MailboxStore {
            persist,
            mailboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure `identity` has a mailbox with the system folders, restoring
    /// any persisted contents on first contact. Idempotent.
    ///
    /// Restoration is an explicit two-phase affair: the plain records are
    /// loaded from the record store here, and nothing else is rebuilt
    /// implicitly. Live session state is attached separately by the
    /// dispatcher.
    pub fn ensure_mailbox(&self, identity: &str) -> Result<(), Error> {
        // The registry lock is held across the load so that two sessions
        // making first contact with the same identity cannot both
        // initialise it.
        let mut mailboxes = self.mailboxes.lock().unwrap();
        if mailboxes.contains_key(identity) {
            return Ok(());
        }

        self.persist.create_folder(identity, INBOX, true)?;
        self.persist.create_folder(identity, SPAM, true)?;

        let mut mailbox = Mailbox {
            folders: self
                .persist
                .folders(identity)?
                .into_iter()
                .map(|(name, system)| Folder {
                    name,
                    system,
                    messages: Vec::new(),
                })
                .collect(),
        };

        for message in self.persist.messages(identity)? {
            // A message whose stored folder no longer resolves goes back to
            // the inbox rather than being dropped on the floor.
            let fx = mailbox
                .folder_ix(&message.folder)
                .or_else(|| mailbox.folder_ix(INBOX))
                .ok_or(Error::UnknownFolder)?;
            mailbox.folders[fx].messages.push(message);
        }

        mailboxes
            .insert(identity.to_owned(), Arc::new(Mutex::new(mailbox)));
        Ok(())
    }

    fn mailbox(&self, identity: &str) -> Result<Arc<Mutex<Mailbox>>, Error> {
        self.mailboxes
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .ok_or(Error::UnknownUser)
    }

    /// Append an already-persisted message to the named folder, stamping
    /// the message's folder reference.
    pub fn add_message(
        &self,
        identity: &str,
        folder_name: &str,
        mut message: StoredMessage,
    ) -> Result<(), Error> {
        let folder_name = normalize_folder_name(folder_name);
        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        let fx =
            mailbox.folder_ix(&folder_name).ok_or(Error::UnknownFolder)?;
        message.folder = folder_name;
        mailbox.folders[fx].messages.push(message);
        Ok(())
    }

    /// Atomically move a message to `target`: removed from its current
    /// folder, restamped, appended to the target.
    pub fn move_message(
        &self,
        identity: &str,
        id: MessageId,
        target: &str,
    ) -> Result<(), Error> {
        let target = normalize_folder_name(target);
        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        let tx = mailbox.folder_ix(&target).ok_or(Error::UnknownFolder)?;
        let (fx, mx) = mailbox.locate(id).ok_or(Error::NotFound)?;

        self.persist.set_folder(id, &target)?;

        let mut message = mailbox.folders[fx].messages.remove(mx);
        message.folder = target;
        mailbox.folders[tx].messages.push(message);
        Ok(())
    }

    pub fn set_read_state(
        &self,
        identity: &str,
        id: MessageId,
        read: bool,
    ) -> Result<(), Error> {
        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        let (fx, mx) = mailbox.locate(id).ok_or(Error::NotFound)?;
        self.persist.set_read(id, read)?;
        mailbox.folders[fx].messages[mx].read = read;
        Ok(())
    }

    pub fn delete_message(
        &self,
        identity: &str,
        id: MessageId,
    ) -> Result<(), Error> {
        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        let (fx, mx) = mailbox.locate(id).ok_or(Error::NotFound)?;
        self.persist.delete_message(id)?;
        mailbox.folders[fx].messages.remove(mx);
        Ok(())
    }

    /// Snapshot one folder. The snapshot is a copy; mutating the real
    /// folder afterwards does not affect it.
    pub fn list_folder(
        &self,
        identity: &str,
        folder_name: &str,
    ) -> Result<FolderSnapshot, Error> {
        let folder_name = normalize_folder_name(folder_name);
        let mailbox = self.mailbox(identity)?;
        let mailbox = mailbox.lock().unwrap();

        let fx =
            mailbox.folder_ix(&folder_name).ok_or(Error::UnknownFolder)?;
        let folder = &mailbox.folders[fx];
        Ok(FolderSnapshot {
            name: folder.name.clone(),
            system: folder.system,
            messages: folder.messages.clone(),
        })
    }

    /// Snapshot every message in the mailbox, folder by folder. Used for
    /// the initial sync stream.
    pub fn list_all(
        &self,
        identity: &str,
    ) -> Result<Vec<StoredMessage>, Error> {
        let mailbox = self.mailbox(identity)?;
        let mailbox = mailbox.lock().unwrap();

        Ok(mailbox
            .folders
            .iter()
            .flat_map(|f| f.messages.iter().cloned())
            .collect())
    }

    /// Create a user folder. Idempotent; creating an existing folder
    /// (system or not) succeeds without effect.
    pub fn create_folder(
        &self,
        identity: &str,
        name: &str,
    ) -> Result<(), Error> {
        let name = normalize_folder_name(name);
        if name.is_empty() {
            return Err(Error::UnknownFolder);
        }

        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        if mailbox.folder_ix(&name).is_some() {
            return Ok(());
        }

        self.persist.create_folder(identity, &name, false)?;
        mailbox.folders.push(Folder {
            name,
            system: false,
            messages: Vec::new(),
        });
        Ok(())
    }

    /// Delete an empty user folder. System folders cannot be deleted, and
    /// a populated folder must be emptied first.
    pub fn delete_folder(
        &self,
        identity: &str,
        name: &str,
    ) -> Result<(), Error> {
        let name = normalize_folder_name(name);
        let mailbox = self.mailbox(identity)?;
        let mut mailbox = mailbox.lock().unwrap();

        let fx = mailbox.folder_ix(&name).ok_or(Error::UnknownFolder)?;
        if mailbox.folders[fx].system {
            return Err(Error::SystemFolder);
        }
        if !mailbox.folders[fx].messages.is_empty() {
            return Err(Error::FolderNotEmpty);
        }

        self.persist.delete_folder(identity, &name)?;
        mailbox.folders.remove(fx);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::store::model::MessageRecord;
    use crate::store::persist::MemoryStore;

    const USER: &str = "dib@example.com";

    fn set_up() -> (Arc<MemoryStore>, MailboxStore) {
        let persist = Arc::new(MemoryStore::new());
        let store = MailboxStore::new(Arc::clone(&persist) as Arc<_>);
        store.ensure_mailbox(USER).unwrap();
        (persist, store)
    }

    /// Persist and append a message the way the delivery engine does.
    fn deliver(
        persist: &MemoryStore,
        store: &MailboxStore,
        subject: &str,
    ) -> MessageId {
        let record = MessageRecord {
            from: "zim@example.com".to_owned(),
            to: USER.to_owned(),
            subject: subject.to_owned(),
            body: format!("body of {}", subject),
        };
        let timestamp = Utc::now();
        let id = persist.create_message(&record, timestamp).unwrap();
        store
            .add_message(
                USER,
                INBOX,
                StoredMessage::delivered(record, id, timestamp),
            )
            .unwrap();
        id
    }

    #[test]
    fn ensure_creates_empty_system_folders() {
        let (_, store) = set_up();

        let inbox = store.list_folder(USER, INBOX).unwrap();
        assert!(inbox.system);
        assert!(inbox.messages.is_empty());

        let spam = store.list_folder(USER, SPAM).unwrap();
        assert!(spam.system);
        assert!(spam.messages.is_empty());
    }

    #[test]
    fn ensure_is_idempotent() {
        let (persist, store) = set_up();
        deliver(&persist, &store, "one");

        store.ensure_mailbox(USER).unwrap();
        assert_eq!(1, store.list_folder(USER, INBOX).unwrap().messages.len());
    }

    #[test]
    fn add_then_list_round_trips() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "round trip");

        let inbox = store.list_folder(USER, INBOX).unwrap();
        assert_eq!(1, inbox.messages.len());
        let message = &inbox.messages[0];
        assert_eq!(id, message.id);
        assert_eq!("zim@example.com", message.from);
        assert_eq!(USER, message.to);
        assert_eq!("round trip", message.subject);
        assert_eq!("body of round trip", message.body);
        assert!(!message.read);
        assert_eq!(1, inbox.unread());
    }

    #[test]
    fn add_to_unknown_folder_fails() {
        let (persist, store) = set_up();
        let record = MessageRecord {
            from: "zim@example.com".to_owned(),
            to: USER.to_owned(),
            subject: "s".to_owned(),
            body: "b".to_owned(),
        };
        let timestamp = Utc::now();
        let id = persist.create_message(&record, timestamp).unwrap();

        assert_matches!(
            Err(Error::UnknownFolder),
            store.add_message(
                USER,
                "no-such",
                StoredMessage::delivered(record, id, timestamp),
            )
        );
    }

    #[test]
    fn move_is_folder_exclusive() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "junk");

        store.move_message(USER, id, SPAM).unwrap();

        let inbox = store.list_folder(USER, INBOX).unwrap();
        assert!(!inbox.messages.iter().any(|m| m.id == id));
        let spam = store.list_folder(USER, SPAM).unwrap();
        assert_eq!(1, spam.messages.len());
        assert_eq!(id, spam.messages[0].id);
        assert_eq!(SPAM, spam.messages[0].folder);
    }

    #[test]
    fn move_to_unknown_folder_fails_without_removal() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "stays put");

        assert_matches!(
            Err(Error::UnknownFolder),
            store.move_message(USER, id, "archive")
        );
        assert_eq!(1, store.list_folder(USER, INBOX).unwrap().messages.len());
    }

    #[test]
    fn move_of_missing_message_is_not_found() {
        let (_, store) = set_up();
        assert_matches!(
            Err(Error::NotFound),
            store.move_message(USER, MessageId(999), SPAM)
        );
    }

    #[test]
    fn read_state_is_idempotent() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "read me");

        store.set_read_state(USER, id, true).unwrap();
        store.set_read_state(USER, id, true).unwrap();

        let inbox = store.list_folder(USER, INBOX).unwrap();
        assert_eq!(1, inbox.messages.len());
        assert!(inbox.messages[0].read);
        assert_eq!(0, inbox.unread());
    }

    #[test]
    fn double_delete_is_not_found() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "doomed");

        store.delete_message(USER, id).unwrap();
        assert_matches!(
            Err(Error::NotFound),
            store.delete_message(USER, id)
        );
    }

    #[test]
    fn snapshots_are_detached() {
        let (persist, store) = set_up();
        let id = deliver(&persist, &store, "frozen");

        let snapshot = store.list_folder(USER, INBOX).unwrap();
        store.delete_message(USER, id).unwrap();

        assert_eq!(1, snapshot.messages.len());
        assert!(store.list_folder(USER, INBOX).unwrap().messages.is_empty());
    }

    #[test]
    fn user_folder_lifecycle() {
        let (persist, store) = set_up();
        store.create_folder(USER, "Archive").unwrap();
        // Idempotent, and normalisation makes these the same folder
        store.create_folder(USER, "archive").unwrap();

        let id = deliver(&persist, &store, "keep");
        store.move_message(USER, id, "archive").unwrap();
        assert_matches!(
            Err(Error::FolderNotEmpty),
            store.delete_folder(USER, "archive")
        );

        store.move_message(USER, id, INBOX).unwrap();
        store.delete_folder(USER, "archive").unwrap();
        assert_matches!(
            Err(Error::UnknownFolder),
            store.list_folder(USER, "archive")
        );
    }

    #[test]
    fn system_folders_cannot_be_deleted() {
        let (_, store) = set_up();
        assert_matches!(
            Err(Error::SystemFolder),
            store.delete_folder(USER, INBOX)
        );
        assert_matches!(
            Err(Error::SystemFolder),
            store.delete_folder(USER, SPAM)
        );
    }

    #[test]
    fn mailbox_restored_from_record_store() {
        let persist = Arc::new(MemoryStore::new());
        let id;
        {
            let store =
                MailboxStore::new(Arc::clone(&persist) as Arc<_>);
            store.ensure_mailbox(USER).unwrap();
            id = deliver(&persist, &store, "durable");
            store.move_message(USER, id, SPAM).unwrap();
            store.set_read_state(USER, id, true).unwrap();
        }

        // A fresh store over the same records sees the same mailbox.
        let store = MailboxStore::new(Arc::clone(&persist) as Arc<_>);
        store.ensure_mailbox(USER).unwrap();

        let spam = store.list_folder(USER, SPAM).unwrap();
        assert_eq!(1, spam.messages.len());
        assert_eq!(id, spam.messages[0].id);
        assert!(spam.messages[0].read);
        assert!(store.list_folder(USER, INBOX).unwrap().messages.is_empty());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Deliver,
        Move(usize, usize),
        Mark(usize, bool),
        Delete(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Deliver),
            (0usize..16, 0usize..3).prop_map(|(m, f)| Op::Move(m, f)),
            (0usize..16, prop::bool::ANY).prop_map(|(m, r)| Op::Mark(m, r)),
            (0usize..16).prop_map(Op::Delete),
        ]
    }

    proptest! {
        /// Whatever interleaving of operations runs, every live message is
        /// in exactly one folder and deleted messages are gone.
        #[test]
        fn message_is_always_in_exactly_one_folder(
            ops in prop::collection::vec(op_strategy(), 1..48)
        ) {
            let (persist, store) = set_up();
            store.create_folder(USER, "archive").unwrap();
            let folder_names = [INBOX, SPAM, "archive"];

            let mut live = Vec::<MessageId>::new();
            for op in ops {
                match op {
                    Op::Deliver => {
                        live.push(deliver(&persist, &store, "prop"));
                    },
                    Op::Move(m, f) if !live.is_empty() => {
                        let id = live[m % live.len()];
                        store
                            .move_message(
                                USER,
                                id,
                                folder_names[f % folder_names.len()],
                            )
                            .unwrap();
                    },
                    Op::Mark(m, read) if !live.is_empty() => {
                        let id = live[m % live.len()];
                        store.set_read_state(USER, id, read).unwrap();
                    },
                    Op::Delete(m) if !live.is_empty() => {
                        let id = live.remove(m % live.len());
                        store.delete_message(USER, id).unwrap();
                    },
                    // Mutations of an empty mailbox are no-ops here
                    _ => (),
                }

                let mut seen = Vec::<MessageId>::new();
                for name in &folder_names {
                    let snapshot = store.list_folder(USER, name).unwrap();
                    for message in &snapshot.messages {
                        prop_assert_eq!(
                            *name,
                            message.folder.as_str(),
                            "folder stamp out of sync"
                        );
                        seen.push(message.id);
                    }
                }

                seen.sort();
                let mut expected = live.clone();
                expected.sort();
                prop_assert_eq!(expected, seen);
            }
        }
    }
}
