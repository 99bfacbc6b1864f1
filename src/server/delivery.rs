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

//! The delivery engine.
//!
//! Delivery is the one cross-user path in the system: any connection's
//! worker may call `deliver` and thereby write into the *recipient's*
//! mailbox. The push to a live recipient happens strictly after the store
//! mutation commits and outside the mailbox lock, so a stalled recipient
//! socket can never block mailbox operations.

use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};

use super::session::SessionRegistry;
use crate::store::mailbox::MailboxStore;
use crate::store::model::{MessageId, MessageRecord, StoredMessage, INBOX};
use crate::store::persist::RecordStore;
use crate::support::error::Error;
use crate::wire::frame;
use crate::wire::records::Record;

pub struct DeliveryEngine {
    mailboxes: Arc<MailboxStore>,
    sessions: Arc<SessionRegistry>,
    persist: Arc<dyn RecordStore>,
}

impl DeliveryEngine {
    pub fn new(
        mailboxes: Arc<MailboxStore>,
        sessions: Arc<SessionRegistry>,
        persist: Arc<dyn RecordStore>,
    ) -> Self {
        DeliveryEngine {
            mailboxes,
            sessions,
            persist,
        }
    }

    /// Deliver `record` to its recipient's inbox, returning the assigned
    /// message id.
    ///
    /// Addressing is permissive: a recipient the system has never seen
    /// before gets an empty mailbox provisioned rather than a bounce.
    ///
    /// If the recipient has a live session, a copy of the stored message is
    /// pushed over it. A failed push is swallowed; the message is already
    /// durably queued, and the dead session is dropped from the registry.
    pub fn deliver(
        &self,
        log_prefix: &str,
        record: MessageRecord,
    ) -> Result<MessageId, Error> {
        let recipient = record.to.clone();
        self.mailboxes.ensure_mailbox(&recipient)?;

        let timestamp = Utc::now();
        let id = self
            .persist
            .create_message(&record, timestamp)
            .map_err(|e| {
                error!(
                    "{} Failed to persist message for {}: {}",
                    log_prefix, recipient, e
                );
                Error::Persistence(e.to_string())
            })?;

        let stored = StoredMessage::delivered(record, id, timestamp);
        self.mailboxes.add_message(&recipient, INBOX, stored.clone())?;
        info!(
            "{} Delivered message {} from {} to {}",
            log_prefix, id, stored.from, recipient
        );

        // The mailbox lock is released; now notify, if anyone is there.
        if let Some(channel) = self.sessions.lookup(&recipient) {
            let push_result = {
                let mut w = channel.lock().unwrap();
                frame::write_record(&mut **w, &Record::Push(stored))
            };

            if let Err(e) = push_result {
                warn!(
                    "{} Push to {} failed, leaving message queued: {}",
                    log_prefix, recipient, e
                );
                self.sessions.unregister(&recipient, &channel);
            }
        }

        Ok(id)
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, Read, Write};
    use std::sync::Mutex;

    use super::*;
    use crate::server::session::SessionChannel;
    use crate::store::persist::MemoryStore;

    const RECIPIENT: &str = "dib@example.com";

    fn set_up() -> (DeliveryEngine, Arc<MailboxStore>, Arc<SessionRegistry>)
    {
        let persist = Arc::new(MemoryStore::new());
        let mailboxes =
            Arc::new(MailboxStore::new(Arc::clone(&persist) as Arc<_>));
        let sessions = Arc::new(SessionRegistry::new());
        let engine = DeliveryEngine::new(
            Arc::clone(&mailboxes),
            Arc::clone(&sessions),
            persist,
        );
        (engine, mailboxes, sessions)
    }

    fn record() -> MessageRecord {
        MessageRecord {
            from: "zim@example.com".to_owned(),
            to: RECIPIENT.to_owned(),
            subject: "doom".to_owned(),
            body: "DOOM".to_owned(),
        }
    }

    /// A `Write` whose contents can be inspected from outside the channel.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn offline_delivery_queues_durably_without_push() {
        let (engine, mailboxes, _) = set_up();

        let id = engine.deliver("test", record()).unwrap();

        let inbox = mailboxes.list_folder(RECIPIENT, INBOX).unwrap();
        assert_eq!(1, inbox.messages.len());
        assert_eq!(id, inbox.messages[0].id);
    }

    #[test]
    fn live_recipient_gets_exactly_one_push() {
        let (engine, mailboxes, sessions) = set_up();
        let buf = SharedBuf::default();
        let channel: SessionChannel =
            Arc::new(Mutex::new(Box::new(buf.clone()) as Box<_>));
        sessions.register(RECIPIENT, channel);

        let id = engine.deliver("test", record()).unwrap();

        let wire = buf.0.lock().unwrap().clone();
        let mut cursor = io::Cursor::new(wire);
        match frame::read_record(&mut cursor).unwrap() {
            Record::Push(m) => {
                assert_eq!(id, m.id);
                assert_eq!(INBOX, m.folder);
                assert_eq!("doom", m.subject);
            },
            r => panic!("Unexpected record: {:?}", r),
        }
        // Exactly one push: nothing left on the wire
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        // And exactly one durable copy
        assert_eq!(
            1,
            mailboxes.list_folder(RECIPIENT, INBOX).unwrap().messages.len()
        );
    }

    #[test]
    fn failed_push_swallowed_and_session_dropped() {
        let (engine, mailboxes, sessions) = set_up();
        let channel: SessionChannel =
            Arc::new(Mutex::new(Box::new(BrokenPipe) as Box<_>));
        sessions.register(RECIPIENT, channel);

        let id = engine.deliver("test", record()).unwrap();

        assert!(sessions.lookup(RECIPIENT).is_none());
        let inbox = mailboxes.list_folder(RECIPIENT, INBOX).unwrap();
        assert_eq!(1, inbox.messages.len());
        assert_eq!(id, inbox.messages[0].id);
    }
}
