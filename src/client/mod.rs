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

//! The client-side mirror.
//!
//! A `Client` owns one connection and splits it in two: the caller's thread
//! writes commands and blocks for the single `Status` reply, while a
//! listener thread drains everything the server sends and routes each
//! record by tag. `Status` goes into a one-slot reply channel; `Push` and
//! `Sync` go into the local `FolderCache`, which mirrors the server-side
//! mailbox keyed by message id.
//!
//! At most one command may be outstanding at a time; the internal command
//! mutex serialises callers. The reply slot is drained before every send so
//! a reply abandoned by a timed-out caller cannot be mistaken for the
//! answer to the next command.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};

use crate::store::model::{
    normalize_folder_name, FolderSnapshot, MessageId, MessageRecord,
    StoredMessage, UserProfile, INBOX, SPAM,
};
use crate::support::error::Error;
use crate::wire::frame;
use crate::wire::records::{opcodes, ControlCommand, Record, StatusResponse};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Local mirror of the user's mailbox.
///
/// Messages are keyed by id, so a message that arrives both in the initial
/// sync and as a push collapses to a single entry.
#[derive(Default)]
pub struct FolderCache {
    folders: BTreeSet<String>,
    messages: BTreeMap<MessageId, StoredMessage>,
}

impl FolderCache {
    fn new() -> Self {
        let mut cache = FolderCache::default();
        cache.folders.insert(INBOX.to_owned());
        cache.folders.insert(SPAM.to_owned());
        cache
    }

    /// Insert or overwrite the entry for `message.id`.
    fn apply(&mut self, message: StoredMessage) {
        self.folders.insert(message.folder.clone());
        self.messages.insert(message.id, message);
    }

    fn remove(&mut self, id: MessageId) {
        self.messages.remove(&id);
    }

    fn set_read(&mut self, id: MessageId, read: bool) {
        if let Some(message) = self.messages.get_mut(&id) {
            message.read = read;
        }
    }

    fn relocate(&mut self, id: MessageId, folder: &str) {
        if let Some(message) = self.messages.get_mut(&id) {
            message.folder = folder.to_owned();
        }
        self.folders.insert(folder.to_owned());
    }

    fn add_folder(&mut self, name: &str) {
        self.folders.insert(name.to_owned());
    }

    fn remove_folder(&mut self, name: &str) {
        self.folders.remove(name);
    }

    pub fn folders(&self) -> Vec<String> {
        self.folders.iter().cloned().collect()
    }

    pub fn folder(&self, name: &str) -> FolderSnapshot {
        let name = normalize_folder_name(name);
        FolderSnapshot {
            system: INBOX == name || SPAM == name,
            messages: self
                .messages
                .values()
                .filter(|m| m.folder == name)
                .cloned()
                .collect(),
            name,
        }
    }

    pub fn message(&self, id: MessageId) -> Option<StoredMessage> {
        self.messages.get(&id).cloned()
    }
}

pub struct Client {
    write: Arc<Mutex<Box<dyn Write + Send>>>,
    replies: Receiver<StatusResponse>,
    cache: Arc<Mutex<FolderCache>>,
    /// Held for the duration of each command round-trip.
    command_lock: Mutex<()>,
    reply_timeout: Duration,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, Error> {
        let socket = TcpStream::connect(addr)?;
        let read = BufReader::new(socket.try_clone()?);
        Ok(Client::new(read, socket))
    }

    /// Wrap an established connection.
    ///
    /// Spawns the listener thread, which runs until the read half reaches
    /// end-of-stream or fails.
    pub fn new<R: Read + Send + 'static, W: Write + Send + 'static>(
        read: R,
        write: W,
    ) -> Self {
        Client::with_reply_timeout(read, write, REPLY_TIMEOUT)
    }

    fn with_reply_timeout<
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    >(
        read: R,
        write: W,
        reply_timeout: Duration,
    ) -> Self {
        let (reply_tx, reply_rx) = channel::bounded(1);
        let cache = Arc::new(Mutex::new(FolderCache::new()));

        {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || listen(read, reply_tx, cache));
        }

        Client {
            write: Arc::new(Mutex::new(Box::new(write) as Box<_>)),
            replies: reply_rx,
            cache,
            command_lock: Mutex::new(()),
            reply_timeout,
        }
    }

    /// Log in with credentials. On success the mirror is bound to this
    /// identity for pushes, and the server's profile is returned.
    pub fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, Error> {
        let status = self.round_trip(&[Record::Command(
            ControlCommand::new(opcodes::LOGIN, vec![email, password]),
        )])?;

        if status.is_failure() {
            return Err(Error::Auth(status.detail));
        }
        status.profile.ok_or(Error::UnexpectedRecord)
    }

    /// Create an account. Does not log in.
    pub fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcodes::REGISTER,
            vec![name, email, password],
        ))])
    }

    /// Bind this connection to `identity` for pushes and request a full
    /// sync of the mailbox into the local cache.
    ///
    /// The sync itself is asynchronous: `CONNECTED` acknowledges the bind,
    /// and the sync records stream in behind it.
    pub fn connect_for_push(&self, identity: &str) -> Result<(), Error> {
        let status = self.round_trip(&[Record::Command(
            ControlCommand::new(opcodes::CONNECT, vec![identity]),
        )])?;

        if status.is_failure() {
            return Err(rejected(status));
        }
        Ok(())
    }

    pub fn send(&self, message: MessageRecord) -> Result<(), Error> {
        self.expect_success(&[
            Record::Command(ControlCommand::new::<&str>(
                opcodes::SEND_EMAIL,
                vec![],
            )),
            Record::Message(message),
        ])
    }

    pub fn move_message(
        &self,
        id: MessageId,
        folder: &str,
    ) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcodes::MOVE_EMAIL,
            vec![id.to_string(), folder.to_owned()],
        ))])?;
        self.cache
            .lock()
            .unwrap()
            .relocate(id, &normalize_folder_name(folder));
        Ok(())
    }

    pub fn delete_message(&self, id: MessageId) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcodes::DELETE_EMAIL,
            vec![id.to_string()],
        ))])?;
        self.cache.lock().unwrap().remove(id);
        Ok(())
    }

    pub fn mark_read(&self, id: MessageId) -> Result<(), Error> {
        self.mark(id, opcodes::MARK_READ, true)
    }

    pub fn mark_unread(&self, id: MessageId) -> Result<(), Error> {
        self.mark(id, opcodes::MARK_UNREAD, false)
    }

    fn mark(
        &self,
        id: MessageId,
        opcode: &str,
        read: bool,
    ) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcode,
            vec![id.to_string()],
        ))])?;
        self.cache.lock().unwrap().set_read(id, read);
        Ok(())
    }

    pub fn create_folder(&self, name: &str) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcodes::CREATE_FOLDER,
            vec![name],
        ))])?;
        self.cache
            .lock()
            .unwrap()
            .add_folder(&normalize_folder_name(name));
        Ok(())
    }

    pub fn delete_folder(&self, name: &str) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new(
            opcodes::DELETE_FOLDER,
            vec![name],
        ))])?;
        self.cache
            .lock()
            .unwrap()
            .remove_folder(&normalize_folder_name(name));
        Ok(())
    }

    pub fn logout(&self) -> Result<(), Error> {
        self.expect_success(&[Record::Command(ControlCommand::new::<&str>(
            opcodes::LOGOUT,
            vec![],
        ))])
    }

    /// Snapshot one folder of the local mirror.
    pub fn folder(&self, name: &str) -> FolderSnapshot {
        self.cache.lock().unwrap().folder(name)
    }

    pub fn folders(&self) -> Vec<String> {
        self.cache.lock().unwrap().folders()
    }

    pub fn message(&self, id: MessageId) -> Option<StoredMessage> {
        self.cache.lock().unwrap().message(id)
    }

    /// Total messages currently mirrored, across all folders.
    pub fn message_count(&self) -> usize {
        self.cache.lock().unwrap().messages.len()
    }

    fn expect_success(&self, records: &[Record]) -> Result<(), Error> {
        let status = self.round_trip(records)?;
        if status.is_failure() {
            return Err(rejected(status));
        }
        Ok(())
    }

    /// Write `records` as one request and block for its single reply.
    fn round_trip(
        &self,
        records: &[Record],
    ) -> Result<StatusResponse, Error> {
        let _guard = self.command_lock.lock().unwrap();

        // A reply left over from a timed-out predecessor must not be read
        // as the answer to this command.
        while self.replies.try_recv().is_ok() {}

        {
            let mut w = self.write.lock().unwrap();
            for record in records {
                frame::write_record(&mut **w, record)?;
            }
        }

        match self.replies.recv_timeout(self.reply_timeout) {
            Ok(status) => Ok(status),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::ConnectionLost),
        }
    }
}

fn rejected(status: StatusResponse) -> Error {
    Error::Rejected {
        code: status.code,
        detail: status.detail,
    }
}

/// The listener loop: route every inbound record by tag.
fn listen<R: Read>(
    mut read: R,
    replies: Sender<StatusResponse>,
    cache: Arc<Mutex<FolderCache>>,
) {
    loop {
        match frame::read_record(&mut read) {
            Ok(Record::Status(status)) => {
                // Full slot means no caller is waiting; the reply is stale
                // by definition and dropping it is correct.
                let _ = replies.try_send(status);
            },
            Ok(Record::Push(message)) | Ok(Record::Sync(message)) => {
                cache.lock().unwrap().apply(message);
            },
            Ok(record) => {
                warn!("Server sent a client-only record: {:?}", record);
            },
            Err(Error::Io(ref e))
                if std::io::ErrorKind::UnexpectedEof == e.kind() =>
            {
                info!("Server closed the connection");
                break;
            },
            Err(e) => {
                warn!("Connection lost: {}", e);
                break;
            },
        }
    }
}
