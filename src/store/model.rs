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

//! Data model shared between the mailbox store, the wire protocol, and the
//! client mirror.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The name of the system inbox folder, which is also the folder every
/// message is delivered into.
pub const INBOX: &str = "inbox";
/// The name of the system spam folder.
pub const SPAM: &str = "spam";

/// Stable identifier for a delivered message.
///
/// Assigned by the record store when the message is first persisted. All
/// mutate-by-reference operations address messages by this id. A position in
/// a folder listing is never meaningful across requests: the folder can be
/// mutated concurrently by another session or by inbound delivery, so an
/// index captured from one listing may point at a different message (or out
/// of range) by the time it is used.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, ParseIntError> {
        s.parse::<u64>().map(MessageId)
    }
}

/// A message as composed by a sender, before delivery has assigned it an
/// identity.
///
/// This is also the wire representation of a send payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// A message as held by the mailbox store after delivery.
///
/// The sender's local copy of the `MessageRecord` is discardable once
/// delivery acknowledges; the stored message is the single authoritative
/// copy and is mutated only through read-state and folder-move operations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Server-assigned delivery timestamp.
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    /// Name of the folder currently holding this message. A message is in
    /// exactly one folder at a time.
    pub folder: String,
}

impl StoredMessage {
    /// Promote a freshly delivered record to a stored message in the inbox.
    pub fn delivered(
        record: MessageRecord,
        id: MessageId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        StoredMessage {
            id,
            from: record.from,
            to: record.to,
            subject: record.subject,
            body: record.body,
            timestamp,
            read: false,
            folder: INBOX.to_owned(),
        }
    }
}

/// The public profile of a user, as returned by a successful login.
///
/// Credentials never leave the directory service; this carries only what the
/// client needs to display.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub last_login: DateTime<Utc>,
}

/// An immutable snapshot of one folder.
///
/// `list_folder` always returns a copy and never a live handle, so a caller
/// can iterate it without racing concurrent mutation of the real folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderSnapshot {
    pub name: String,
    pub system: bool,
    pub messages: Vec<StoredMessage>,
}

impl FolderSnapshot {
    pub fn unread(&self) -> usize {
        self.messages.iter().filter(|m| !m.read).count()
    }
}

/// Normalise a folder name the way the store keys folders.
pub fn normalize_folder_name(name: &str) -> String {
    name.trim().to_lowercase()
}
