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

//! The records that travel over a connection.
//!
//! Each connection carries a sequence of `Record`s in both directions. The
//! enum tag is what lets the client listener separate unsolicited pushes
//! from command replies; nothing is ever inferred from a record's position
//! in the stream except the 1:1 pairing of a `Status` with the most recent
//! not-yet-acknowledged command.

use serde::{Deserialize, Serialize};

use crate::store::model::{MessageRecord, StoredMessage, UserProfile};

pub mod opcodes {
    pub const LOGIN: &str = "LOGIN";
    pub const REGISTER: &str = "REGISTER";
    pub const CONNECT: &str = "CONNECT";
    pub const SEND_EMAIL: &str = "SEND_EMAIL";
    pub const MOVE_EMAIL: &str = "MOVE_EMAIL";
    pub const DELETE_EMAIL: &str = "DELETE_EMAIL";
    pub const MARK_READ: &str = "MARK_READ";
    pub const MARK_UNREAD: &str = "MARK_UNREAD";
    pub const CREATE_FOLDER: &str = "CREATE_FOLDER";
    pub const DELETE_FOLDER: &str = "DELETE_FOLDER";
    pub const LOGOUT: &str = "LOGOUT";
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// A control command, client to server.
    Command(ControlCommand),
    /// A send payload. `SEND_EMAIL` announces one; a bare `Message` outside
    /// a send envelope is accepted as a direct submission for compatibility
    /// with older clients.
    Message(MessageRecord),
    /// The single reply to a command, server to client.
    Status(StatusResponse),
    /// Unsolicited new-message notification, server to client.
    Push(StoredMessage),
    /// One element of the initial full sync that follows `CONNECTED`.
    /// Push-class: unsolicited and routed to the client cache.
    Sync(StoredMessage),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ControlCommand {
    pub opcode: String,
    pub args: Vec<String>,
}

impl ControlCommand {
    pub fn new<S: Into<String>>(opcode: &str, args: Vec<S>) -> Self {
        ControlCommand {
            opcode: opcode.to_owned(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StatusResponse {
    /// `*_SUCCESS`, `*_FAILED`, `CONNECTED` or `CONNECTION_FAILED`.
    pub code: String,
    /// Human-readable failure reason; empty on success.
    pub detail: String,
    /// Populated on `LOGIN_SUCCESS` only, keeping login to exactly one
    /// reply record.
    pub profile: Option<UserProfile>,
}

impl StatusResponse {
    pub fn success(code: &str) -> Self {
        StatusResponse {
            code: code.to_owned(),
            detail: String::new(),
            profile: None,
        }
    }

    pub fn failure(code: &str, detail: impl Into<String>) -> Self {
        StatusResponse {
            code: code.to_owned(),
            detail: detail.into(),
            profile: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.code.ends_with("_FAILED") || self.code == "CONNECTION_FAILED"
    }
}
