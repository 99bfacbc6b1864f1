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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Message not found")]
    NotFound,
    #[error("No such folder")]
    UnknownFolder,
    #[error("No such user")]
    UnknownUser,
    #[error("Folder is not empty")]
    FolderNotEmpty,
    #[error("System folders cannot be deleted")]
    SystemFolder,
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Timed out waiting for server reply")]
    Timeout,
    #[error("Record exceeds maximum size")]
    FrameTooLarge,
    #[error("Unexpected record on the wire")]
    UnexpectedRecord,
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Server rejected command: {code}: {detail}")]
    Rejected { code: String, detail: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Cbor(#[from] serde_cbor::error::Error),
}
