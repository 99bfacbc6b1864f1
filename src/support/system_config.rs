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

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Postbox.
///
/// This is stored in a file named `postbox.toml`; if the file is absent, the
/// defaults below are used.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SystemConfig {
    /// Network options for the serve loop.
    pub net: NetConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NetConfig {
    /// The address and port to listen on.
    pub bind: String,

    /// Timeout, in seconds, applied to every write on a client socket.
    ///
    /// This bounds how long a stalled client can block a push attempt; once
    /// the write fails, the session is dropped and further mail for that
    /// user simply queues in their mailbox.
    pub write_timeout_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            bind: "0.0.0.0:12345".to_owned(),
            write_timeout_secs: 30,
        }
    }
}
