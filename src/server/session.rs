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

//! The session registry: identity to live output channel.
//!
//! Not a queue. Only the most recent channel registered for an identity is
//! retained; a second login simply supersedes the first session's handle.
//! Entries are removed on logout, on end-of-stream, or lazily when a push
//! write fails.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// The write half of a connection, shared between the connection's own
/// dispatcher (replies) and the delivery engine (pushes). The mutex is what
/// keeps a push from tearing a concurrently written reply.
pub type SessionChannel = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionChannel>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// Associate `identity` with `channel`, superseding any prior entry.
    /// Only to be called after the identity has authenticated.
    pub fn register(&self, identity: &str, channel: SessionChannel) {
        self.sessions
            .lock()
            .unwrap()
            .insert(identity.to_owned(), channel);
    }

    /// Remove the entry for `identity`, but only if it still refers to
    /// `channel`. A worker cleaning up a dead connection must not evict the
    /// session of a newer login that superseded it.
    pub fn unregister(&self, identity: &str, channel: &SessionChannel) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(current) = sessions.get(identity) {
            if Arc::ptr_eq(current, channel) {
                sessions.remove(identity);
            }
        }
    }

    pub fn lookup(&self, identity: &str) -> Option<SessionChannel> {
        self.sessions.lock().unwrap().get(identity).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn channel() -> SessionChannel {
        Arc::new(Mutex::new(Box::new(Vec::<u8>::new()) as Box<_>))
    }

    #[test]
    fn latest_registration_wins() {
        let registry = SessionRegistry::new();
        let first = channel();
        let second = channel();

        registry.register("dib@example.com", Arc::clone(&first));
        registry.register("dib@example.com", Arc::clone(&second));

        let looked_up = registry.lookup("dib@example.com").unwrap();
        assert!(Arc::ptr_eq(&second, &looked_up));
    }

    #[test]
    fn stale_unregister_leaves_newer_session_alone() {
        let registry = SessionRegistry::new();
        let first = channel();
        let second = channel();

        registry.register("dib@example.com", Arc::clone(&first));
        registry.register("dib@example.com", Arc::clone(&second));

        // The first connection's worker shuts down late
        registry.unregister("dib@example.com", &first);
        assert!(registry.lookup("dib@example.com").is_some());

        registry.unregister("dib@example.com", &second);
        assert!(registry.lookup("dib@example.com").is_none());
    }
}
