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

//! The user directory, i.e., the external authentication collaborator.
//!
//! The dispatcher only ever consults this by email+password (or plain email
//! for existence checks); how credentials are stored and validated is the
//! directory's business. The in-memory implementation exists so the stock
//! binary and the tests have something to run against.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::store::model::UserProfile;
use crate::support::error::Error;

/// Failure detail for a bad email/password pair.
///
/// Deliberately does not distinguish "no such user" from "wrong password".
pub const BAD_CREDENTIALS: &str = "Invalid email or password";
pub const DUPLICATE_EMAIL: &str = "Email already exists";
pub const BAD_ADDRESS: &str = "Invalid email address";

pub trait Directory: Send + Sync {
    /// Validate `email`+`password`, returning the user's profile on success
    /// and `Error::Auth` on failure.
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, Error>;

    /// Create a new user. Fails with `Error::Auth` on a duplicate email or a
    /// syntactically invalid address. Does not log the user in.
    fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), Error>;

    /// Look a user up by email without authenticating.
    fn lookup(&self, email: &str) -> Result<Option<UserProfile>, Error>;

    /// Record a successful login at `when`.
    fn record_login(
        &self,
        email: &str,
        when: DateTime<Utc>,
    ) -> Result<(), Error>;
}

/// Minimal syntactic address check: one `@` with a non-empty local part and
/// a non-empty domain.
pub fn is_valid_address(email: &str) -> bool {
    let mut split = email.split('@');
    match (split.next(), split.next(), split.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty()
        },
        _ => false,
    }
}

/// In-memory `Directory`, for tests and self-contained deployments.
///
/// Passwords are compared in plain text. That matches what this directory
/// is for; anything touching real credentials belongs behind the trait in a
/// separate service.
#[derive(Default)]
pub struct MemoryDirectory {
    users: Mutex<HashMap<String, DirectoryEntry>>,
}

struct DirectoryEntry {
    name: String,
    password: String,
    last_login: DateTime<Utc>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        MemoryDirectory::default()
    }

    /// Pre-seed a user, bypassing address validation. Test fixture use.
    pub fn add_user(&self, name: &str, email: &str, password: &str) {
        self.users.lock().unwrap().insert(
            email.to_owned(),
            DirectoryEntry {
                name: name.to_owned(),
                password: password.to_owned(),
                last_login: Utc::now(),
            },
        );
    }
}

impl Directory for MemoryDirectory {
    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, Error> {
        let users = self.users.lock().unwrap();
        match users.get(email) {
            Some(entry) if entry.password == password => Ok(UserProfile {
                name: entry.name.clone(),
                email: email.to_owned(),
                last_login: entry.last_login,
            }),
            _ => Err(Error::Auth(BAD_CREDENTIALS.to_owned())),
        }
    }

    fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), Error> {
        if !is_valid_address(email) {
            return Err(Error::Auth(BAD_ADDRESS.to_owned()));
        }

        let mut users = self.users.lock().unwrap();
        if users.contains_key(email) {
            return Err(Error::Auth(DUPLICATE_EMAIL.to_owned()));
        }

        users.insert(
            email.to_owned(),
            DirectoryEntry {
                name: name.to_owned(),
                password: password.to_owned(),
                last_login: Utc::now(),
            },
        );
        Ok(())
    }

    fn lookup(&self, email: &str) -> Result<Option<UserProfile>, Error> {
        let users = self.users.lock().unwrap();
        Ok(users.get(email).map(|entry| UserProfile {
            name: entry.name.clone(),
            email: email.to_owned(),
            last_login: entry.last_login,
        }))
    }

    fn record_login(
        &self,
        email: &str,
        when: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut users = self.users.lock().unwrap();
        if let Some(entry) = users.get_mut(email) {
            entry.last_login = when;
        }
        Ok(())
    }
}
