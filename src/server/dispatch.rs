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

//! The per-connection command dispatcher.
//!
//! Each accepted connection gets one `Connection` running on its own worker
//! thread. The connection moves through `Unauthenticated` (represented by
//! `identity == None`), `Authenticated` (`identity == Some(..)`), and
//! closed. Every request produces exactly one `Status` reply; push-class
//! records written by the delivery engine or the sync stream are
//! interleaved on the same channel and distinguished by record tag, never
//! by position.
//!
//! Handler failures become failure replies and never terminate the worker.
//! Socket failures terminate this worker only, after which the session (if
//! any) is unregistered.

use std::io::{self, Read};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use super::session::SessionChannel;
use super::Core;
use crate::store::model::{MessageId, MessageRecord};
use crate::support::error::Error;
use crate::wire::frame;
use crate::wire::records::{
    opcodes, ControlCommand, Record, StatusResponse,
};

pub struct Connection {
    log_prefix: String,
    read: Box<dyn Read + Send>,
    channel: SessionChannel,
    core: Arc<Core>,
    /// `Some` iff the connection is in the authenticated state.
    identity: Option<String>,
    closed: bool,
}

impl Connection {
    pub fn new<R: Read + Send + 'static>(
        log_prefix: String,
        read: R,
        channel: SessionChannel,
        core: Arc<Core>,
    ) -> Self {
        Connection {
            log_prefix,
            read: Box::new(read),
            channel,
            core,
            identity: None,
            closed: false,
        }
    }

    /// Run the connection until logout, end-of-stream, or a socket error.
    ///
    /// A clean end-of-stream is a normal disconnect and reports success.
    /// Whatever the outcome, the session registration (if any) is removed
    /// on the way out.
    pub fn run(&mut self) -> Result<(), Error> {
        let result = self.command_loop();

        if let Some(identity) = self.identity.take() {
            self.core.sessions.unregister(&identity, &self.channel);
            info!("{} Session for {} closed", self.log_prefix, identity);
        }

        match result {
            Err(Error::Io(ref e))
                if io::ErrorKind::UnexpectedEof == e.kind() =>
            {
                Ok(())
            },
            r => r,
        }
    }

    fn command_loop(&mut self) -> Result<(), Error> {
        while !self.closed {
            match frame::read_record(&mut self.read)? {
                Record::Command(cmd) => self.handle_command(cmd)?,
                // Legacy path: a bare message is a direct submission
                Record::Message(message) => {
                    let status = self.do_send(message);
                    self.send_status(status)?;
                },
                record => {
                    warn!(
                        "{} Client sent a server-only record: {:?}",
                        self.log_prefix, record
                    );
                    self.send_status(StatusResponse::failure(
                        "COMMAND_FAILED",
                        "Unexpected record",
                    ))?;
                },
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, cmd: ControlCommand) -> Result<(), Error> {
        match cmd.opcode.as_str() {
            opcodes::LOGIN => self.handle_login(&cmd.args),
            opcodes::REGISTER => self.handle_register(&cmd.args),
            opcodes::CONNECT => self.handle_connect(&cmd.args),
            opcodes::SEND_EMAIL => self.handle_send_envelope(),
            opcodes::MOVE_EMAIL => {
                let status = self.mutate(
                    "MOVE_SUCCESS",
                    "MOVE_FAILED",
                    &cmd.args,
                    2,
                    |core, identity, id, args| {
                        core.mailboxes.move_message(identity, id, &args[1])
                    },
                );
                self.send_status(status)
            },
            opcodes::DELETE_EMAIL => {
                let status = self.mutate(
                    "DELETE_SUCCESS",
                    "DELETE_FAILED",
                    &cmd.args,
                    1,
                    |core, identity, id, _| {
                        core.mailboxes.delete_message(identity, id)
                    },
                );
                self.send_status(status)
            },
            opcodes::MARK_READ => {
                let status = self.mutate(
                    "MARK_SUCCESS",
                    "MARK_FAILED",
                    &cmd.args,
                    1,
                    |core, identity, id, _| {
                        core.mailboxes.set_read_state(identity, id, true)
                    },
                );
                self.send_status(status)
            },
            opcodes::MARK_UNREAD => {
                let status = self.mutate(
                    "MARK_SUCCESS",
                    "MARK_FAILED",
                    &cmd.args,
                    1,
                    |core, identity, id, _| {
                        core.mailboxes.set_read_state(identity, id, false)
                    },
                );
                self.send_status(status)
            },
            opcodes::CREATE_FOLDER => {
                let status = self.folder_op(&cmd.args, |core, identity, name| {
                    core.mailboxes.create_folder(identity, name)
                });
                self.send_status(status)
            },
            opcodes::DELETE_FOLDER => {
                let status = self.folder_op(&cmd.args, |core, identity, name| {
                    core.mailboxes.delete_folder(identity, name)
                });
                self.send_status(status)
            },
            opcodes::LOGOUT => self.handle_logout(),
            opcode => {
                warn!("{} Unknown command {:?}", self.log_prefix, opcode);
                self.send_status(StatusResponse::failure(
                    "COMMAND_FAILED",
                    "Unknown command",
                ))
            },
        }
    }

    fn handle_login(&mut self, args: &[String]) -> Result<(), Error> {
        if 2 != args.len() {
            return self.send_status(StatusResponse::failure(
                "LOGIN_FAILED",
                "Invalid credentials",
            ));
        }
        let (email, password) = (&args[0], &args[1]);

        let mut profile =
            match self.core.directory.authenticate(email, password) {
                Ok(profile) => profile,
                Err(e) => {
                    info!(
                        "{} Login failed for {}: {}",
                        self.log_prefix, email, e
                    );
                    return self.send_status(StatusResponse::failure(
                        "LOGIN_FAILED",
                        failure_detail(e),
                    ));
                },
            };

        if let Err(e) = self.core.mailboxes.ensure_mailbox(email) {
            return self.send_status(StatusResponse::failure(
                "LOGIN_FAILED",
                failure_detail(e),
            ));
        }

        let now = Utc::now();
        if let Err(e) = self.core.directory.record_login(email, now) {
            // Not worth failing the login over
            warn!(
                "{} Failed to record login time for {}: {}",
                self.log_prefix, email, e
            );
        } else {
            profile.last_login = now;
        }

        // Re-authenticating under another identity must not leave the old
        // identity's pushes routed to this channel.
        if let Some(previous) = self.identity.take() {
            self.core.sessions.unregister(&previous, &self.channel);
        }
        self.core
            .sessions
            .register(email, Arc::clone(&self.channel));
        self.identity = Some(email.clone());
        info!("{} Logged in as {}", self.log_prefix, email);

        self.send_status(StatusResponse {
            code: "LOGIN_SUCCESS".to_owned(),
            detail: String::new(),
            profile: Some(profile),
        })
    }

    fn handle_register(&mut self, args: &[String]) -> Result<(), Error> {
        if 3 != args.len() {
            return self.send_status(StatusResponse::failure(
                "REGISTER_FAILED",
                "Invalid registration data",
            ));
        }
        let (name, email, password) = (&args[0], &args[1], &args[2]);

        let status = self
            .core
            .directory
            .register(name, email, password)
            .and_then(|_| self.core.mailboxes.ensure_mailbox(email))
            .map(|_| {
                info!("{} Registered {}", self.log_prefix, email);
                StatusResponse::success("REGISTER_SUCCESS")
            })
            .unwrap_or_else(|e| {
                StatusResponse::failure("REGISTER_FAILED", failure_detail(e))
            });
        // Registration does not log the user in
        self.send_status(status)
    }

    /// Identity-string-as-connect: bind this connection to an existing
    /// user's mailbox for pushes and stream the current contents.
    fn handle_connect(&mut self, args: &[String]) -> Result<(), Error> {
        if 1 != args.len() {
            return self.send_status(StatusResponse::failure(
                "CONNECTION_FAILED",
                "Invalid connect data",
            ));
        }
        let identity = &args[0];

        match self.core.directory.lookup(identity) {
            Ok(Some(_)) => (),
            Ok(None) => {
                return self.send_status(StatusResponse::failure(
                    "CONNECTION_FAILED",
                    "User not found",
                ));
            },
            Err(e) => {
                return self.send_status(StatusResponse::failure(
                    "CONNECTION_FAILED",
                    failure_detail(e),
                ));
            },
        }

        if let Err(e) = self.core.mailboxes.ensure_mailbox(identity) {
            return self.send_status(StatusResponse::failure(
                "CONNECTION_FAILED",
                failure_detail(e),
            ));
        }

        if let Some(previous) = self.identity.take() {
            self.core.sessions.unregister(&previous, &self.channel);
        }
        // Register before snapshotting so no delivery can slip between the
        // snapshot and the first push; the client deduplicates by id if a
        // message shows up both in the sync and as a push.
        self.core
            .sessions
            .register(identity, Arc::clone(&self.channel));
        self.identity = Some(identity.clone());
        self.send_status(StatusResponse::success("CONNECTED"))?;

        let messages = self.core.mailboxes.list_all(identity)?;
        info!(
            "{} Connected {} for push, syncing {} messages",
            self.log_prefix,
            identity,
            messages.len()
        );
        for message in messages {
            let mut w = self.channel.lock().unwrap();
            frame::write_record(&mut **w, &Record::Sync(message))?;
        }
        Ok(())
    }

    /// `SEND_EMAIL` announces that the next record is the message payload.
    fn handle_send_envelope(&mut self) -> Result<(), Error> {
        let status = match frame::read_record(&mut self.read)? {
            Record::Message(message) => self.do_send(message),
            _ => StatusResponse::failure("SEND_FAILED", "Invalid email data"),
        };
        self.send_status(status)
    }

    fn do_send(&mut self, message: MessageRecord) -> StatusResponse {
        if self.identity.is_none() {
            return StatusResponse::failure(
                "SEND_FAILED",
                failure_detail(Error::NotLoggedIn),
            );
        }

        match self.core.delivery.deliver(&self.log_prefix, message) {
            Ok(_) => StatusResponse::success("SEND_SUCCESS"),
            Err(e) => {
                StatusResponse::failure("SEND_FAILED", failure_detail(e))
            },
        }
    }

    fn handle_logout(&mut self) -> Result<(), Error> {
        if let Some(identity) = self.identity.take() {
            self.core.sessions.unregister(&identity, &self.channel);
            info!("{} Logged out {}", self.log_prefix, identity);
        }
        self.closed = true;
        self.send_status(StatusResponse::success("LOGOUT_SUCCESS"))
    }

    /// Shared shape of the mutate-by-reference commands: authenticated,
    /// `arg_count` args of which the first is a message id.
    fn mutate(
        &mut self,
        success_code: &str,
        failure_code: &str,
        args: &[String],
        arg_count: usize,
        f: impl FnOnce(
            &Core,
            &str,
            MessageId,
            &[String],
        ) -> Result<(), Error>,
    ) -> StatusResponse {
        let identity = match self.identity {
            Some(ref identity) => identity.clone(),
            None => {
                return StatusResponse::failure(
                    failure_code,
                    failure_detail(Error::NotLoggedIn),
                );
            },
        };

        if args.len() != arg_count {
            return StatusResponse::failure(
                failure_code,
                "Invalid arguments",
            );
        }

        let id = match args[0].parse::<MessageId>() {
            Ok(id) => id,
            Err(_) => {
                return StatusResponse::failure(
                    failure_code,
                    "Invalid message reference",
                );
            },
        };

        match f(&self.core, &identity, id, args) {
            Ok(()) => StatusResponse::success(success_code),
            Err(e) => {
                StatusResponse::failure(failure_code, failure_detail(e))
            },
        }
    }

    fn folder_op(
        &mut self,
        args: &[String],
        f: impl FnOnce(&Core, &str, &str) -> Result<(), Error>,
    ) -> StatusResponse {
        let identity = match self.identity {
            Some(ref identity) => identity.clone(),
            None => {
                return StatusResponse::failure(
                    "FOLDER_FAILED",
                    failure_detail(Error::NotLoggedIn),
                );
            },
        };

        if 1 != args.len() {
            return StatusResponse::failure(
                "FOLDER_FAILED",
                "Invalid arguments",
            );
        }

        match f(&self.core, &identity, &args[0]) {
            Ok(()) => StatusResponse::success("FOLDER_SUCCESS"),
            Err(e) => {
                StatusResponse::failure("FOLDER_FAILED", failure_detail(e))
            },
        }
    }

    fn send_status(&mut self, status: StatusResponse) -> Result<(), Error> {
        let mut w = self.channel.lock().unwrap();
        frame::write_record(&mut **w, &Record::Status(status))
    }
}

/// Reduce an error to the `detail` string of a failure reply.
fn failure_detail(e: Error) -> String {
    match e {
        Error::Auth(detail) => detail,
        e => e.to_string(),
    }
}
