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

pub mod delivery;
pub mod dispatch;
pub mod session;


use std::io::BufReader;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use self::delivery::DeliveryEngine;
use self::dispatch::Connection;
use self::session::{SessionChannel, SessionRegistry};
use crate::directory::Directory;
use crate::store::mailbox::MailboxStore;
use crate::store::persist::RecordStore;
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

/// Everything shared between connection workers.
///
/// There is deliberately no global server state anywhere; one `Core` is
/// built per server and handed to each worker, which keeps tests able to
/// run any number of independent servers in one process.
pub(crate) struct Core {
    pub(crate) config: Arc<SystemConfig>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) mailboxes: Arc<MailboxStore>,
    pub(crate) sessions: Arc<SessionRegistry>,
    pub(crate) delivery: DeliveryEngine,
}

pub struct Server {
    pub(crate) core: Arc<Core>,
}

impl Server {
    pub fn new(
        config: Arc<SystemConfig>,
        directory: Arc<dyn Directory>,
        persist: Arc<dyn RecordStore>,
    ) -> Self {
        let mailboxes =
            Arc::new(MailboxStore::new(Arc::clone(&persist)));
        let sessions = Arc::new(SessionRegistry::new());
        let delivery = DeliveryEngine::new(
            Arc::clone(&mailboxes),
            Arc::clone(&sessions),
            persist,
        );

        Server {
            core: Arc::new(Core {
                config,
                directory,
                mailboxes,
                sessions,
                delivery,
            }),
        }
    }

    /// Accept connections forever, one worker thread each.
    ///
    /// Only returns if the listener itself fails.
    pub fn run(&self, listener: TcpListener) -> Result<(), Error> {
        info!(
            "Accepting connections on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_owned())
        );

        loop {
            let (socket, peer) = listener.accept()?;
            let log_prefix = peer.to_string();
            let core = Arc::clone(&self.core);

            let write_timeout = Duration::from_secs(
                core.config.net.write_timeout_secs,
            );
            // A stalled peer only ever blocks its own worker and, briefly,
            // a push attempt; the timeout turns "briefly" into a bound.
            if let Err(e) = socket
                .set_write_timeout(Some(write_timeout))
                .and_then(|_| socket.set_nodelay(true))
            {
                warn!("{} Unable to configure socket: {}", log_prefix, e);
            }

            std::thread::spawn(move || {
                info!("{} Connection established", log_prefix);

                let read = match socket.try_clone() {
                    Ok(read_half) => BufReader::new(read_half),
                    Err(e) => {
                        error!("{} Unable to split socket: {}", log_prefix, e);
                        return;
                    },
                };
                let channel: SessionChannel =
                    Arc::new(Mutex::new(Box::new(socket) as Box<_>));

                let mut connection = Connection::new(
                    log_prefix.clone(),
                    read,
                    channel,
                    core,
                );
                match connection.run() {
                    Ok(()) => {
                        info!("{} Normal client disconnect", log_prefix)
                    },
                    Err(e) => warn!(
                        "{} Abnormal client disconnect: {}",
                        log_prefix, e
                    ),
                }
            });
        }
    }
}
