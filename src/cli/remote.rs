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

use std::io::Read;
use std::time::Duration;

use super::main::{
    RemoteCommonOptions, RemoteListSubcommand, RemoteSendSubcommand,
};
use crate::client::Client;
use crate::store::model::MessageRecord;
use crate::support::error::Error;
use crate::support::sysexits::*;

fn connect(opts: &RemoteCommonOptions) -> Client {
    match Client::connect(opts.address.as_str()) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Unable to connect to {}: {}", opts.address, e);
            EX_UNAVAILABLE.exit()
        },
    }
}

pub(super) fn test(opts: RemoteCommonOptions) {
    let client = connect(&opts);
    match client.logout() {
        Ok(()) => println!("Server at {} is up", opts.address),
        Err(e) => {
            eprintln!("Server at {} is not speaking the protocol: {}", opts.address, e);
            EX_UNAVAILABLE.exit()
        },
    }
}

pub(super) fn send(cmd: RemoteSendSubcommand) {
    let client = connect(&cmd.common);

    if let Err(e) = client.login(&cmd.from, &cmd.password) {
        eprintln!("Login failed: {}", e);
        let ex = match e {
            Error::Auth(..) => EX_NOUSER,
            _ => EX_UNAVAILABLE,
        };
        ex.exit()
    }

    let body = match cmd.body {
        Some(body) => body,
        None => {
            let mut body = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut body) {
                eprintln!("Unable to read message body: {}", e);
                EX_IOERR.exit()
            }
            body
        },
    };

    if let Err(e) = client.send(MessageRecord {
        from: cmd.from,
        to: cmd.to.clone(),
        subject: cmd.subject,
        body,
    }) {
        eprintln!("Send failed: {}", e);
        EX_UNAVAILABLE.exit()
    }

    // Best effort; the message is already accepted
    let _ = client.logout();
    println!("Sent to {}", cmd.to);
}

pub(super) fn list(cmd: RemoteListSubcommand) {
    let client = connect(&cmd.common);

    if let Err(e) = client.connect_for_push(&cmd.user) {
        eprintln!("Unable to mirror {}: {}", cmd.user, e);
        let ex = match e {
            Error::Rejected { .. } => EX_NOUSER,
            _ => EX_UNAVAILABLE,
        };
        ex.exit()
    }

    // The sync streams in behind the CONNECTED acknowledgement; wait for
    // the mirror to stop growing before reading it.
    let mut count = client.message_count();
    loop {
        std::thread::sleep(Duration::from_millis(250));
        let now = client.message_count();
        if now == count {
            break;
        }
        count = now;
    }

    for name in client.folders() {
        let folder = client.folder(&name);
        println!(
            "{}: {} messages, {} unread",
            folder.name,
            folder.messages.len(),
            folder.unread()
        );
    }
}
