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

use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    /// Run the Postbox server.
    Serve(ServeSubcommand),
    /// Commands which connect to a running Postbox server.
    Remote(RemoteSubcommand),
}

#[derive(StructOpt)]
pub(super) struct ServeSubcommand {
    /// Path to the configuration file
    /// [default: ./postbox.toml, or built-in defaults if absent]
    #[structopt(long, parse(from_os_str))]
    pub(super) config: Option<PathBuf>,
}

#[derive(StructOpt)]
enum RemoteSubcommand {
    /// Check that a server is reachable and speaking the protocol.
    Test(RemoteCommonOptions),
    /// Log in and send a single message.
    Send(RemoteSendSubcommand),
    /// Mirror a user's mailbox and print a folder summary.
    List(RemoteListSubcommand),
}

#[derive(StructOpt)]
pub(super) struct RemoteCommonOptions {
    /// Address of the server.
    #[structopt(short, long, default_value = "localhost:12345")]
    pub(super) address: String,
}

#[derive(StructOpt)]
pub(super) struct RemoteSendSubcommand {
    #[structopt(flatten)]
    pub(super) common: RemoteCommonOptions,

    /// Email address of the sending account.
    #[structopt(long)]
    pub(super) from: String,

    /// Password of the sending account.
    #[structopt(long)]
    pub(super) password: String,

    /// Recipient address.
    #[structopt(long)]
    pub(super) to: String,

    /// Subject line.
    #[structopt(long)]
    pub(super) subject: String,

    /// Message body. If not given, the body is read from standard input.
    pub(super) body: Option<String>,
}

#[derive(StructOpt)]
pub(super) struct RemoteListSubcommand {
    #[structopt(flatten)]
    pub(super) common: RemoteCommonOptions,

    /// Email address of the mailbox to mirror.
    pub(super) user: String,
}

pub fn main() {
    let command = Command::from_args();
    crate::init_simple_log();

    match command {
        Command::Serve(cmd) => super::serve::serve(cmd),
        Command::Remote(RemoteSubcommand::Test(opts)) => {
            super::remote::test(opts)
        },
        Command::Remote(RemoteSubcommand::Send(cmd)) => {
            super::remote::send(cmd)
        },
        Command::Remote(RemoteSubcommand::List(cmd)) => {
            super::remote::list(cmd)
        },
    }
}
