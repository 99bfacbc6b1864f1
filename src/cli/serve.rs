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

use std::fs;
use std::io::ErrorKind;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

use log::{error, info};

use super::main::ServeSubcommand;
use crate::directory::MemoryDirectory;
use crate::server::Server;
use crate::store::persist::MemoryStore;
use crate::support::system_config::SystemConfig;

// Needs to be a macro and not die! so that errors also reach the log
macro_rules! fatal {
    ($ex:ident, $($stuff:tt)*) => {{
        error!($($stuff)*);
        crate::support::sysexits::$ex.exit()
    }}
}

pub(super) fn serve(cmd: ServeSubcommand) {
    let config_path = cmd
        .config
        .unwrap_or_else(|| Path::new("postbox.toml").to_owned());
    let config = Arc::new(load_config(&config_path));

    let directory = Arc::new(MemoryDirectory::new());
    let persist = Arc::new(MemoryStore::new());
    info!(
        "Using in-memory directory and record store; accounts are created \
         over the wire and state does not survive a restart"
    );

    let listener = match TcpListener::bind(&config.net.bind) {
        Ok(listener) => listener,
        Err(e) => {
            fatal!(EX_UNAVAILABLE, "Unable to bind {}: {}", config.net.bind, e)
        },
    };

    let server = Server::new(config, directory, persist);
    if let Err(e) = server.run(listener) {
        fatal!(EX_IOERR, "Listener failed: {}", e)
    }
}

fn load_config(path: &Path) -> SystemConfig {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(ref e) if ErrorKind::NotFound == e.kind() => {
            info!("{} not found, using default configuration", path.display());
            return SystemConfig::default();
        },
        Err(e) => {
            fatal!(EX_IOERR, "Unable to read {}: {}", path.display(), e)
        },
    };

    match toml::from_str(&text) {
        Ok(config) => config,
        Err(e) => {
            fatal!(EX_CONFIG, "Invalid configuration {}: {}", path.display(), e)
        },
    }
}
