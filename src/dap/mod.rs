//! Client surface: debugger commands in, engine events out, framed as
//! `Content-Length` JSON messages on stdio.

mod protocol;
mod server;

use std::io::{self, BufReader};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::debugger::DebugEngine;

pub use protocol::{read_message, write_message, DapMessage, DapMessageContent};
pub use server::DapServer;

/// Longest the engine thread sleeps when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Serve requests from stdin until the client disconnects or the stream
/// ends. Requests are read on a separate thread so engine timers keep
/// firing while the client is quiet.
pub fn run_dap_mode(engine: DebugEngine) -> io::Result<()> {
    info!("DAP server starting");

    let (tx, rx) = channel::<DapMessage>();
    thread::spawn(move || {
        let mut stdin = BufReader::new(io::stdin());
        loop {
            match read_message(&mut stdin) {
                Ok(Some(msg)) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "unreadable message");
                    if err.kind() == io::ErrorKind::UnexpectedEof {
                        break;
                    }
                }
            }
        }
        debug!("reader thread exiting");
    });

    let mut server = DapServer::new(engine, io::stdout());
    loop {
        let wait = server
            .engine()
            .next_due()
            .map_or(IDLE_WAIT, |due| due.saturating_duration_since(Instant::now()));

        match rx.recv_timeout(wait) {
            Ok(msg) => {
                if !server.handle(msg)? {
                    break;
                }
                server.tick()?;
            }
            Err(RecvTimeoutError::Timeout) => server.tick()?,
            Err(RecvTimeoutError::Disconnected) => {
                info!("client stream closed");
                break;
            }
        }
    }

    let (engine, _) = server.into_parts();
    engine.shutdown();
    info!("DAP server exiting");
    Ok(())
}
