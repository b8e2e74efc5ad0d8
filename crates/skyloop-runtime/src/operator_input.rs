//! Background listener feeding operator text into the [`CommandMailbox`].
//!
//! Line reads block, so they run on a dedicated OS thread that is never
//! joined.  A Tokio task drains whatever that thread has read every
//! [`DRAIN_INTERVAL`] and posts it to the mailbox, until shutdown is
//! signalled or the input closes.  The control loop never waits on input.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mailbox::CommandMailbox;

/// How often pending input is moved into the mailbox.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Start listening on `reader`.
///
/// The returned task finishes when `shutdown` turns `true` (or its sender is
/// dropped) or when `reader` reaches end of input.  The reader thread itself
/// may stay blocked in a read until the process exits.
pub fn spawn_listener<R>(
    reader: R,
    mailbox: CommandMailbox,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>();
    let spawned = std::thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || read_lines(reader, tx));
    if let Err(e) = spawned {
        warn!(error = %e, "could not start operator input thread; commands will not change");
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("operator listener stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if !drain(&rx, &mailbox) {
                        info!("operator input closed");
                        return;
                    }
                }
            }
        }
    })
}

fn read_lines<R: BufRead>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                if tx.send(line.clone()).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read operator input");
                return;
            }
        }
    }
}

/// Post everything buffered so far.  `false` once the reader thread is gone
/// and its buffer is empty.
fn drain(rx: &Receiver<String>, mailbox: &CommandMailbox) -> bool {
    loop {
        match rx.try_recv() {
            Ok(line) => {
                if mailbox.post(&line) {
                    info!(command = %line.trim(), "operator command received");
                }
            }
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}
