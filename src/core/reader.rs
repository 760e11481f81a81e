//! Reader loop
//!
//! Drains lines from the transport into a [`LineSink`] until the session dies
//! or the reader is asked to stop. Each read is bounded by the transport's
//! timeout, so a stop request is seen within one timeout interval.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::{debug, error};

use super::session::{Operation, SessionEvent, TaskKind};
use super::state::{SessionState, TaskFlag};
use super::transport::Transport;

/// Destination for device output
pub trait LineSink: Send + 'static {
    /// A chunk of device output, normally one line including its terminator
    fn line(&mut self, text: &str);

    /// Called once when the reader exits
    fn finish(&mut self) {}
}

/// Prints device output to stdout as it arrives
#[derive(Debug, Default)]
pub struct StdoutSink {
    /// Last chunk did not end with a newline
    partial: bool,
}

impl LineSink for StdoutSink {
    fn line(&mut self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
        self.partial = !text.ends_with('\n');
    }

    fn finish(&mut self) {
        if self.partial {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(b"\n");
            let _ = stdout.flush();
            self.partial = false;
        }
    }
}

pub(crate) fn run<T: Transport, S: LineSink>(
    transport: Arc<T>,
    state: Arc<SessionState>,
    running: Arc<TaskFlag>,
    events: Sender<SessionEvent>,
    mut sink: S,
) {
    debug!("Reader started on {}", transport.port());

    let drained = panic::catch_unwind(AssertUnwindSafe(|| {
        drain(&*transport, &state, &running, &events, &mut sink)
    }));
    match drained {
        Ok(()) => sink.finish(),
        // The sink may be half-updated; skip its finish
        Err(_) => {
            if state.mark_dead() {
                error!("Reader on {} panicked", transport.port());
                let _ = events.send(SessionEvent::Panicked {
                    task: TaskKind::Reader,
                });
            }
        }
    }

    running.request_stop();
    debug!("Reader stopped on {}", transport.port());
}

fn drain<T: Transport, S: LineSink>(
    transport: &T,
    state: &SessionState,
    running: &TaskFlag,
    events: &Sender<SessionEvent>,
    sink: &mut S,
) {
    while state.is_alive() && running.is_running() {
        match transport.read_line() {
            // Timeout
            Ok(bytes) if bytes.is_empty() => continue,
            Ok(bytes) => sink.line(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                if state.mark_dead() {
                    error!("Read from {} failed: {}", transport.port(), e);
                    let _ = events.send(SessionEvent::Fault {
                        task: TaskKind::Reader,
                        op: Operation::Read,
                        error: e,
                    });
                }
                break;
            }
        }
    }
}
