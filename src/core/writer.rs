//! Writer/driver loop
//!
//! Runs a driver script against the transport, one step at a time. Every
//! `Send` is followed by the settle delay so the device can finish the
//! command before the next one arrives.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::session::{Operation, SessionEvent, TaskKind};
use super::state::{SessionState, TaskFlag};
use super::transport::Transport;
use crate::console;
use crate::script::Step;

/// Granularity of stop checks while sleeping
const STOP_POLL: Duration = Duration::from_millis(20);

/// Sleep for `duration`, returning early (false) once the writer should stop
fn pause(duration: Duration, state: &SessionState, running: &TaskFlag) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if !state.is_alive() || !running.is_running() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Console line announcing a payload, with control characters escaped
fn describe_send(payload: &str) -> String {
    format!("sending\t-> \"{}\"", payload.escape_debug())
}

pub(crate) fn run<T, D>(
    transport: Arc<T>,
    state: Arc<SessionState>,
    running: Arc<TaskFlag>,
    events: Sender<SessionEvent>,
    driver: D,
    settle: Duration,
) where
    T: Transport,
    D: IntoIterator<Item = Step>,
{
    debug!("Writer started on {}", transport.port());

    let completed = panic::catch_unwind(AssertUnwindSafe(|| {
        drive(&*transport, &state, &running, &events, driver, settle)
    }));
    let completed = completed.unwrap_or_else(|_| {
        if state.mark_dead() {
            error!("Writer on {} panicked", transport.port());
            let _ = events.send(SessionEvent::Panicked {
                task: TaskKind::Writer,
            });
        }
        false
    });

    running.request_stop();
    if completed {
        let _ = events.send(SessionEvent::WriterDone);
    }
    debug!("Writer stopped on {}", transport.port());
}

/// Run the script; true when every step went out
fn drive<T, D>(
    transport: &T,
    state: &SessionState,
    running: &TaskFlag,
    events: &Sender<SessionEvent>,
    driver: D,
    settle: Duration,
) -> bool
where
    T: Transport,
    D: IntoIterator<Item = Step>,
{
    let mut steps = driver.into_iter();
    let mut completed = true;

    while state.is_alive() && running.is_running() {
        let Some(step) = steps.next() else { break };

        let (payload, delay) = match step {
            Step::Send(payload) => (payload, settle),
            Step::Raw(payload) => (payload, Duration::ZERO),
            Step::Note(text) => {
                console::info(&text);
                continue;
            }
            Step::Wait(duration) => {
                if !pause(duration, state, running) {
                    completed = false;
                    break;
                }
                continue;
            }
        };

        let line = describe_send(&payload);
        info!("{}", line);
        console::info(&line);
        if let Err(e) = transport.write(payload.as_bytes()) {
            completed = false;
            if state.mark_dead() {
                error!("Write to {} failed: {}", transport.port(), e);
                let _ = events.send(SessionEvent::Fault {
                    task: TaskKind::Writer,
                    op: Operation::Write,
                    error: e,
                });
            }
            break;
        }

        if !pause(delay, state, running) {
            completed = false;
            break;
        }
    }

    // The loop only exits with steps pending when it was stopped
    if !(state.is_alive() && running.is_running()) {
        completed = false;
    }

    // Release the driver before reporting so its cleanup happens-before close
    drop(steps);
    completed
}
