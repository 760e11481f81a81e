//! Session management
//!
//! A [`Session`] owns one transport and the two threads that use it: the
//! reader drains device output into a sink, the writer runs the driver script.
//! The threads never raise errors at each other. A failing thread marks the
//! session dead and posts a [`SessionEvent`]; the session manager is the only
//! place that turns an event into a shutdown and a user-visible error.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::reader::{self, LineSink};
use super::state::{SessionState, TaskFlag};
use super::transport::{Parity, Transport, TransportError};
use super::writer;
use crate::script::Step;

/// Pause after each command so the device can process it
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(200);

/// How often `wait` re-checks the session while no event arrives
const WAIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Reader,
    Writer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Read => "reading",
            Operation::Write => "writing",
        })
    }
}

/// Signals from the session threads to the session manager
#[derive(Debug)]
pub enum SessionEvent {
    /// The driver script ran to the end
    WriterDone,
    /// A task hit a transport fault and stopped itself
    Fault {
        task: TaskKind,
        op: Operation,
        error: TransportError,
    },
    /// A task panicked and stopped itself
    Panicked { task: TaskKind },
    /// `close` was called from inside a session thread
    CloseRequested,
    /// The transport has been released
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Error opening serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: TransportError,
    },

    #[error("Serial port {0} is already open")]
    AlreadyOpen(String),

    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Error {op} serial port {port}: {source}")]
    Fault {
        port: String,
        op: Operation,
        #[source]
        source: TransportError,
    },

    #[error("{task:?} task on serial port {port} panicked")]
    Panicked { port: String, task: TaskKind },

    #[error("Session on {0} was cancelled")]
    Cancelled(String),
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    thread_ids: Vec<ThreadId>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One connection to the device plus its reader and writer threads
pub struct Session<T: Transport> {
    transport: Arc<T>,
    state: Arc<SessionState>,
    settle: Duration,
    reader_running: Arc<TaskFlag>,
    writer_running: Arc<TaskFlag>,
    tasks: Mutex<Tasks>,
    events_tx: Mutex<Sender<SessionEvent>>,
    events_rx: Mutex<Receiver<SessionEvent>>,
    /// Serializes start and close
    lifecycle: Mutex<()>,
    cancelled: AtomicBool,
}

impl<T: Transport> Session<T> {
    /// Create a session. Nothing is opened until [`Session::start`].
    pub fn new(transport: T, settle: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            transport: Arc::new(transport),
            state: Arc::new(SessionState::new()),
            settle,
            reader_running: Arc::new(TaskFlag::new()),
            writer_running: Arc::new(TaskFlag::new()),
            tasks: Mutex::new(Tasks::default()),
            events_tx: Mutex::new(tx),
            events_rx: Mutex::new(rx),
            lifecycle: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn port(&self) -> &str {
        self.transport.port()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    #[allow(dead_code)]
    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    #[allow(dead_code)]
    pub fn reader_running(&self) -> bool {
        self.reader_running.is_running()
    }

    #[allow(dead_code)]
    pub fn writer_running(&self) -> bool {
        self.writer_running.is_running()
    }

    /// Open the transport and start the reader, then the writer.
    ///
    /// On error nothing is left open and no thread is running.
    pub fn start<D, S>(&self, driver: D, sink: S) -> Result<(), SessionError>
    where
        D: IntoIterator<Item = Step> + Send + 'static,
        S: LineSink,
    {
        let _lifecycle = lock(&self.lifecycle);
        if self.state.is_open() {
            return Err(SessionError::AlreadyOpen(self.port().to_string()));
        }

        // Events left over from a previous run
        while lock(&self.events_rx).try_recv().is_ok() {}
        self.cancelled.store(false, Ordering::SeqCst);

        self.open_transport()?;
        self.state.mark_open();
        info!("opened port {}", self.port());

        // Reader first so no device output is missed once commands go out.
        // The tasks lock is held across each spawn so a thread that calls
        // `close` right away already finds its own id registered.
        self.reader_running.start();
        let reader = {
            let mut tasks = lock(&self.tasks);
            let transport = self.transport.clone();
            let state = self.state.clone();
            let running = self.reader_running.clone();
            let events = lock(&self.events_tx).clone();
            thread::Builder::new()
                .name("duttest-reader".to_string())
                .spawn(move || reader::run(transport, state, running, events, sink))
                .map(|handle| {
                    tasks.thread_ids = vec![handle.thread().id()];
                    tasks.reader = Some(handle);
                })
        };
        if let Err(e) = reader {
            self.reader_running.request_stop();
            self.shutdown();
            return Err(SessionError::Spawn(e));
        }

        self.writer_running.start();
        let writer = {
            let mut tasks = lock(&self.tasks);
            let transport = self.transport.clone();
            let state = self.state.clone();
            let running = self.writer_running.clone();
            let events = lock(&self.events_tx).clone();
            let settle = self.settle;
            thread::Builder::new()
                .name("duttest-writer".to_string())
                .spawn(move || writer::run(transport, state, running, events, driver, settle))
                .map(|handle| {
                    tasks.thread_ids.push(handle.thread().id());
                    tasks.writer = Some(handle);
                })
        };
        if let Err(e) = writer {
            self.writer_running.request_stop();
            self.shutdown();
            return Err(SessionError::Spawn(e));
        }
        Ok(())
    }

    /// Claim the port: open with odd parity, close, reopen with no parity.
    ///
    /// Some host serial stacks refuse the device on the first open unless a
    /// setting changes between attempts.
    fn open_transport(&self) -> Result<(), SessionError> {
        let open_error = |source| SessionError::Open {
            port: self.port().to_string(),
            source,
        };

        if let Err(e) = self.transport.open(Parity::Odd) {
            self.transport.close();
            return Err(open_error(e));
        }
        self.transport.close();

        if let Err(e) = self.transport.open(Parity::None) {
            self.transport.close();
            return Err(open_error(e));
        }
        if !self.transport.is_open() {
            self.transport.close();
            return Err(open_error(TransportError::NotOpen));
        }
        Ok(())
    }

    /// Block until the script finishes, a task faults, or the session is
    /// closed, then close the session.
    pub fn wait(&self) -> Result<(), SessionError> {
        let outcome = loop {
            let event = lock(&self.events_rx).recv_timeout(WAIT_POLL);
            match event {
                Ok(SessionEvent::WriterDone) => {
                    debug!("Driver script finished on {}", self.port());
                    break Ok(());
                }
                Ok(SessionEvent::Fault { task, op, error }) => {
                    debug!("{:?} task reported a fault", task);
                    break Err(SessionError::Fault {
                        port: self.port().to_string(),
                        op,
                        source: error,
                    });
                }
                Ok(SessionEvent::Panicked { task }) => {
                    break Err(SessionError::Panicked {
                        port: self.port().to_string(),
                        task,
                    });
                }
                Ok(SessionEvent::CloseRequested) | Ok(SessionEvent::Closed) => break Ok(()),
                Err(RecvTimeoutError::Timeout) if self.state.is_open() => continue,
                Err(_) => break Ok(()),
            }
        };

        self.close();

        match outcome {
            Ok(()) if self.cancelled.load(Ordering::SeqCst) => {
                Err(SessionError::Cancelled(self.port().to_string()))
            }
            other => other,
        }
    }

    /// Request shutdown from outside, e.g. on Ctrl-C
    pub fn cancel(&self) {
        info!("Cancellation requested for {}", self.port());
        self.cancelled.store(true, Ordering::SeqCst);
        self.close();
    }

    /// Wait for the writer; unless `writer_only`, also stop and wait for the
    /// reader.
    pub fn join(&self, writer_only: bool) {
        let writer = lock(&self.tasks).writer.take();
        join_task(writer, TaskKind::Writer);

        if !writer_only {
            self.reader_running.request_stop();
            let reader = lock(&self.tasks).reader.take();
            join_task(reader, TaskKind::Reader);
        }
    }

    /// Stop both threads and release the transport. Idempotent.
    ///
    /// Called from a session thread (e.g. by a sink), this only asks the
    /// threads to stop; the thread running [`Session::wait`] finishes the close.
    pub fn close(&self) {
        if self.on_task_thread() {
            self.writer_running.request_stop();
            self.reader_running.request_stop();
            self.state.mark_dead();
            let _ = lock(&self.events_tx).send(SessionEvent::CloseRequested);
            return;
        }

        let _lifecycle = lock(&self.lifecycle);
        if !self.state.is_open() {
            return;
        }
        self.shutdown();
    }

    fn on_task_thread(&self) -> bool {
        let current = thread::current().id();
        lock(&self.tasks).thread_ids.contains(&current)
    }

    /// Caller holds the lifecycle lock
    fn shutdown(&self) {
        debug!("Shutting down session on {}", self.port());

        self.writer_running.request_stop();
        self.join(true);

        self.state.mark_dead();
        self.join(false);

        if self.transport.is_open() {
            self.transport.close();
        }
        self.state.mark_closed();
        lock(&self.tasks).thread_ids.clear();
        info!("closed port: {}", self.port());

        let _ = lock(&self.events_tx).send(SessionEvent::Closed);
    }
}

fn join_task(handle: Option<JoinHandle<()>>, kind: TaskKind) {
    let Some(handle) = handle else { return };
    if handle.thread().id() == thread::current().id() {
        warn!("{:?} task asked to join itself", kind);
        return;
    }
    if handle.join().is_err() {
        error!("{:?} task panicked", kind);
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}
