//! In-memory transports and sinks for session tests

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::reader::LineSink;
use super::transport::{Parity, Result, Transport, TransportError};
use crate::script::Step;

/// Shared, ordered record of calls
pub type CallLog = Arc<Mutex<Vec<String>>>;

const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Scriptable transport.
///
/// Reads time out after 20 ms unless echo is enabled and a written payload is
/// due. Failures can be injected on a given open or write attempt, or on every
/// read from some point on.
pub struct StubTransport {
    port: String,
    open: AtomicBool,
    fail_open_on: Option<usize>,
    fail_write_on: Option<usize>,
    fail_reads: AtomicBool,
    echo: Option<Duration>,
    pending: Mutex<VecDeque<(Instant, Vec<u8>)>>,
    written: Mutex<Vec<String>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    log: CallLog,
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            port: "/dev/ttySTUB0".to_string(),
            open: AtomicBool::new(false),
            fail_open_on: None,
            fail_write_on: None,
            fail_reads: AtomicBool::new(false),
            echo: None,
            pending: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the `n`th open attempt (1-based)
    pub fn fail_open_on(mut self, n: usize) -> Self {
        self.fail_open_on = Some(n);
        self
    }

    /// Fail the `n`th write attempt (1-based)
    pub fn fail_write_on(mut self, n: usize) -> Self {
        self.fail_write_on = Some(n);
        self
    }

    /// Read back every written payload after `delay`
    pub fn echo(mut self, delay: Duration) -> Self {
        self.echo = Some(delay);
        self
    }

    /// Queue device output that is readable as soon as the port opens
    pub fn greeting(mut self, text: &str) -> Self {
        self.pending
            .get_mut()
            .unwrap()
            .push_back((Instant::now(), text.as_bytes().to_vec()));
        self
    }

    /// Make every subsequent read report a disconnect
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Payloads that were written successfully
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }

    fn next_due(&self) -> Option<Vec<u8>> {
        let mut pending = self.pending.lock().unwrap();
        match pending.front() {
            Some((due, _)) if *due <= Instant::now() => pending.pop_front().map(|(_, data)| data),
            _ => None,
        }
    }
}

impl Transport for StubTransport {
    fn open(&self, parity: Parity) -> Result<()> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(format!("open:{:?}", parity));
        if self.fail_open_on == Some(attempt) {
            return Err(TransportError::Open {
                port: self.port.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "device busy"),
            });
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.record("close".to_string());
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn read_line(&self) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected);
            }
            if !self.is_open() {
                return Err(TransportError::NotOpen);
            }
            if let Some(line) = self.next_due() {
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_write_on == Some(attempt) {
            self.record("write-failed".to_string());
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let text = String::from_utf8_lossy(data).into_owned();
        self.record(format!("write:{}", text.trim_end()));
        self.written.lock().unwrap().push(text);
        if let Some(delay) = self.echo {
            self.pending
                .lock()
                .unwrap()
                .push_back((Instant::now() + delay, data.to_vec()));
        }
        Ok(data.len())
    }

    fn port(&self) -> &str {
        &self.port
    }
}

/// Collects lines; logs `reader-stopped` when the reader finishes
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
    log: Option<CallLog>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            log: None,
        }
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::new()
        }
    }

    pub fn lines(&self) -> Arc<Mutex<Vec<String>>> {
        self.lines.clone()
    }
}

impl LineSink for RecordingSink {
    fn line(&mut self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }

    fn finish(&mut self) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push("reader-stopped".to_string());
        }
    }
}

/// Driver script that logs `writer-stopped` when the writer drops it
pub struct RecordingDriver {
    steps: std::vec::IntoIter<Step>,
    log: CallLog,
}

impl RecordingDriver {
    pub fn new(steps: Vec<Step>, log: CallLog) -> Self {
        Self {
            steps: steps.into_iter(),
            log,
        }
    }
}

impl Iterator for RecordingDriver {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        self.steps.next()
    }
}

impl Drop for RecordingDriver {
    fn drop(&mut self) {
        self.log.lock().unwrap().push("writer-stopped".to_string());
    }
}
