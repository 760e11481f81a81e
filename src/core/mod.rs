//! Serial session core.
//!
//! - **transport**: the contract the session needs from a connection
//! - **serial**: `serialport`-backed transport
//! - **state**: atomic flags shared by the session threads
//! - **reader** / **writer**: the two session threads
//! - **session**: open, start, wait and coordinated shutdown
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Transport (Arc, shared)
//! ├── SessionState (open / alive)
//! ├── reader thread ── read_line ──▶ LineSink
//! └── writer thread ◀── driver Steps ── write + settle delay
//!        │
//!        └── faults ──▶ SessionEvent channel ──▶ Session::wait ──▶ close
//! ```

pub mod reader;
pub mod serial;
pub mod session;
pub mod state;
pub mod transport;
mod writer;

#[cfg(test)]
pub mod testing;

pub use reader::StdoutSink;
pub use serial::SerialTransport;
pub use session::{Session, SessionError};
