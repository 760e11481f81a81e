//! Shared session flags
//!
//! The only state the reader and writer threads share. Everything is an
//! atomic with `SeqCst` ordering.

use std::sync::atomic::{AtomicBool, Ordering};

/// Open/alive flags for one session.
///
/// `alive` implies `open`. `open` without `alive` only happens while the
/// session is shutting down.
#[derive(Debug, Default)]
pub struct SessionState {
    open: AtomicBool,
    alive: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Transport claimed; both tasks may run
    pub fn mark_open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Flip `alive` to false. Returns true only for the caller that made the
    /// transition, so a fault is reported once even if both tasks fail.
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Transport released
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Running flag for one background task
#[derive(Debug, Default)]
pub struct TaskFlag(AtomicBool);

impl TaskFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
