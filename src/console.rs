//! Operator-facing messages on stderr
//!
//! Device output owns stdout; everything the harness itself says goes to
//! stderr, colored when stderr is a terminal.

use std::fmt::Display;
use std::io::{self, Write};

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::tty::IsTty;
use crossterm::execute;

fn emit(color: Color, tag: &str, message: &dyn Display) {
    let mut stderr = io::stderr().lock();
    if stderr.is_tty() {
        let _ = execute!(
            stderr,
            SetForegroundColor(color),
            Print(tag),
            ResetColor,
            Print(format!(" {}\r\n", message))
        );
    } else {
        let _ = writeln!(stderr, "{} {}", tag, message);
        let _ = stderr.flush();
    }
}

pub fn info(message: impl Display) {
    emit(Color::Green, "[info]", &message);
}

pub fn error(message: impl Display) {
    emit(Color::Red, "[error]", &message);
}
