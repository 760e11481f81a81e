//! Driver scripts
//!
//! A script is an ordered list of [`Step`]s fed to the session's writer
//! thread. Scripts come from the built-in suites in [`suites`] or from a TOML
//! file:
//!
//! ```toml
//! [[step]]
//! note = "Set an output to floating."
//!
//! [[step]]
//! send = "gpio:configure:porth:pin2:output:floating"
//!
//! [[step]]
//! send = "\u0004"      # sent without a line terminator
//! terminate = false
//!
//! [[step]]
//! wait_ms = 1500
//! ```

pub mod suites;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use suites::{suite, SUITES};

/// Device line terminator
pub const LINE_END: &str = "\r\n";

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse script: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Step {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Unknown suite '{0}'")]
    UnknownSuite(String),
}

/// One action of a driver script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write the payload, then wait the settle delay
    Send(String),
    /// Write the payload with no settle delay
    Raw(String),
    /// Informational message for the operator
    Note(String),
    /// Pause the driver
    Wait(Duration),
}

impl Step {
    /// A command followed by the device line terminator
    pub fn send(command: &str) -> Self {
        Step::Send(format!("{}{}", command, LINE_END))
    }

    /// A payload sent exactly as given
    pub fn send_bare(payload: &str) -> Self {
        Step::Send(payload.to_string())
    }

    pub fn raw(payload: &str) -> Self {
        Step::Raw(payload.to_string())
    }

    pub fn note(text: &str) -> Self {
        Step::Note(text.to_string())
    }

    pub fn wait_ms(ms: u64) -> Self {
        Step::Wait(Duration::from_millis(ms))
    }
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    step: Vec<StepEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepEntry {
    send: Option<String>,
    raw: Option<String>,
    note: Option<String>,
    wait_ms: Option<u64>,
    #[serde(default = "default_terminate")]
    terminate: bool,
}

fn default_terminate() -> bool {
    true
}

impl StepEntry {
    fn into_step(self, index: usize) -> Result<Step, ScriptError> {
        let actions = [
            self.send.is_some(),
            self.raw.is_some(),
            self.note.is_some(),
            self.wait_ms.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if actions != 1 {
            return Err(ScriptError::InvalidStep {
                index,
                reason: "expected exactly one of send, raw, note, wait_ms".to_string(),
            });
        }

        let terminator = if self.terminate { LINE_END } else { "" };
        let step = if let Some(text) = self.send {
            Step::Send(format!("{}{}", text, terminator))
        } else if let Some(text) = self.raw {
            Step::Raw(format!("{}{}", text, terminator))
        } else if let Some(text) = self.note {
            Step::Note(text)
        } else {
            Step::wait_ms(self.wait_ms.unwrap_or_default())
        };
        Ok(step)
    }
}

/// Parse a TOML script
pub fn parse(content: &str) -> Result<Vec<Step>, ScriptError> {
    let file: ScriptFile = toml::from_str(content)?;
    file.step
        .into_iter()
        .enumerate()
        .map(|(i, entry)| entry.into_step(i + 1))
        .collect()
}

/// Load a TOML script from disk
pub fn load(path: &Path) -> Result<Vec<Step>, ScriptError> {
    let content = fs::read_to_string(path).map_err(|source| ScriptError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let steps = parse(
            r#"
            [[step]]
            note = "Testing help command"

            [[step]]
            send = "help"

            [[step]]
            send = "\u0004"
            terminate = false

            [[step]]
            raw = "resetpins"

            [[step]]
            wait_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(
            steps,
            vec![
                Step::note("Testing help command"),
                Step::send("help"),
                Step::send_bare("\u{4}"),
                Step::raw("resetpins\r\n"),
                Step::wait_ms(500),
            ]
        );
    }

    #[test]
    fn test_empty_script() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_step_with_two_actions_is_rejected() {
        let err = parse(
            r#"
            [[step]]
            send = "help"

            [[step]]
            send = "adc:start"
            wait_ms = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidStep { index: 2, .. }));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = parse("[[step]]\nsned = \"help\"\n").unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/duttest/script.toml")).unwrap_err();
        assert!(matches!(err, ScriptError::Read { .. }));
    }
}
