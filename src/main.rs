//! duttest - drive a device under test over a serial port
//!
//! duttest opens the device's serial port, prints everything the device says
//! and, in parallel, sends a script of shell commands with a short settle
//! delay after each one. It is used to exercise firmware command handlers
//! (GPIO, ADC, shell control) by hand or from CI.
//!
//! # Quick Start
//!
//! ```text
//! duttest                        # run the demo suite on the default port
//! duttest -p /dev/ttyUSB0 -s gpio
//! duttest -f my_script.toml      # run a script file
//! duttest -l                     # list built-in suites
//! ```
//!
//! Ctrl-C stops the script, closes the port and exits.

mod config;
mod console;
mod core;
mod script;

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::{Session, SessionError, SerialTransport, StdoutSink};
use crate::script::{ScriptError, Step};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Run,
    List,
    Help,
    Version,
}

/// Command-line options; anything left unset comes from the config file
#[derive(Debug, PartialEq, Eq)]
struct Options {
    action: Action,
    port: Option<String>,
    baud: Option<u32>,
    timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    suite: Option<String>,
    script: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            action: Action::Run,
            port: None,
            baud: None,
            timeout_ms: None,
            settle_ms: None,
            suite: None,
            script: None,
        }
    }
}

impl Options {
    /// Command line overrides config file
    fn apply(&self, config: &mut Config) {
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud = baud;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(settle_ms) = self.settle_ms {
            config.settle_ms = settle_ms;
        }
        if let Some(suite) = &self.suite {
            config.suite = suite.clone();
        }
    }
}

fn print_help() {
    eprintln!("duttest {} - drive a device under test over a serial port", VERSION);
    eprintln!();
    eprintln!("Usage: duttest [OPTIONS]");
    eprintln!();
    eprintln!("Connection options:");
    eprintln!("  -p, --port <PORT>         Serial port (default: {})", crate::core::serial::DEFAULT_PORT);
    eprintln!("  -b, --baud <RATE>         Baud rate (default: 115200)");
    eprintln!("  -t, --timeout-ms <MS>     Line read timeout (default: 2000)");
    eprintln!("  -d, --settle-ms <MS>      Delay after each command (default: 200)");
    eprintln!();
    eprintln!("Script options:");
    eprintln!("  -s, --suite <NAME>        Built-in suite: {}", script::SUITES.join(", "));
    eprintln!("  -f, --script <FILE>       Run a TOML script instead of a suite");
    eprintln!("  -l, --list                List built-in suites");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -v, --version             Show version");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.duttest/config.toml");
    eprintln!("Log file:      ~/.duttest/duttest.log (level via log_level or RUST_LOG)");
}

fn parse_args<I>(args: I) -> Result<Options, String>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options::default();
    let mut args = args.into_iter();

    fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
        args.next().ok_or_else(|| format!("Missing value for {}", flag))
    }

    fn number<N: std::str::FromStr>(text: String, flag: &str) -> Result<N, String> {
        text.parse()
            .map_err(|_| format!("Invalid number for {}: {}", flag, text))
    }

    fn nonzero<N: std::str::FromStr + Default + PartialEq>(
        text: String,
        flag: &str,
    ) -> Result<N, String> {
        let n: N = number(text, flag)?;
        if n == N::default() {
            return Err(format!("{} must be greater than zero", flag));
        }
        Ok(n)
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => options.action = Action::Help,
            "-v" | "--version" => options.action = Action::Version,
            "-l" | "--list" => options.action = Action::List,
            "-p" | "--port" => options.port = Some(value(&mut args, &arg)?),
            "-b" | "--baud" => options.baud = Some(nonzero(value(&mut args, &arg)?, &arg)?),
            "-t" | "--timeout-ms" => {
                options.timeout_ms = Some(nonzero(value(&mut args, &arg)?, &arg)?)
            }
            "-d" | "--settle-ms" => {
                options.settle_ms = Some(number(value(&mut args, &arg)?, &arg)?)
            }
            "-s" | "--suite" => options.suite = Some(value(&mut args, &arg)?),
            "-f" | "--script" => options.script = Some(PathBuf::from(value(&mut args, &arg)?)),
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }

    Ok(options)
}

fn init_logging(config: &Config) {
    let Some(log_path) = Config::log_path() else {
        return;
    };

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_names(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn load_steps(options: &Options, config: &Config) -> Result<Vec<Step>, ScriptError> {
    match &options.script {
        Some(path) => script::load(path),
        None => script::suite(&config.suite)
            .ok_or_else(|| ScriptError::UnknownSuite(config.suite.clone())),
    }
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(e) => {
            console::error(&e);
            std::process::exit(2);
        }
    };

    match options.action {
        Action::Help => {
            print_help();
            return Ok(());
        }
        Action::Version => {
            eprintln!("duttest {}", VERSION);
            return Ok(());
        }
        Action::List => {
            for name in script::SUITES {
                println!("{}", name);
            }
            return Ok(());
        }
        Action::Run => {}
    }

    let mut config = Config::load().context("loading configuration")?;
    options.apply(&mut config);
    config.validate().context("checking configuration")?;
    init_logging(&config);
    info!("duttest {} starting", VERSION);
    info!("Port: {} @ {} baud", config.port, config.baud);

    let steps = load_steps(&options, &config)?;
    info!("Driver script: {} steps", steps.len());

    run(&config, steps)
}

/// Run one session to completion. Returns only after the port is closed.
fn run(config: &Config, steps: Vec<Step>) -> anyhow::Result<()> {
    let session = Arc::new(Session::new(
        SerialTransport::new(config.serial()),
        config.settle(),
    ));

    {
        let session = session.clone();
        ctrlc::set_handler(move || session.cancel()).context("installing Ctrl-C handler")?;
    }

    if let Err(e) = session.start(steps, StdoutSink::default()) {
        error!("{}", e);
        return Err(e.into());
    }
    console::info(format!("opened port {}", session.port()));

    match session.wait() {
        Ok(()) => {
            console::info(format!("closed port: {}", session.port()));
            console::info("Bye.");
            Ok(())
        }
        Err(SessionError::Cancelled(port)) => {
            info!("Session on {} cancelled by user", port);
            console::info(format!("closed port: {}", port));
            console::info("Quitting - keyboard interrupt.");
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
