//! serxfer CLI - XMODEM file transfer over serial lines.
//!
//! ## Features
//!
//! - Send and receive files with XMODEM or XMODEM-1K
//! - In-memory loopback self-test
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use serxfer::Mode;
use std::{env, path::PathBuf, process::ExitCode};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors with a dedicated exit status.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user backed out of a prompt; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit status for an error bubbling out of a command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// serxfer - XMODEM / XMODEM-1K sender and receiver.
///
/// Environment variables:
///   SERXFER_PORT              - Default serial port
///   SERXFER_BAUD              - Default baud rate (default: 115200)
///   SERXFER_TIMEOUT           - Per-read timeout in seconds
///   SERXFER_RETRIES           - Retry budget per packet
///   SERXFER_MODE              - Transfer mode (xmodem, xmodem1k)
///   SERXFER_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "serxfer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (prompted for if not specified).
    #[arg(short, long, global = true, env = "SERXFER_PORT")]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "SERXFER_BAUD")]
    pub baud: Option<u32>,

    /// Seconds to wait for each expected byte.
    #[arg(long, global = true, env = "SERXFER_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per packet before the transfer is aborted.
    #[arg(long, global = true, env = "SERXFER_RETRIES")]
    pub retries: Option<u32>,

    /// Byte used to pad the last block (decimal or 0x-prefixed hex).
    #[arg(long, global = true, value_parser = parse_byte, value_name = "BYTE")]
    pub pad: Option<u8>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SERXFER_NON_INTERACTIVE")]
    pub non_interactive: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a file to a waiting receiver.
    Send {
        /// File to send.
        file: PathBuf,

        /// Transfer mode: xmodem (128-byte blocks) or xmodem1k (1024-byte blocks).
        #[arg(short, long, env = "SERXFER_MODE", value_parser = parse_mode)]
        mode: Option<Mode>,
    },

    /// Receive a file from a sender.
    Receive {
        /// Destination file.
        file: PathBuf,

        /// Request the 8-bit checksum instead of CRC-16.
        #[arg(long)]
        checksum: bool,

        /// Remove trailing pad bytes from the received data.
        #[arg(long)]
        strip_padding: bool,
    },

    /// Run sender and receiver against each other in memory.
    Loopback {
        /// File to push through the loop (random-looking data if omitted).
        file: Option<PathBuf>,

        /// Transfer mode: xmodem or xmodem1k.
        #[arg(short, long, env = "SERXFER_MODE", value_parser = parse_mode)]
        mode: Option<Mode>,

        /// Size of the generated payload when no file is given.
        #[arg(long, default_value = "4096")]
        size: usize,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a transfer mode name.
fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse::<Mode>()
        .map_err(|e| e.to_string())
}

/// Parse a byte given in decimal or 0x-prefixed hex.
fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let parsed = match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("Invalid byte '{s}': {e}"))
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "serxfer v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Send { file, mode } => commands::transfer::cmd_send(cli, &config, file, *mode),
        Commands::Receive {
            file,
            checksum,
            strip_padding,
        } => commands::transfer::cmd_receive(cli, &config, file, *checksum, *strip_padding),
        Commands::Loopback { file, mode, size } => {
            commands::loopback::cmd_loopback(cli, &config, file.as_deref(), *mode, *size)
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_send() {
        let cli = Cli::try_parse_from(["serxfer", "send", "fw.bin", "--mode", "xmodem1k"]).unwrap();
        match cli.command {
            Commands::Send { file, mode } => {
                assert_eq!(file, PathBuf::from("fw.bin"));
                assert_eq!(mode, Some(Mode::Extended));
            },
            _ => panic!("Expected Send command"),
        }
    }

    #[test]
    fn test_cli_parse_send_mode_aliases() {
        for (arg, expected) in [
            ("xmodem", Mode::Classic),
            ("1k", Mode::Extended),
            ("classic", Mode::Classic),
        ] {
            let cli = Cli::try_parse_from(["serxfer", "send", "f", "-m", arg]).unwrap();
            match cli.command {
                Commands::Send { mode, .. } => assert_eq!(mode, Some(expected)),
                _ => panic!("Expected Send command"),
            }
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["serxfer", "send", "f", "--mode", "zmodem"]).is_err());
    }

    #[test]
    fn test_cli_parse_receive() {
        let cli =
            Cli::try_parse_from(["serxfer", "receive", "out.bin", "--checksum", "--strip-padding"])
                .unwrap();
        match cli.command {
            Commands::Receive {
                file,
                checksum,
                strip_padding,
            } => {
                assert_eq!(file, PathBuf::from("out.bin"));
                assert!(checksum);
                assert!(strip_padding);
            },
            _ => panic!("Expected Receive command"),
        }
    }

    #[test]
    fn test_cli_parse_loopback_defaults() {
        let cli = Cli::try_parse_from(["serxfer", "loopback"]).unwrap();
        match cli.command {
            Commands::Loopback { file, mode, size } => {
                assert!(file.is_none());
                assert!(mode.is_none());
                assert_eq!(size, 4096);
            },
            _ => panic!("Expected Loopback command"),
        }
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["serxfer", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["serxfer", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "serxfer",
            "-p",
            "/dev/ttyUSB1",
            "-b",
            "9600",
            "--timeout",
            "5",
            "--retries",
            "3",
            "--pad",
            "0xFF",
            "-vv",
            "--non-interactive",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(cli.baud, Some(9600));
        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.retries, Some(3));
        assert_eq!(cli.pad, Some(0xFF));
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["serxfer"]).is_err());
    }

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("26"), Ok(26));
        assert_eq!(parse_byte("0x1A"), Ok(0x1A));
        assert_eq!(parse_byte("0X00"), Ok(0));
        assert!(parse_byte("256").is_err());
        assert!(parse_byte("0xZZ").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code_for(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
        let transfer: anyhow::Error = serxfer::Error::NegotiationTimeout.into();
        assert_eq!(exit_code_for(&transfer), 1);
    }
}
