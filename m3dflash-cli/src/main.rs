//! m3dflash CLI - Command-line tool for M3D Micro 3D printers.
//!
//! ## Features
//!
//! - Install firmware images through the printer's bootloader
//! - Report whether the printer runs its firmware or its bootloader
//! - Send single G-code commands, as text or binary frames
//! - Inspect firmware images offline
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    console::style,
    env_logger::Env,
    log::debug,
    std::{env, path::PathBuf},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;

use config::Config;

/// Exit status for a runtime failure.
const EXIT_RUNTIME: i32 = 1;
/// Exit status for a usage error, matching clap's.
const EXIT_USAGE: i32 = 2;
/// Exit status when no printer could be found or opened.
const EXIT_NOT_FOUND: i32 = 4;
/// Exit status when the flash CRC does not match the image.
const EXIT_VERIFY: i32 = 5;

/// Errors raised by the CLI itself rather than the library.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// The arguments were understood but cannot be acted on.
    #[error("{0}")]
    Usage(String),
}

/// m3dflash - Firmware updater for M3D Micro 3D printers.
///
/// Environment variables:
///   M3DFLASH_PORT   - Serial port of the printer
#[derive(Parser)]
#[command(name = "m3dflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    m3dflash update M3D-2015122901.hex\n  \
    m3dflash -p /dev/ttyACM0 status\n  \
    m3dflash send G28")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "M3DFLASH_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Install a firmware image on the printer.
    Update {
        /// Firmware file, named after its version (e.g. M3D-2015122901.hex).
        firmware: PathBuf,
    },

    /// Report whether the printer runs its firmware or its bootloader.
    Status,

    /// Send one G-code command to the firmware and print the reply.
    Send {
        /// Command words, e.g. `M115` or `G28 X`.
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        gcode: Vec<String>,

        /// Send as a binary frame instead of text.
        #[arg(long)]
        binary: bool,
    },

    /// Show information about a firmware image (no printer needed).
    Info {
        /// Firmware file.
        firmware: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List serial ports with an attached printer.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

/// Setup logging based on verbosity; `RUST_LOG` takes precedence.
fn init_logging(cli: &Cli) {
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
        "m3dflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update { firmware } => commands::device::cmd_update(cli, &config, firmware),
        Commands::Status => commands::device::cmd_status(cli, &config),
        Commands::Send { gcode, binary } => {
            commands::device::cmd_send(cli, &config, &gcode.join(" "), *binary)
        },
        Commands::Info { firmware, json } => commands::info::cmd_info(cli, firmware, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
    }
}

/// Port from the command line or environment, then from the config files.
///
/// `None` means auto-detect.
fn resolve_port<'a>(cli: &'a Cli, config: &'a Config) -> Option<&'a str> {
    cli.port.as_deref().or_else(|| config.serial_port())
}

/// Map an error to the process exit status.
fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CliError>().is_some() {
        return EXIT_USAGE;
    }
    match err.downcast_ref::<m3dflash::Error>() {
        Some(
            m3dflash::Error::PortNotFound
            | m3dflash::Error::OpenFailed { .. }
            | m3dflash::Error::LockHeld(_),
        ) => EXIT_NOT_FOUND,
        Some(m3dflash::Error::CrcMismatch { .. }) => EXIT_VERIFY,
        _ => EXIT_RUNTIME,
    }
}

#[cfg(test)]
mod cli_tests {
    use {super::*, anyhow::Context, clap::CommandFactory};

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_update() {
        let cli = Cli::try_parse_from([
            "m3dflash",
            "--port",
            "/dev/ttyACM0",
            "update",
            "M3D-2015122901.hex",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        match cli.command {
            Commands::Update { firmware } => {
                assert_eq!(firmware, PathBuf::from("M3D-2015122901.hex"));
            },
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_cli_parse_send_joins_words() {
        let cli =
            Cli::try_parse_from(["m3dflash", "send", "--binary", "G1", "X-5", "F300"]).unwrap();
        match cli.command {
            Commands::Send { gcode, binary } => {
                assert!(binary);
                assert_eq!(gcode.join(" "), "G1 X-5 F300");
            },
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cli_send_requires_command() {
        assert!(Cli::try_parse_from(["m3dflash", "send"]).is_err());
    }

    #[test]
    fn test_cli_verbosity_and_quiet() {
        let cli = Cli::try_parse_from(["m3dflash", "-vv", "-q", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_cli_global_args_after_subcommand() {
        let cli =
            Cli::try_parse_from(["m3dflash", "list-ports", "--json", "-p", "COM3"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_resolve_port_prefers_cli() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM1".to_string());

        let cli = Cli::try_parse_from(["m3dflash", "-p", "/dev/ttyACM0", "status"]).unwrap();
        assert_eq!(resolve_port(&cli, &config), Some("/dev/ttyACM0"));

        let cli = Cli::try_parse_from(["m3dflash", "status"]).unwrap();
        if cli.port.is_none() {
            assert_eq!(resolve_port(&cli, &config), Some("/dev/ttyACM1"));
            assert_eq!(resolve_port(&cli, &Config::default()), None);
        }
    }

    #[test]
    fn test_exit_codes() {
        let usage = anyhow::Error::from(CliError::Usage("bad".into()));
        assert_eq!(exit_code(&usage), EXIT_USAGE);

        let not_found = anyhow::Error::from(m3dflash::Error::PortNotFound);
        assert_eq!(exit_code(&not_found), EXIT_NOT_FOUND);

        let locked: Result<()> = Err(m3dflash::Error::LockHeld("/dev/ttyACM0".into()))
            .context("Failed to connect to printer");
        assert_eq!(exit_code(&locked.unwrap_err()), EXIT_NOT_FOUND);

        let mismatch: Result<()> = Err(m3dflash::Error::CrcMismatch {
            expected: 1,
            actual: 2,
        })
        .context("Update failed");
        assert_eq!(exit_code(&mismatch.unwrap_err()), EXIT_VERIFY);

        let other = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&other), EXIT_RUNTIME);
    }
}
