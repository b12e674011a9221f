//! # wlpeek - minimal Wayland client
//!
//! Maps a solid-colour toplevel window, watches the clipboard selection, or
//! both. See the library crate for the individual components.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use wlpeek::{ClientConfig, LoopExit, Mode, Session, ShutdownFlag, StartupError};

#[derive(Parser)]
#[command(name = "wlpeek")]
#[command(about = "A minimal Wayland client: toplevel window and clipboard selection watcher")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// What to run
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Toplevel window title
    #[arg(long)]
    title: Option<String>,

    /// Do not request fullscreen
    #[arg(long)]
    windowed: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("Starting wlpeek {}", wlpeek::VERSION);

    match run(cli) {
        Ok(exit) => ExitCode::from(exit.exit_code()),
        Err(err) => {
            match err.downcast_ref::<StartupError>() {
                Some(StartupError::MissingGlobals(missing)) => {
                    for iface in missing {
                        error!("missing required global: {}", iface);
                    }
                }
                _ => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = ClientConfig::load(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?;
            info!("Configuration loaded from: {}", path.display());
            config
        }
        None => ClientConfig::default(),
    };

    // Override config with CLI flags
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(title) = &cli.title {
        config.window.title = title.clone();
    }
    if cli.windowed {
        config.window.fullscreen = false;
    }
    config.validate()?;

    Ok(config)
}

fn run(cli: Cli) -> Result<LoopExit> {
    let config = load_config(&cli)?;
    let mode = config.mode;
    info!("Mode: {:?}", mode);

    let mut session = Session::connect(config)?;
    session.discover()?;

    if mode.wants_window() {
        session.create_window()?;
    }
    if mode.wants_clipboard() {
        session.watch_selection()?;
    }

    let shutdown = ShutdownFlag::new();
    if let Err(err) = shutdown.install_signal_handler(session.signal_waker()) {
        warn!("could not install signal handler: {}", err);
    }

    let exit = session.run(&shutdown);
    match &exit {
        LoopExit::Signal | LoopExit::CloseRequested => info!("wlpeek shut down: {:?}", exit),
        LoopExit::Fatal(reason) | LoopExit::Transport(reason) => error!("wlpeek stopped: {}", reason),
    }
    Ok(exit)
}
