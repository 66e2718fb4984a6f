mod cli;
mod config;
mod sandbox;
mod server;
mod shutdown;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, Transport, TRANSPORT_ENV};
use crate::config::Config;
use crate::sandbox::SessionRoot;
use crate::server::Dispatcher;
use crate::tools::{builtin, ToolRegistry, Toolbox};

fn print_help() {
    println!(
        "\
python-toolbox v{}

A tool server that runs, lints, fixes and security-scans Python code,
each call in its own session directory.

USAGE:
    python-toolbox [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: built-in defaults]

OPTIONS:
    -h, --help                Print this help message and exit
    -V, --version             Print version and exit
        --transport <NAME>    Transport to serve on: stdio or tcp

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG                    Log level filter for tracing
                                (e.g. debug, python_toolbox=debug,warn)
    {}    Transport when --transport is not given

TOOLS:
    run_python, check_python, fix_python, security_scan,
    list_installed_packages

EXAMPLES:
    python-toolbox                                  # stdio, built-in defaults
    python-toolbox config/toolbox.toml              # custom config
    python-toolbox --transport tcp                  # listen on [server] listen
    RUST_LOG=debug python-toolbox                   # with debug logging",
        env!("CARGO_PKG_VERSION"),
        TRANSPORT_ENV,
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    let options = match cli::parse_args(std::env::args().skip(1))? {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("python-toolbox v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Serve(options) => options,
    };

    // Logs go to stderr: stdout belongs to the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("python_toolbox=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("python-toolbox v{}", env!("CARGO_PKG_VERSION"));

    let config = match options.config_path.as_deref() {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    let env_transport = std::env::var(TRANSPORT_ENV).ok();
    let transport = Transport::parse(cli::select_transport(
        options.transport.as_deref(),
        env_transport.as_deref(),
        &config.server.transport,
    ))?;

    let root = SessionRoot::create(&config.sandbox.root_parent(), &config.sandbox.root_prefix)
        .context("Cannot create session root")?;
    let root = Arc::new(root);
    info!("Session root: {}", root.path().display());
    info!("Interpreter: {}", config.sandbox.interpreter);

    let listen = config.server.listen.clone();
    let (trigger, shutdown) = shutdown::channel();
    let toolbox = Arc::new(Toolbox::new(config, Arc::clone(&root), shutdown.clone()));
    let mut registry = ToolRegistry::new();
    builtin::register_all(&mut registry, toolbox);
    info!("Tools: {} registered ({})", registry.len(), registry.names().join(", "));

    let dispatcher = Arc::new(Dispatcher::new(registry));
    info!("Transport: {transport}");

    let server = async {
        match transport {
            Transport::Stdio => server::stdio::run(dispatcher, shutdown).await,
            Transport::Tcp => server::tcp::run(&listen, dispatcher, shutdown).await,
        }
    };
    tokio::pin!(server);

    let served = tokio::select! {
        result = &mut server => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, cancelling in-flight calls");
            trigger.fire();
            // Running children are killed and reaped; their responses are still written.
            server.await
        }
    };

    if let Err(e) = root.teardown().await {
        warn!("Failed to remove session root: {e}");
    }

    served?;
    // A pending blocking read on stdin would keep the runtime from shutting down.
    std::process::exit(0)
}
