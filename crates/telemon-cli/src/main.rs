//! telemon - telemetry relay daemon with a stdin console

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use telemon_cli::{cli::Cli, config::load_configuration, console::Console, error::Result};
use telemon_runtime::RuntimeBuilder;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.debug);

    let config = load_configuration(&cli)?;

    if cli.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut runtime = RuntimeBuilder::new(config).build_and_start().await?;
    if let Some(addr) = runtime.local_addr() {
        info!("Listening for incoming TCP connections on {}", addr);
    }

    let console = Console::attach(&runtime).await?;
    tokio::select! {
        result = console.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    runtime.shutdown().await?;
    info!("telemon exited");
    Ok(())
}

/// Setup logging; `RUST_LOG` takes precedence over the flags
fn setup_logging(verbose: bool, debug: bool) {
    let default = if verbose {
        "debug"
    } else if debug {
        "info,telemon_runtime=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
