mod cli;
mod dotenv;
mod error;
mod logging;
mod serve;

use clap::Parser;
use cli::Cli;
use std::path::Path;

fn main() {
    // Before the runtime exists: the loader mutates the process environment.
    let loaded = dotenv::load_dotenv(Path::new(".env"));

    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);
    if loaded > 0 {
        tracing::debug!(count = loaded, "Loaded variables from .env");
    }

    let config = match cli.relay_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            error::handle_error(e.into());
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => error::handle_error(e.into()),
    };

    if let Err(e) = runtime.block_on(serve::run(config)) {
        tracing::error!(error = %e, "Relay stopped with an error");
        error::handle_error(e);
    }
}
