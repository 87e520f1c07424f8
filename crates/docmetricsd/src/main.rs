//! docmetricsd - document-database metrics exporter.
//!
//! Serves Prometheus metrics derived from command replies. Replies are
//! replayed from a fixture directory; see [`fixture::FixtureRunner`].

mod config;
mod exposition;
mod fixture;
mod server;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use config::{Args, Config, init_logging};
use fixture::FixtureRunner;
use server::AppState;

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(config)) {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

async fn async_main(config: Config) -> std::io::Result<()> {
    info!(
        version = docmetrics_core::VERSION,
        naming_version = docmetrics_core::naming::NAMING_VERSION,
        fixtures = %config.fixtures.display(),
        compatible = config.compatible,
        collectors = ?config.collectors,
        "starting"
    );
    let runner = Arc::new(FixtureRunner::new(config.fixtures.clone()));
    if !runner.root().is_dir() {
        error!(path = %runner.root().display(), "fixture directory does not exist");
    }
    let collectors = server::build_collectors(&config, runner);
    let listen = config.listen;
    let app = server::router(Arc::new(AppState::new(config, collectors)));

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}
