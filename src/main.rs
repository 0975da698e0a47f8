mod channel;
mod config;
mod decision;
mod feed_parser;
mod header;
mod http;
mod logging;
mod manager;
mod pidfile;
mod poller;
mod protocol;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use crate::config::Config;
use crate::http::HttpFetcher;
use crate::manager::ChannelManager;
use crate::pidfile::PidFile;
use crate::protocol::ProxyProtocol;

/// Cache-channel invalidation coordinator: a cache-helper process a caching
/// proxy shells out to over stdio (§4.7) to decide whether a cached
/// response is still fresh.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the `[main]` INI configuration file (§6).
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::RotatingFileLogger::init(
        &config.logfile,
        config.log_level,
        config.log_backup,
    ) {
        eprintln!("failed to open logfile {}: {}", config.logfile.display(), e);
        return ExitCode::FAILURE;
    }

    let _pidfile = match PidFile::acquire(config.pidfile.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            log::error!("startup_error {}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match HttpFetcher::new(
        Duration::from_secs(config.fetch_timeout_secs),
        config.http_proxy.as_deref(),
    ) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            log::error!("startup_error can't build http client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!("start_manager");
    let mut manager = ChannelManager::new(config.dbfile.clone(), fetcher, config.extend_pct);
    manager.load();

    let protocol = ProxyProtocol::new();
    match manager.run(protocol).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal_io_error {}", e);
            ExitCode::FAILURE
        }
    }
}
