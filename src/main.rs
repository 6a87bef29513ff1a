//! tumblr-grab CLI entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use tumblr_grab::{
    cli::Args,
    error::{exit_codes, Error, Result},
    Config, Cursor, Scraper, StateDb, TumblrApi,
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    match run(args).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) if e.is_cancelled() => {
            // A signal stopped the run; the previous cursor stays persisted.
            ExitCode::from(exit_codes::ABORT as u8)
        }
        Err(e) => {
            tracing::error!("{}", e);
            match e {
                Error::Config(_) | Error::TomlParse(_) => {
                    ExitCode::from(exit_codes::CONFIG_ERROR as u8)
                }
                Error::Api(_) | Error::Json(_) => ExitCode::from(exit_codes::API_ERROR as u8),
                Error::Download(_) | Error::Http(_) => {
                    ExitCode::from(exit_codes::DOWNLOAD_ERROR as u8)
                }
                _ => ExitCode::from(exit_codes::UNEXPECTED_ERROR as u8),
            }
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load_or_default(&args.config)?;
    args.merge_into_config(&mut config);
    config.validate()?;

    let blog = args.blog_host();

    let db = StateDb::open(&args.state)?;
    let api = Arc::new(TumblrApi::new(config.api_key.clone())?);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let cursor = match db.get_cursor(&blog)? {
        Some((time, offset)) => Cursor::resume(time, offset),
        None => Cursor::fresh(),
    };

    let scraper = Scraper::new(api, config);
    let finished = scraper.scrape(&blog, cursor, cancel).await?;

    // Persist only after a fully successful run; any failure above leaves
    // the previous resumable state untouched.
    db.set_cursor(&blog, finished.time, finished.offset)?;

    Ok(())
}

/// Cancel the run on the first termination signal; repeated signals have no
/// further effect.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping crawl");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
