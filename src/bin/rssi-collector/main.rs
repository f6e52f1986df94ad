mod args;

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use rssi_collector::{
    config::CollectorConfig,
    db::{PgSink, SqliteSink},
    error::{ConfigError, PersistError, PipelineError, ScannerError},
    logging,
    persistence::{LogSink, RecordSink},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_RADIO: u8 = 2;
const EXIT_PERSISTENCE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_format) {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    if let Err(e) = run(args).await {
        error!("{e:#}");
        return ExitCode::from(exit_code(&e));
    }

    ExitCode::from(0)
}

async fn run(args: Args) -> Result<()> {
    let config = args
        .collector_config()
        .context("invalid configuration")?;

    let sink: Box<dyn RecordSink> = if args.dry_run {
        info!("dry run, records will only be logged");
        Box::new(LogSink)
    } else if let Some(path) = &args.sqlite_path {
        let sink = SqliteSink::connect(path, args.database_table.clone())
            .await
            .context("failed to open local database")?;
        Box::new(sink)
    } else {
        let database_url = args
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)?;
        let sink = PgSink::connect(database_url, args.database_table.clone())
            .await
            .context("failed to connect to database")?;
        Box::new(sink)
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    info!(
        installation_id = %config.installation_id,
        adapter = ?config.adapter,
        "starting collector"
    );

    start(config, sink, shutdown).await
}

#[cfg(target_os = "linux")]
async fn start(
    config: CollectorConfig,
    sink: Box<dyn RecordSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    use rssi_collector::{
        pipeline::Pipeline,
        radio::{LinuxHci, RadioSession},
    };

    let session = RadioSession::new(LinuxHci::new()).with_adapter(config.adapter);

    Pipeline::new(config)
        .run(session, sink, shutdown)
        .await
        .context("collector stopped")
}

#[cfg(not(target_os = "linux"))]
async fn start(
    _config: CollectorConfig,
    _sink: Box<dyn RecordSink>,
    _shutdown: CancellationToken,
) -> Result<()> {
    anyhow::bail!("raw HCI capture is only supported on Linux")
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = ctrl_c.await;

    info!("shutdown requested");
    shutdown.cancel();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<PipelineError>() {
        return match err {
            PipelineError::Scanner(ScannerError::Radio(_)) => EXIT_RADIO,
            PipelineError::Persistence(_) => EXIT_PERSISTENCE,
            _ => 1,
        };
    }

    if err.downcast_ref::<PersistError>().is_some() {
        return EXIT_PERSISTENCE;
    }

    1
}
