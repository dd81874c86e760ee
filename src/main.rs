use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use async_binary_logger::{
    log_error, log_notice, log_sync, log_warning, FileConfig, FixedWidth, InitResult, LogBridge,
    Logger, LoggerConfig, Severity,
};
use tracing_subscriber::EnvFilter;

const THREADS: u32 = 4;
const ENTRIES_PER_THREAD: u32 = 10_000;

/// Usage: `async_binary_logger [LOG_FOLDER] [CONFIG.toml]`
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let folder = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("./logs"));
    let mut config = match args.next() {
        Some(path) => match LoggerConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(%err, %path, "cannot load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => LoggerConfig::default(),
    };
    let file = config.file.take().unwrap_or_default();
    config.file = Some(FileConfig {
        out_folder: folder,
        ..file
    });

    let logger = Logger::new(config);
    if logger.init_output() != InitResult::Ok {
        return ExitCode::FAILURE;
    }
    if let Err(err) = LogBridge::new(logger.clone(), log::LevelFilter::Info).install() {
        tracing::warn!(%err, "log facade already has a logger");
    }

    log_notice!(logger, "demo started with {} threads", THREADS);
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..ENTRIES_PER_THREAD {
                    log_error!(logger, "thread {} idx {}", t, FixedWidth(i));
                }
                log_warning!(logger, "thread {} done", t);
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }
    log::info!("entries from the log facade arrive too");
    log_sync!(logger, Severity::Critical, "all {} threads joined", THREADS);

    let stats = logger.stats();
    logger.on_termination();
    tracing::info!(dropped = stats.dropped, processed = stats.processed, "demo finished");
    ExitCode::SUCCESS
}
