use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::{
    client::{EnqueueStatus, QueueClient},
    config::Config,
    health::HealthEndpoint,
    launcher::Launcher,
    model::{Task, Uptime},
    report::LogReporter,
    server::Server,
};

mod client;
mod config;
mod connection;
mod health;
mod launcher;
mod model;
mod packet;
mod queue;
mod report;
mod server;

/// Runs queued jobs one at a time so a batch job never runs concurrently with itself.
#[derive(Parser, Debug)]
#[command(name = "jobqueue", version, about, long_about = None)]
struct Cli {
    /// Directory holding jobqueue.ini
    #[arg(short = 'c', long = "config", default_value = "config")]
    config_dir: PathBuf,

    /// Log specification, overrides `[jobqueue] loglevel`
    #[arg(long = "log-level")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the queue server, launcher and health endpoint (default)
    Serve,
    /// Submit a job to a running server; exits with the queue status code
    Enqueue {
        /// Lower runs sooner
        #[arg(short, long, default_value_t = 5, allow_negative_numbers = true)]
        priority: i64,
        /// Program followed by its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        task: Vec<String>,
    },
    /// Remove all pending jobs from a running server
    Clear,
    /// Query a running server's uptime
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config_dir) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_spec = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let _logger = match flexi_logger::Logger::try_with_str(log_spec).and_then(|logger| {
        logger
            .adaptive_format_for_stdout(flexi_logger::AdaptiveFormat::WithThread)
            .log_to_stdout()
            .start()
    }) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: could not start logger: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, &cli.config_dir).await,
        Commands::Enqueue { priority, task } => {
            let Some(task) = Task::new(task) else {
                error!("No program given");
                return ExitCode::FAILURE;
            };
            match QueueClient::new(config.queue_address())
                .add_job(task, priority)
                .await
            {
                Ok(status) => {
                    match status {
                        EnqueueStatus::Accepted => info!("Job added or priority updated"),
                        EnqueueStatus::DuplicateIgnored => info!("Duplicate job ignored"),
                    }
                    ExitCode::from(status.code())
                }
                Err(e) => {
                    error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Clear => match QueueClient::new(config.queue_address()).clear().await {
            Ok(()) => {
                info!("Job queue cleared");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Health => match QueueClient::new(config.queue_address()).health().await {
            Ok(uptime) => {
                info!("OK - uptime={:.2}s", uptime);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn serve(config: Config, config_dir: &std::path::Path) -> ExitCode {
    if !config.enabled {
        error!(
            "Job queue cannot start; not enabled in {}",
            config::config_file_path(config_dir).display()
        );
        return ExitCode::FAILURE;
    }
    info!("Job queue started.");
    info!("Job queue config dir: \"{}\".", config_dir.display());

    let uptime = Uptime::start();
    let cancellation_token = CancellationToken::new();

    let server = match Server::run(
        ("0.0.0.0", config.port),
        uptime,
        cancellation_token.clone(),
    )
    .await
    {
        Ok(v) => v,
        Err(e) => {
            error!("Job queue server could not bind port {}: {}", config.port, e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Job queue listens for requests at port: \"{}\".",
        server.local_address().port()
    );

    if let Err(e) = HealthEndpoint::run(
        ("0.0.0.0", config.health_port),
        uptime,
        cancellation_token.clone(),
    ) {
        error!(
            "Health endpoint could not bind port {}: {}",
            config.health_port, e
        );
        server.shutdown();
        return ExitCode::FAILURE;
    }

    let launcher = Launcher::new(
        QueueClient::new(config.queue_address()),
        Arc::new(LogReporter),
        config.launcher_config(),
    );
    let mut launcher_task = tokio::spawn(launcher.run(cancellation_token.clone()));

    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Shutting down");
            ExitCode::SUCCESS
        }
        exit = &mut launcher_task => match exit {
            Ok(exit) => ExitCode::from(exit.exit_code()),
            Err(e) => {
                error!("Job queue launcher crashed: {}", e);
                ExitCode::FAILURE
            }
        },
    };
    server.shutdown();

    info!("Job queue server shutdown");
    exit_code
}
