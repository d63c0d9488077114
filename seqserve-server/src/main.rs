//! seqserve - serves a sequence model behind a batching pipeline.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use seqserve_core::{load_model, PipelineHealth, Processor};
use seqserve_server::config::Config;
use seqserve_server::logging::init_tracing;
use seqserve_server::state::AppState;
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("seqserve {}", VERSION);
}

#[derive(Debug, PartialEq)]
enum Command {
    Version,
    Serve { conf: Option<PathBuf> },
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
    let mut conf = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--conf" => match args.next() {
                Some(path) => conf = Some(PathBuf::from(path)),
                None => return Err("No config file specified after --conf".to_string()),
            },
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(Command::Serve { conf })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let conf = match parse_args(env::args().skip(1))? {
        Command::Version => {
            print_version();
            return Ok(());
        }
        Command::Serve { conf } => conf,
    };

    let config = Config::load(conf.as_deref())?;
    init_tracing(&config.logging.level);
    tracing::info!(
        version = VERSION,
        strategy = %config.batching.strategy,
        batch_size = config.batching.batch_size,
        parallel_size = config.batching.parallel_size,
        "Starting seqserve"
    );

    let model = load_model(&config.settings.model_path)?;
    let composer = config.batch_settings().build();
    let processor = Arc::new(Processor::for_model(
        composer,
        model,
        config.processor_config(),
    )?);
    processor.start().await?;

    let state = Arc::new(AppState::new(config.clone(), processor.clone()));
    let app = seqserve_server::app(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(processor.clone()))
        .await?;

    let health = processor.health();
    processor.stop().await;
    if let PipelineHealth::Failed { stage, reason } = health {
        return Err(format!("Pipeline stage {} failed: {}", stage, reason).into());
    }

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl-C or when a pipeline stage fails.
async fn shutdown_signal(processor: Arc<Processor>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown requested"),
        health = processor.wait_for_failure() => {
            tracing::error!(?health, "Pipeline failed, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(args(&[])), Ok(Command::Serve { conf: None }));
        assert_eq!(
            parse_args(args(&["--conf", "/etc/seqserve.toml"])),
            Ok(Command::Serve {
                conf: Some(PathBuf::from("/etc/seqserve.toml"))
            })
        );
        assert_eq!(parse_args(args(&["-V"])), Ok(Command::Version));
        assert!(parse_args(args(&["--conf"])).is_err());
        assert!(parse_args(args(&["--port", "1"])).is_err());
    }
}
