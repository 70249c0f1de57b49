//! Build Runner - Entry Point
//!
//! Builds a site checkout, streams the build output to the message bus and
//! publishes the result to object storage. Exits 0 only when the site is live.

use std::collections::HashMap;
use std::env;

use build_runner::app::run::run;
use build_runner::app::settings::Settings;
use build_runner::app::state::PipelineContext;
use build_runner::filesys::file::File;
use build_runner::logs::{init_logging, LogOptions};
use build_runner::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Settings file is optional, the environment is enough
    let settings_file = cli_args.get("settings").map(File::new);
    let settings = match Settings::load(settings_file.as_ref()).await {
        Ok(settings) => settings,
        Err(e) => {
            let _ = init_logging(LogOptions::default());
            error!("Unable to load settings: {}", e);
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        level: settings.log_level,
        json: settings.json_logs,
        file_dir: settings.log_dir.clone(),
    };
    let log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    info!(
        "Running build runner {} ({})",
        version.version, version.git_hash
    );

    let context = match PipelineContext::init(&settings) {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to initialize the pipeline: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let summary = run(&context, await_shutdown_signal()).await;
    match &summary.error {
        None => info!("Pipeline completed, {} files uploaded", summary.uploaded),
        Some(e) => error!("Pipeline ended in {:?}: {}", summary.state, e),
    }

    let code = summary.exit_code();
    drop(log_guard);
    std::process::exit(code);
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("SIGTERM received, shutting down...");
                    }
                    _ = sigint.recv() => {
                        info!("SIGINT received, shutting down...");
                    }
                }
            }
            _ => {
                warn!("Unable to install signal handlers, falling back to Ctrl+C");
                await_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        await_ctrl_c().await;
    }
}

async fn await_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down..."),
        Err(e) => {
            warn!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
