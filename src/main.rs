use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use country_image_harvester::browser::ChromiumLauncher;
use country_image_harvester::config::Config;
use country_image_harvester::context::RunContext;
use country_image_harvester::orchestrator::{run_succeeded, Harvester};
use country_image_harvester::targets::resolve_entities;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false)?;
            return Err(e).context("Failed to load configuration");
        }
    };
    init_tracing(config.debug_logging)?;
    config.validate().context("Invalid configuration")?;

    info!(
        targets = %config.target_list_path.display(),
        output = %config.output_dir.display(),
        engine = config.browser_engine.as_str(),
        headless = config.headless,
        max_images = config.max_images,
        "Starting country-image-harvester"
    );

    let entities = resolve_entities(
        &config.target_list_path,
        config.single_entity_id.as_deref(),
        config.single_entity_name.as_deref(),
    )
    .await
    .context("Failed to load target list")?;
    if entities.is_empty() {
        warn!("Target list has no usable entries");
        return Ok(false);
    }

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                config.output_dir.display()
            )
        })?;

    let ctx = RunContext::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, finishing in-flight work and closing browsers");
        signal_ctx.cancel();
    });

    let launcher = Arc::new(ChromiumLauncher::new(config.browser_engine));
    let harvester = Harvester::new(config, launcher, ctx.clone())?;
    let outcomes = harvester.run(entities).await;

    for outcome in &outcomes {
        info!(
            id = %outcome.entry.id,
            name = %outcome.entry.name,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            archive = ?outcome.archive_path,
            "Entity outcome"
        );
    }

    let stats = ctx.stats().snapshot();
    let success = run_succeeded(&outcomes) && !ctx.is_cancelled();
    info!(
        entities = stats.entities_finished,
        downloads_attempted = stats.downloads_attempted,
        downloads_succeeded = stats.downloads_succeeded,
        peak_in_flight = stats.peak_in_flight,
        success,
        "Harvest complete"
    );

    if stats.sessions_open != 0 {
        warn!(open = stats.sessions_open, "Browser sessions still open at exit");
    }

    Ok(success)
}

fn init_tracing(debug: bool) -> Result<()> {
    let default_directives = if debug {
        "info,country_image_harvester=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
