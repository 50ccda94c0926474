//! convoy - an HTTP reverse-proxy load balancer
//!
//! Usage:
//!     convoy --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use convoy::backend::Backend;
use convoy::balance::{LoadBalancer, Strategy};
use convoy::breaker::Registry;
use convoy::config::{load_config, Config};
use convoy::frontend::{ForwardingHandler, Listener};
use convoy::health::HealthProber;
use convoy::metrics::MetricsCollector;
use convoy::util::{init_logging, ShutdownSignal};

/// An HTTP reverse-proxy load balancer.
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config.
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        info!("configuration is valid");
        println!("Configuration is valid.");
        println!("  Listen: {}", config.server.address);
        println!("  Strategy: {}", config.strategy.strategy_type);
        println!("  Backends: {}", config.backends.len());
        for backend in &config.backends {
            println!("    - {} (weight {})", backend.url, backend.weight);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        listen = %config.server.address,
        strategy = %config.strategy.strategy_type,
        backends = config.backends.len(),
        "convoy starting"
    );

    run(config)
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run_async(config))
}

/// Async entry point: wire everything up and wait for shutdown.
async fn run_async(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();

    let backends = initialize_backends(&config)?;

    let strategy = Strategy::from_config(&config.strategy);
    let algorithm = strategy.name();
    let balancer = Arc::new(LoadBalancer::new(strategy));

    let breakers = if config.circuit_breaker.enabled {
        Some(Arc::new(Registry::new(
            config.circuit_breaker.failure_threshold,
            config.circuit_breaker.reset_timeout,
        )))
    } else {
        None
    };

    let (metrics, collector_task) = MetricsCollector::new(config.metrics.event_buffer);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(collector_task.run(shutdown.subscribe())));

    for backend in &backends {
        let prober = HealthProber::new(
            Arc::clone(backend),
            config.health_check.interval,
            metrics.clone(),
        );
        tasks.push(tokio::spawn(prober.run(shutdown.subscribe())));
    }

    let handler = Arc::new(ForwardingHandler::new(
        backends,
        balancer,
        breakers.clone(),
        metrics.clone(),
        config.retry.max_retries,
    ));

    let listener = Listener::bind(config.server.address, handler, metrics, algorithm)
        .await
        .with_context(|| format!("failed to bind {}", config.server.address))?;

    tasks.push(tokio::spawn(listener.run(shutdown.subscribe())));

    info!("convoy is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    shutdown.shutdown();
    for task in tasks {
        let _ = task.await;
    }

    if let Some(registry) = &breakers {
        for (url, state) in registry.stats() {
            info!(backend = %url, state = %state, "final breaker state");
        }
    }

    info!("convoy shut down");
    Ok(())
}

/// Build one backend per configured URL.
fn initialize_backends(config: &Config) -> Result<Vec<Arc<Backend>>> {
    let mut backends = Vec::with_capacity(config.backends.len());

    for backend_config in &config.backends {
        let url: hyper::Uri = backend_config
            .url
            .parse()
            .with_context(|| format!("invalid backend URL '{}'", backend_config.url))?;

        if url.scheme_str() == Some("https") {
            warn!(
                url = %backend_config.url,
                "https backend configured; upstream TLS is not terminated here"
            );
        }

        let backend = Arc::new(Backend::new(url, backend_config.weight));

        info!(
            backend = %backend.url_str(),
            weight = backend.weight(),
            "configured backend"
        );

        backends.push(backend);
    }

    Ok(backends)
}
