use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use meridian::{
    DiscoveryManager, GatewayMetrics, GatewayService, HttpClientAdapter, HttpHandler,
    TopologyResolver,
    config::{ConfigValidator, GatewayConfig, load_config},
    tracing_setup,
    utils::{GracefulShutdown, ShutdownReason},
};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, TOML or JSON); `MERIDIAN_*` variables override it
    #[clap(short, long, global = true)]
    config: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the effective configuration and exit
    Validate,
    /// Start the gateway server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_config_command(config_path),
        Commands::Serve => {
            let config = load_config(config_path).context("Failed to load configuration")?;
            ConfigValidator::validate(&config).map_err(|e| eyre!("Invalid configuration: {e}"))?;
            tracing_setup::init_tracing(&config.log_level, config.log_format)?;
            serve(config).await
        }
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    tracing::info!(
        listen_addr = %config.listen_addr(),
        discovery = config.discovery_enabled,
        auth = config.auth_enabled,
        rate_limit = config.rate_limit_enabled,
        "Starting Meridian gateway"
    );

    let metrics = Arc::new(GatewayMetrics::new().context("Failed to build metrics registry")?);

    let resolver = TopologyResolver::from_config(&config)
        .await
        .context("Failed to build topology resolver")?;
    let discovery = Arc::new(DiscoveryManager::new(
        resolver,
        metrics.clone(),
        config.discovery_interval(),
        config.discovery_timeout(),
    ));

    // Startup continues on failure; /readyz reports 503 until a refresh succeeds.
    if let Err(e) = discovery.refresh().await {
        tracing::warn!(error = %e, "Initial topology resolution failed");
    }

    let shutdown = Arc::new(GracefulShutdown::new(config.shutdown_timeout()));

    let discovery_task = {
        let discovery = discovery.clone();
        let token = shutdown.token();
        tokio::spawn(async move { discovery.run(token).await })
    };

    let http_client = Arc::new(
        HttpClientAdapter::new(config.upstream_connect_timeout(), config.upstream_timeout())
            .context("Failed to create upstream HTTP client")?,
    );
    let gateway = Arc::new(GatewayService::new(&config, discovery.handle(), metrics)?);
    let app = HttpHandler::new(gateway, http_client).router();

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "Listening for requests");

    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = ?e, "Signal handler failed, shutting down");
                shutdown.trigger_shutdown(ShutdownReason::Requested);
            }
        })
    };

    let token = shutdown.token();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { token.cancelled().await });
    let mut server_task = tokio::spawn(async move { server.await });

    let server_result = tokio::select! {
        joined = &mut server_task => {
            // The server only stops on its own when accepting fails.
            shutdown.trigger_shutdown(ShutdownReason::Requested);
            joined
                .context("Server task panicked")
                .and_then(|result| result.context("Server error"))
        }
        reason = shutdown.wait_for_shutdown_signal() => {
            tracing::info!(?reason, "Draining in-flight requests");
            let drained = shutdown
                .drain(async {
                    let _ = (&mut server_task).await;
                })
                .await;
            if !drained {
                server_task.abort();
            }
            Ok(())
        }
    };

    if let Err(e) = discovery_task.await {
        tracing::warn!(error = %e, "Discovery task ended abnormally");
    }
    signal_task.abort();

    tracing::info!("Graceful shutdown completed");
    server_result
}

/// Validate the effective configuration and exit
fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    match config_path {
        Some(path) => println!("🔍 Validating configuration: {path} (with MERIDIAN_* overrides)"),
        None => println!("🔍 Validating configuration from defaults and MERIDIAN_* variables"),
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr());
            if config.discovery_enabled {
                println!(
                    "   • Discovery: kubernetes (namespace '{}', every {}s)",
                    config.discovery_namespace, config.discovery_interval_secs
                );
            } else {
                println!("   • Discovery: static");
                println!("   • Metrics API: {}", config.primary_url);
                println!(
                    "   • Release Analyzer: {}",
                    config.analyzer_url.as_deref().unwrap_or("not configured")
                );
            }
            println!("   • Auth Enabled: {}", config.auth_enabled);
            if config.rate_limit_enabled {
                println!(
                    "   • Rate Limit: {} rps, burst {}",
                    config.rate_limit_rps, config.rate_limit_burst
                );
            } else {
                println!("   • Rate Limit: disabled");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
