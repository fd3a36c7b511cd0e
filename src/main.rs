//! taskshare - version 0.1.0
//!
//! Per-process memory accounting service with tracing logging.
//! This is the main entry point that initializes the server and handles subcommands.

mod cache;
mod cli;
mod commands;
mod config;
mod handlers;
mod metrics;
mod refresher;
mod startup_checks;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use prometheus::{Gauge, Registry};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use taskshare::engine::Engine;
use taskshare::health_stats::HealthStats;
use taskshare::history::HostHistory;
use taskshare::kernel::SimulatedKernel;
use tokio::{net::TcpListener, signal, sync::RwLock};
use tracing::{debug, error, info, Level};

use cache::SnapshotCache;
use cli::{Args, Commands, LogLevel};
use commands::{
    command_check_requirements, command_config, command_generate_testdata, command_snapshot,
};
use config::{
    resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use handlers::{
    health_handler, history_handler, metrics_handler, processes_handler, root_handler,
};
use metrics::AccountingMetrics;
use state::{AppState, SharedKernel};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config, args: &Args) {
    let level = match args.log_level {
        LogLevel::Info => config.log_level.as_deref().unwrap_or("info"),
        LogLevel::Off => "off",
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };
    let max_level = match level {
        "off" | "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Selects the kernel backend: a simulated host when test data is
/// configured, the live Mach kernel otherwise.
pub(crate) fn build_kernel(config: &Config) -> Result<SharedKernel, Box<dyn std::error::Error>> {
    if let Some(path) = &config.test_data_file {
        info!("Using simulated host from: {}", path.display());
        let kernel = SimulatedKernel::from_file(path)?;
        info!(
            "Loaded {} simulated processes",
            kernel.snapshot().processes.len()
        );
        return Ok(Arc::new(kernel));
    }
    live_kernel()
}

#[cfg(target_os = "macos")]
fn live_kernel() -> Result<SharedKernel, Box<dyn std::error::Error>> {
    Ok(Arc::new(taskshare::kernel::MachKernel::new()))
}

#[cfg(not(target_os = "macos"))]
fn live_kernel() -> Result<SharedKernel, Box<dyn std::error::Error>> {
    Err("no live kernel backend on this platform; pass --test-data-file".into())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone(), false);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        if let Commands::Config {
            output,
            format,
            commented,
        } = command
        {
            return command_config(output.clone(), format.clone(), *commented);
        }
        if let Commands::GenerateTestdata {
            output,
            processes,
            shared_objects,
            seed,
        } = command
        {
            return command_generate_testdata(output.clone(), *processes, *shared_objects, *seed);
        }

        let config = load_validated_config(&args)?;
        setup_logging(&config, &args);

        return match command {
            Commands::Snapshot {
                iterations,
                limit,
                sort,
                format,
            } => command_snapshot(*iterations, *limit, *sort, format.clone(), &config),
            Commands::CheckRequirements => command_check_requirements(&config),
            Commands::Config { .. } | Commands::GenerateTestdata { .. } => Ok(()),
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&config, &args);

    info!("Starting taskshare");

    let kernel = match build_kernel(&config) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("❌ Cannot open a kernel backend: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) =
        startup_checks::validate_requirements(kernel.as_ref(), config.test_data_file.is_some())
    {
        error!("❌ Startup validation failed: {}", e);
        std::process::exit(1);
    }

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    debug!("Prometheus registry initialized");

    let metrics = AccountingMetrics::new(&registry)?;
    let scrape_duration = Gauge::new(
        "taskshare_refresh_scrape_duration_seconds",
        "Time spent serving /metrics request",
    )?;
    let refresh_duration = Gauge::new(
        "taskshare_refresh_duration_seconds",
        "Time spent in the last refresh pass including publication",
    )?;
    let refresh_success = Gauge::new(
        "taskshare_refresh_success",
        "Whether the last refresh pass was successful (1) or failed (0)",
    )?;
    let refresh_updating = Gauge::new(
        "taskshare_refresh_updating",
        "Whether a refresh pass is currently in progress (1) or idle (0)",
    )?;

    if config.enable_telemetry.unwrap_or(true) {
        registry.register(Box::new(scrape_duration.clone()))?;
        registry.register(Box::new(refresh_duration.clone()))?;
        registry.register(Box::new(refresh_success.clone()))?;
        registry.register(Box::new(refresh_updating.clone()))?;
    } else {
        debug!("Refresh telemetry disabled");
    }

    debug!("All metrics registered successfully");

    let history = HostHistory::new(config.history_capacity());
    info!(
        "History initialized with {} samples ({} bytes)",
        history.samples().capacity(),
        history.estimated_bytes()
    );

    let state = Arc::new(AppState {
        registry,
        metrics,
        scrape_duration,
        refresh_duration,
        refresh_success,
        refresh_updating,
        cache: Arc::new(RwLock::new(SnapshotCache::default())),
        config: Arc::new(config.clone()),
        engine: Arc::new(StdMutex::new(Engine::new(config.engine_options()))),
        kernel,
        history: StdMutex::new(history),
        health_stats: Arc::new(HealthStats::new()),
        start_time: Instant::now(),
    });

    // Perform initial refresh
    info!("Performing initial refresh");
    if let Err(e) = refresher::update_cache(&state).await {
        error!("Initial refresh failed: {}", e);
    } else {
        info!("Initial refresh completed successfully");
    }

    let interval = Duration::from_secs(config.refresh_interval());
    info!("Refreshing every {}s", interval.as_secs());
    let refresh_task = tokio::spawn(refresher::refresh_loop(state.clone(), interval));

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/processes", get(processes_handler))
        .route("/history", get(history_handler));

    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("taskshare listening on http://{}:{}", bind_ip_str, port);

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                refresh_task.abort();
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting...");
        }
    }

    refresh_task.abort();
    info!("taskshare stopped gracefully");
    Ok(())
}
