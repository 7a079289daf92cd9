//! Momentum Scanner Binary
//!
//! Control plane for the scanner core. Modes:
//! - `scan`: run one scan and exit (exit codes 0/2/3/4/5)
//! - `serve`: scheduler cadences plus the read-only HTTP surface
//! - `jobs`: list registered jobs and their cadences

use momentum_scanner::config::ScannerConfig;
use momentum_scanner::facade::DataFacade;
use momentum_scanner::factors::NullSocial;
use momentum_scanner::http::{create_router, AppState};
use momentum_scanner::limiter::LimiterRegistry;
use momentum_scanner::pipeline::Orchestrator;
use momentum_scanner::progress::ProgressBus;
use momentum_scanner::regime::RegimeDetector;
use momentum_scanner::sched::Scheduler;
use momentum_scanner::store::ScanStore;
use momentum_scanner::venues::default_registry;
use momentum_scanner::{cache::TieredCache, metrics, ScanError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Everything the run modes share
struct App {
    cfg: ScannerConfig,
    orchestrator: Arc<Orchestrator>,
    state: AppState,
    cache: Arc<TieredCache>,
}

fn build_app() -> Result<App, ScanError> {
    let cfg = ScannerConfig::from_env()?;
    metrics::init();

    let limiters = Arc::new(LimiterRegistry::new(&cfg.providers));
    let cache = Arc::new(TieredCache::new(cfg.cache.clone()));
    let facade = Arc::new(DataFacade::new(
        default_registry(),
        limiters,
        Arc::clone(&cache),
        &cfg,
    ));
    let regime = Arc::new(RegimeDetector::new(cfg.regime.clone()));
    let store = Arc::new(ScanStore::new(cfg.data_dir.clone())?);
    let bus = Arc::new(ProgressBus::default());

    let orchestrator = Arc::new(Orchestrator::new(
        cfg.clone(),
        Arc::clone(&facade),
        Arc::clone(&regime),
        Arc::new(NullSocial),
        Arc::clone(&store),
        bus,
    ));

    let state = AppState {
        store,
        regime,
        facade,
    };

    Ok(App {
        cfg,
        orchestrator,
        state,
        cache,
    })
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout stays clean for machine-readable output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    tracing::info!("momentum-scanner v{}", env!("CARGO_PKG_VERSION"));

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("help");

    let code = match mode {
        "scan" => run_scan().await,
        "serve" => run_serve().await,
        "jobs" => list_jobs(),
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            0
        }
        unknown => {
            eprintln!("Error: unknown mode '{}'", unknown);
            print_usage(&args[0]);
            2
        }
    };
    std::process::exit(code);
}

fn print_usage(bin: &str) {
    eprintln!("Usage: {} <scan|serve|jobs>", bin);
    eprintln!("  scan   run one scan cycle and print the ranked list");
    eprintln!("  serve  run scheduler cadences and the HTTP query surface");
    eprintln!("  jobs   list registered jobs");
}

/// One-shot scan; ranked list to stdout, exit code from the outcome
async fn run_scan() -> i32 {
    let app = match build_app() {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Error: {}", err);
            return err.exit_code();
        }
    };

    match app.orchestrator.run(CancellationToken::new()).await {
        Ok(result) => {
            match serde_json::to_string_pretty(&*result) {
                Ok(body) => println!("{}", body),
                Err(err) => {
                    eprintln!("Error: {}", err);
                    return 1;
                }
            }
            if result.partial {
                3
            } else {
                0
            }
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            err.exit_code()
        }
    }
}

/// Scheduler + HTTP server until SIGINT
async fn run_serve() -> i32 {
    let app = match build_app() {
        Ok(app) => app,
        Err(err) => {
            eprintln!("Error: {}", err);
            return err.exit_code();
        }
    };

    let sweeper = app.cache.spawn_sweeper();

    let mut scheduler = Scheduler::new(app.cfg.scheduler.drain_deadline);
    {
        let orchestrator = Arc::clone(&app.orchestrator);
        scheduler.register(
            "scan.hot",
            app.cfg.scheduler.hot_period,
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run(CancellationToken::new()).await.map(|_| ())
                })
            }),
        );
    }
    {
        let orchestrator = Arc::clone(&app.orchestrator);
        scheduler.register(
            "scan.warm",
            app.cfg.scheduler.warm_period,
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run(CancellationToken::new()).await.map(|_| ())
                })
            }),
        );
    }
    {
        let orchestrator = Arc::clone(&app.orchestrator);
        scheduler.register(
            "regime.refresh",
            app.cfg.scheduler.regime_period,
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move { orchestrator.refresh_regime().await.map(|_| ()) })
            }),
        );
    }
    if app.cfg.scheduler.premove_enabled {
        let orchestrator = Arc::clone(&app.orchestrator);
        scheduler.register(
            "premove.hourly",
            app.cfg.scheduler.premove_period,
            Arc::new(move || {
                let orchestrator = Arc::clone(&orchestrator);
                Box::pin(async move {
                    orchestrator.run(CancellationToken::new()).await.map(|_| ())
                })
            }),
        );
    }
    let tickers = scheduler.spawn();

    // Prime the regime and run an initial scan so the query surface has data
    if let Err(err) = scheduler.trigger("regime.refresh").await {
        tracing::warn!(error = %err, "initial regime refresh failed");
    }
    if let Err(err) = scheduler.trigger("scan.hot").await {
        tracing::warn!(error = %err, "initial scan failed");
    }

    let router = create_router(app.state.clone(), app.cfg.http.rate_limit);
    let listener = match tokio::net::TcpListener::bind(app.cfg.http.addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Error: cannot bind {}: {}", app.cfg.http.addr, err);
            return 1;
        }
    };
    tracing::info!("query surface listening on {}", app.cfg.http.addr);

    tokio::select! {
        result = async { axum::serve(listener, router).await } => {
            if let Err(err) = result {
                eprintln!("Error: server failed: {}", err);
                return 1;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    scheduler.shutdown().await;
    sweeper.abort();
    for ticker in tickers {
        ticker.abort();
    }
    0
}

fn list_jobs() -> i32 {
    let cfg = match ScannerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Error: {}", err);
            return err.exit_code();
        }
    };
    println!("scan.hot        every {:>6}s", cfg.scheduler.hot_period.as_secs());
    println!("scan.warm       every {:>6}s", cfg.scheduler.warm_period.as_secs());
    println!("regime.refresh  every {:>6}s", cfg.scheduler.regime_period.as_secs());
    if cfg.scheduler.premove_enabled {
        println!("premove.hourly  every {:>6}s", cfg.scheduler.premove_period.as_secs());
    }
    0
}
