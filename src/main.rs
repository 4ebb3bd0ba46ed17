//! `cachegate` binary: serve, check-config, explain.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::header::{CACHE_CONTROL, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cachegate::cache::metrics::start_periodic_stats_flush;
use cachegate::cache::{policy, CacheValid, Cacheability};
use cachegate::config::watcher::ConfigWatcher;
use cachegate::config::Config;
use cachegate::origin::HttpOrigin;
use cachegate::proxy::{spawn_config_reloader, start_server, AppState};

const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "cachegate", version, about = "Caching reverse proxy")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy
    Serve {
        /// Config file (default: ~/.cachegate/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the bind address
        #[arg(long)]
        bind: Option<String>,
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
        /// Override the upstream base URL
        #[arg(long)]
        upstream: Option<String>,
        /// Do not watch the config file for changes
        #[arg(long)]
        no_watch: bool,
    },
    /// Load and validate a config file, then print the effective config
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the store decision for a response
    Explain {
        /// Cache-Control header value, e.g. "max-age=0 s-maxage=10"
        #[arg(long)]
        cache_control: Option<String>,
        /// Response status code
        #[arg(long, default_value_t = 200)]
        status: u16,
        /// Route cache_valid TTL (seconds) for this status
        #[arg(long)]
        default_ttl: Option<u64>,
        /// Pretend the response carries Set-Cookie
        #[arg(long)]
        set_cookie: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            bind,
            port,
            upstream,
            no_watch,
        } => cmd_serve(config, bind, port, upstream, no_watch).await,
        Command::CheckConfig { config } => cmd_check_config(config),
        Command::Explain {
            cache_control,
            status,
            default_ttl,
            set_cookie,
        } => cmd_explain(cache_control, status, default_ttl, set_cookie),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cachegate=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    match path {
        Some(p) => {
            let config = Config::load_from_path(p)
                .with_context(|| format!("loading config from {}", p.display()))?;
            Ok((config, p.clone()))
        }
        None => {
            let config = Config::load().context("loading default config")?;
            Ok((config, Config::path()))
        }
    }
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
    upstream: Option<String>,
    no_watch: bool,
) -> Result<()> {
    let (mut config, path) = load_config(config_path.as_ref())?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(url) = upstream {
        config.upstream.url = url;
    }
    config.validate().context("invalid configuration")?;

    let origin = HttpOrigin::new(&config.upstream).context("creating origin client")?;
    let state = Arc::new(AppState::new(&config, Arc::new(origin))?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = Arc::clone(&state.engine);
    let flush = start_periodic_stats_flush(
        engine.metrics(),
        move || engine.store().len(),
        shutdown_rx.clone(),
    );

    let mut background = vec![flush];
    if !no_watch && path.exists() {
        background.push(spawn_config_reloader(
            Arc::clone(&state),
            ConfigWatcher::new(path),
            CONFIG_POLL_INTERVAL,
            shutdown_rx.clone(),
        ));
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    start_server(&config, state, shutdown_rx).await?;
    for handle in background {
        let _ = handle.await;
    }
    Ok(())
}

fn cmd_check_config(path: Option<PathBuf>) -> Result<()> {
    let (config, path) = load_config(path.as_ref())?;
    println!("Config OK ({})", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_explain(
    cache_control: Option<String>,
    status: u16,
    default_ttl: Option<u64>,
    set_cookie: bool,
) -> Result<()> {
    let status = StatusCode::from_u16(status).context("invalid status code")?;
    let mut headers = HeaderMap::new();
    if let Some(cc) = cache_control {
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_str(&cc).context("invalid Cache-Control value")?,
        );
    }
    if set_cookie {
        headers.insert(SET_COOKIE, HeaderValue::from_static("session=1"));
    }
    let defaults = default_ttl
        .map(|secs| CacheValid::default().with_status(status, Duration::from_secs(secs)));

    match policy::evaluate(status, &headers, defaults.as_ref()) {
        Cacheability::Store { ttl, source } => {
            println!("STORE ttl={}s (from {})", ttl.as_secs(), source);
        }
        Cacheability::Bypass(reason) => {
            println!("BYPASS ({})", reason);
        }
    }
    Ok(())
}
