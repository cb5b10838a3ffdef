use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use edrmount::cache::SegmentCache;
use edrmount::catalog::CatalogReader;
use edrmount::config::{Config, ConfigOverrides};
use edrmount::fuse::{self, DefaultLibraryLayout, EdrFs};
use edrmount::metrics::Metrics;
use edrmount::nntp::{NntpConnection, NntpPoolBuilder};
use edrmount::stream::RangeEngine;

#[derive(Parser)]
#[command(name = "edrmount")]
#[command(about = "Mount NZB-indexed Usenet content as a read-only streaming filesystem")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the catalog and serve reads until interrupted
    Mount {
        /// Mountpoint (overrides config)
        #[arg(short, long)]
        mount_point: Option<PathBuf>,

        /// Catalog database path (overrides config)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Number of NNTP connections (overrides config, clamped to 1-64)
        #[arg(short, long)]
        connections: Option<u16>,

        /// NNTP host (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// NNTP port (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Use TLS (overrides config)
        #[arg(long)]
        ssl: Option<bool>,
    },

    /// Show what the catalog would expose, without mounting
    Info {
        /// Catalog database path (overrides config)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config,

    /// Dial and authenticate one NNTP connection, then disconnect
    Test {
        /// Also STAT this message-id to probe article availability
        #[arg(long)]
        message_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Mount {
            mount_point,
            catalog,
            connections,
            host,
            port,
            ssl,
        } => {
            let mut config = Config::load()?;
            config.apply_overrides(ConfigOverrides {
                host,
                port,
                connections,
                ssl,
                mount_point,
                catalog,
                log_level: None,
            });
            init_logging(&config);
            mount_command(config).await?;
        }
        Commands::Info { catalog } => {
            let mut config = Config::load()?;
            config.apply_overrides(ConfigOverrides {
                catalog,
                ..Default::default()
            });
            init_logging(&config);
            info_command(&config)?;
        }
        Commands::Config => {
            let config = Config::load()?;
            init_logging(&config);
            config_command(&config)?;
        }
        Commands::Test { message_id } => {
            let config = Config::load()?;
            init_logging(&config);
            test_command(&config, message_id.as_deref()).await?;
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
}

async fn mount_command(config: Config) -> Result<()> {
    config.ensure_dirs()?;

    let catalog = Arc::new(CatalogReader::open(&config.catalog.path)?);
    let metrics = Arc::new(Metrics::new());

    let pool = NntpPoolBuilder::new(config.download.clone())
        .max_size(config.download.connections as usize)
        .build()?;

    let cache = Arc::new(SegmentCache::new(
        &config.paths.cache_dir,
        config.paths.cache_max_bytes,
        pool.clone(),
        metrics.clone(),
    ));
    // Settle the cache: a crash may have left it over the cap
    let evicted = cache.enforce_limit().await;
    if evicted > 0 {
        tracing::info!(evicted, "trimmed segment cache at startup");
    }

    let engine = Arc::new(RangeEngine::new(
        catalog.clone(),
        cache,
        config.download.prefetch_segments,
        metrics.clone(),
    ));

    let fs = EdrFs::new(
        catalog,
        engine,
        Arc::new(DefaultLibraryLayout),
        tokio::runtime::Handle::current(),
    );

    let guard = fuse::mount(fs, &config.paths.mount_point)?;

    // Periodic observability while serving
    let ticker_metrics = metrics.clone();
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.tick().await; // immediate first tick is noise
        loop {
            interval.tick().await;
            ticker_metrics.log_snapshot();
        }
    });

    tracing::info!(mountpoint = %config.paths.mount_point.display(), "serving; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    ticker.abort();
    guard.unmount();
    pool.close();
    metrics.log_snapshot();

    Ok(())
}

fn info_command(config: &Config) -> Result<()> {
    let catalog = CatalogReader::open(&config.catalog.path)?;
    let imports = catalog.imports()?;

    if imports.is_empty() {
        println!("catalog is empty");
        return Ok(());
    }

    println!("{} import(s)", imports.len());
    for import in imports {
        let gib = import.total_bytes as f64 / 1024.0 / 1024.0 / 1024.0;
        println!(
            "  {}  {} file(s), {:.2} GiB  ({})",
            import.id, import.files_count, gib, import.path
        );
        for file in catalog.files(&import.id)? {
            let mib = file.total_bytes as f64 / 1024.0 / 1024.0;
            println!("    [{:3}] {}  {:.1} MiB", file.idx, file.filename, mib);
        }
    }

    Ok(())
}

fn config_command(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if !shown.download.pass.is_empty() {
        shown.download.pass = "*".repeat(8);
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

async fn test_command(config: &Config, message_id: Option<&str>) -> Result<()> {
    println!(
        "connecting to {}:{} (ssl: {})...",
        config.download.host, config.download.port, config.download.ssl
    );

    let mut conn = NntpConnection::connect(&config.download, None).await?;
    let healthy = conn.ping().await;

    if healthy {
        println!("connection and authentication OK");
    } else {
        println!("connected, but keepalive failed");
    }

    if let Some(id) = message_id {
        match conn.stat(id).await? {
            true => println!("article {} is available", id),
            false => println!("article {} is NOT available", id),
        }
    }

    conn.close().await;
    Ok(())
}
