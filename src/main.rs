//! wasm-bridge CLI entry point.
//!
//! Loads a TOML configuration, starts a pool, invokes entry points on the
//! coordinator and tears the pool down again.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wasm_bridge_common::{ConfigFile, WasmArg};
use wasm_bridge_core::{Logger, ModuleSource, ModuleVariant};
use wasm_bridge_pool::{BridgePool, PoolOptions};

#[derive(Debug, Parser)]
#[command(name = "wasm-bridge", version, about = "Run WebAssembly entry points on a thread pool")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, env = "WASM_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Total execution contexts, coordinator included.
    #[arg(short, long)]
    threads: Option<u32>,

    /// Single-threaded module build. Overrides `module.plain`.
    #[arg(long)]
    plain: Option<PathBuf>,

    /// Shared-memory module build. Overrides `module.threads`.
    #[arg(long)]
    threaded: Option<PathBuf>,

    /// Export to invoke on the coordinator. Repeatable.
    #[arg(long = "call", value_name = "EXPORT")]
    calls: Vec<String>,

    /// i32 argument passed to every call. Repeatable.
    #[arg(long = "arg", value_name = "I32", allow_hyphen_values = true)]
    args: Vec<i32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wasm-bridge");

    if let Some(threads) = args.threads {
        config.pool.threads = Some(threads);
    }
    let plain = args.plain.unwrap_or_else(|| PathBuf::from(&config.module.plain));
    let threads = args.threaded.unwrap_or_else(|| PathBuf::from(&config.module.threads));
    let variant = ModuleVariant::for_threads(config.pool.threads.unwrap_or_else(|| config.pool.default_threads()));
    let source = module_source(plain, threads, variant)?;

    let options = PoolOptions {
        pool: config.pool,
        engine: config.engine,
        logger: Logger::tracing("coordinator"),
        worker_logger: Some(Logger::tracing("worker")),
    };

    let mut pool = BridgePool::init(&source, options)
        .await
        .context("Failed to initialize pool")?;
    info!(threads = pool.thread_count(), "Pool ready");

    let call_args: Vec<WasmArg> = args.args.iter().copied().map(WasmArg::I32).collect();
    for name in &args.calls {
        let result = pool
            .call(name, &call_args)
            .with_context(|| format!("Call to {name} failed"));
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                pool.destroy().await;
                return Err(e);
            }
        };

        match result {
            Some(value) => println!("{name}: {value}"),
            None => println!("{name}: ok"),
        }
    }

    pool.destroy().await;
    info!("Shutdown complete");

    Ok(())
}

/// Module files for a pool that loads `variant`. Only that build must be set.
fn module_source(plain: PathBuf, threads: PathBuf, variant: ModuleVariant) -> anyhow::Result<ModuleSource> {
    match variant {
        ModuleVariant::Plain if plain.as_os_str().is_empty() => {
            bail!("A single-threaded pool needs the plain module build: set module.plain or pass --plain")
        }
        ModuleVariant::Threads if threads.as_os_str().is_empty() => {
            bail!("A multi-threaded pool needs the shared-memory module build: set module.threads or pass --threaded")
        }
        _ => Ok(ModuleSource::Files { plain, threads }),
    }
}
