use clap::Parser;
use mirror_engine::{MirrorConfig, MirrorError, MirrorServer, checksum};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CliArgs, Command};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), MirrorError> {
    let args = CliArgs::parse();

    match args.command {
        Command::Serve {
            ip,
            port,
            cache,
            origin,
            verbose,
        } => {
            init_tracing(verbose)?;

            let mut config = MirrorConfig::default()
                .with_bind(ip, port)
                .with_origin_base(origin);
            if let Some(cache) = cache {
                config = config.with_cache_root(cache);
            }

            info!(
                "Serving {} from a local disk cache at {}",
                config.origin_base,
                config.cache_root.display()
            );
            info!("Access mirrored content via http://{}/<path>", config.bind_addr());

            MirrorServer::new(config)?.run().await
        }
        Command::Verify { file, expected } => {
            let digest = checksum::sha256_file(&file).await?;
            println!("{digest}  {}", file.display());

            if let Some(expected) = expected {
                if digest.eq_ignore_ascii_case(expected.trim()) {
                    println!("OK");
                } else {
                    eprintln!("FAILED: expected {expected}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) -> Result<(), MirrorError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| MirrorError::Config(e.to_string()))
}
