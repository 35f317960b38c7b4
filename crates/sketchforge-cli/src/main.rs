//! sketchforge CLI - remote compile service for embedded firmware.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sketchforge_core::Config;

#[derive(Parser)]
#[command(name = "sketchforge")]
#[command(about = "Remote compile service for embedded firmware")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the compile server
    Serve {
        /// Host address to bind to
        #[arg(long, env = "SKETCHFORGE_HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "SKETCHFORGE_PORT")]
        port: Option<u16>,

        /// Data directory for the artifact cache and build slots
        #[arg(long, env = "SKETCHFORGE_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Number of build slots (the cap on concurrent compiles)
        #[arg(long, env = "SKETCHFORGE_SLOTS")]
        slots: Option<usize>,

        /// Library index URL
        #[arg(long, env = "SKETCHFORGE_INDEX_URL")]
        index_url: Option<String>,

        /// Library index refresh interval in seconds, 0 to disable
        #[arg(long, env = "SKETCHFORGE_REFRESH_INTERVAL")]
        refresh_interval: Option<u64>,

        /// Toolchain executable
        #[arg(long, env = "SKETCHFORGE_TOOLCHAIN")]
        toolchain: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            host,
            port,
            data_dir,
            slots,
            index_url,
            refresh_interval,
            toolchain,
        } => {
            let mut config = Config::default();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.cache.data_dir = data_dir;
            }
            if let Some(slots) = slots {
                config.build.max_concurrent_builds = slots;
            }
            if let Some(index_url) = index_url {
                config.catalog.index_url = index_url;
            }
            if let Some(refresh_interval) = refresh_interval {
                config.catalog.refresh_interval_secs = refresh_interval;
            }
            if let Some(toolchain) = toolchain {
                config.build.toolchain = toolchain;
            }

            sketchforge_server::serve(config).await?;
        }
    }

    Ok(())
}
