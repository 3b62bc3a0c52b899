use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use imagery_core::memory::MemoryMetadata;
use imagery_core::{DefaultKeyStrategy, StaticOwnerResolver, Uploads};
use imagery_http::Imagery;

mod config;
use crate::config::{Backend, Config};

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let mut dev_config = File::open(cli.config_file.unwrap_or("./dev-config.yml".into()))?;
    let mut s = String::new();
    dev_config.read_to_string(&mut s)?;
    let config: Config = serde_yaml::from_str(&s)?;

    let settings = config.upload_settings();
    let keys = Arc::new(DefaultKeyStrategy::default());

    // initialize persistence layer
    let imagery = match &config.backend {
        Backend::PostgresS3(cfg) => {
            let backend = cfg.get_backend(&config.resources).await?;
            let metadata = Arc::new(backend.metadata);
            let uploads = Uploads::new(
                metadata.clone(),
                metadata,
                backend.objects,
                keys,
                settings,
            )?;
            Imagery::new(uploads, Arc::new(backend.owners))
        }
        Backend::Memory { objects } => {
            tracing::warn!("using in-memory backend; uploads will not survive a restart");
            let metadata = Arc::new(MemoryMetadata::new());
            let uploads = Uploads::new(
                metadata.clone(),
                metadata,
                objects.new_objects().await?,
                keys,
                settings,
            )?;
            Imagery::new(
                uploads,
                Arc::new(StaticOwnerResolver::from_definitions(&config.resources)),
            )
        }
    };

    let router = imagery.router()?;

    // run HTTP server
    tracing::info!("listening on {}", config.listen);
    axum::Server::bind(&config.listen)
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
