use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use imglink::config::Config;
use imglink::fingerprint::StandardFingerprinter;
use imglink::ingest::IngestValidator;
use imglink::service::ImageService;
use imglink::store::{self, PgRecordStore};
use imglink::api;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("imglink=info,tower_http=info")),
        )
        .init();

    let cfg = Config::from_env()?;
    let pool = store::connect(&cfg.database_url).await?;

    let service = Arc::new(ImageService::new(
        Arc::new(PgRecordStore::new(pool.clone())),
        Arc::new(StandardFingerprinter),
        IngestValidator::new(cfg.limits),
        cfg.scan_limit,
    ));

    api::serve(&cfg, service).await?;

    pool.close().await;
    tracing::info!("database pool closed");
    Ok(())
}
