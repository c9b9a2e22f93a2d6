use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keygate_channel::{ChannelFactory, UpstreamClient};
use keygate_common::EffectiveConfig;
use keygate_core::{
    AesGcmEncryption, EncryptionService, KeyPool, ModelRegistry, PlaygroundExecutor, ProxyEngine,
    UpstreamClientConfig, WreqUpstreamClient,
};
use keygate_router::AdminState;
use keygate_storage::{SeaOrmStorage, Storage};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Cli::parse();

    keygate_metrics::init().context("register metrics")?;

    let storage: Arc<dyn Storage> = Arc::new(
        SeaOrmStorage::connect(&args.dsn)
            .await
            .context("connect storage")?,
    );
    storage.sync().await.context("schema sync")?;

    let encryption: Arc<dyn EncryptionService> = match args.encryption_key.as_deref() {
        Some(key) => Arc::new(AesGcmEncryption::from_hex_key(key).context("parse encryption key")?),
        None => {
            let key = AesGcmEncryption::generate_key();
            eprintln!(
                "generated encryption key: {key}\n\
                 pass it via --encryption-key (or KEYGATE_ENCRYPTION_KEY) to keep stored keys readable"
            );
            Arc::new(AesGcmEncryption::from_hex_key(&key).context("parse generated key")?)
        }
    };

    let defaults = EffectiveConfig::default();
    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig::from_defaults(&defaults))
            .context("build upstream client")?,
    );
    let factory = Arc::new(ChannelFactory::with_builtins(client.clone()));

    let key_pool = Arc::new(KeyPool::new(
        storage.clone(),
        encryption.clone(),
        factory.clone(),
        defaults.clone(),
    ));
    let registry = Arc::new(ModelRegistry::new(storage.clone(), factory.clone()));
    let playground = Arc::new(PlaygroundExecutor::new(
        storage.clone(),
        key_pool.clone(),
        client.clone(),
    ));
    let engine = Arc::new(ProxyEngine::new(
        storage.clone(),
        key_pool.clone(),
        factory,
        client,
        defaults,
    ));

    let app = axum::Router::new()
        .merge(keygate_router::proxy_router(engine))
        .merge(keygate_router::admin_router(AdminState {
            storage,
            registry,
            key_pool,
            playground,
            encryption,
        }))
        .layer(axum::middleware::from_fn(
            keygate_router::metrics_middleware::track_http,
        ));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(%bind, "keygate listening");
    axum::serve(listener, app).await?;
    Ok(())
}
