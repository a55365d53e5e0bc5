//! Picks the backends to run on, falling back when a networked one does not
//! answer in time. Every choice is recorded in the health registry.

use std::sync::Arc;

use rb_api::{Dependencies, Health};
use rb_config::Settings;
use rb_core::memory::MemoryStore;
use rb_core::traits::{KeyValueStore, MediaStore, OrderedStore, Store};
use rb_storage_local::LocalMediaStore;
use tracing::{info, warn};

#[cfg(feature = "kv-redis")]
use rb_kv_redis::RedisStore;
#[cfg(feature = "media-s3")]
use rb_storage_s3::{S3MediaStore, S3Options};
#[cfg(feature = "media-s3")]
use secrecy::ExposeSecret;

/// One backing store seen through both of the ports the board needs.
pub struct Backend {
    pub kv: Arc<dyn KeyValueStore>,
    pub ordered: Arc<dyn OrderedStore>,
}

impl Backend {
    fn new<S: Store + 'static>(store: Arc<S>) -> Self {
        Self {
            kv: store.clone(),
            ordered: store,
        }
    }
}

#[cfg(feature = "kv-redis")]
pub async fn connect_store(settings: &Settings, health: &Dependencies) -> Backend {
    match RedisStore::connect_with_retry(&settings.redis.addr, settings.redis.timeout()).await {
        Some(store) => {
            health.set("redis", Health::Healthy);
            Backend::new(Arc::new(store))
        }
        None => {
            warn!("redis unavailable, falling back to in-memory store");
            health.set("redis", Health::Fallback);
            Backend::new(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "kv-redis"))]
pub async fn connect_store(_settings: &Settings, health: &Dependencies) -> Backend {
    info!("built without kv-redis, using in-memory store");
    health.set("redis", Health::Fallback);
    Backend::new(Arc::new(MemoryStore::new()))
}

#[cfg(feature = "media-s3")]
pub async fn connect_media(settings: &Settings, health: &Dependencies) -> Box<dyn MediaStore> {
    let options = S3Options {
        endpoint: settings.s3.endpoint.clone(),
        region: settings.s3.region.clone(),
        access_key: settings.s3.access_key.clone(),
        secret_key: settings.s3.secret_key.expose_secret().to_string(),
        public_url: settings.s3.public_url.clone(),
    };

    match S3MediaStore::connect_with_retry(&options, &settings.media.group, settings.s3.timeout())
        .await
    {
        Some(store) => {
            health.set("media", Health::Healthy);
            Box::new(store)
        }
        None => {
            warn!("object store unavailable, falling back to local filesystem");
            Box::new(local_media(settings, health, Health::Fallback).await)
        }
    }
}

#[cfg(not(feature = "media-s3"))]
pub async fn connect_media(settings: &Settings, health: &Dependencies) -> Box<dyn MediaStore> {
    Box::new(local_media(settings, health, Health::Healthy).await)
}

/// The local store, reported as `ready` once its directory exists. Left
/// unhealthy when the directory cannot be created.
async fn local_media(settings: &Settings, health: &Dependencies, ready: Health) -> LocalMediaStore {
    let media = LocalMediaStore::new(
        settings.media.dir.clone().into(),
        settings.media.url_prefix.clone(),
    );
    match media.init().await {
        Ok(()) => {
            info!("serving media from {}", settings.media.dir);
            health.set("media", ready);
        }
        Err(err) => warn!("media store unavailable: {err:#}"),
    }
    media
}
