//! # rb-storage-local
//! rusty-board/crates/rb-plugins/rb-storage-local/src/lib.rs
//! Local filesystem implementation of `MediaStore`.
//! Files land in `<root>/<group>/<name>` and are served from `<url_prefix>/<group>/<name>`.

use std::path::PathBuf;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rb_core::clock::MonotonicStamp;
use rb_core::models::extension;
use rb_core::traits::MediaStore;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/images")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/images")
    url_prefix: String,
    /// Nanosecond stamps for `generate_unique_name`
    stamps: MonotonicStamp,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: String) -> Self {
        Self {
            root_path: root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            stamps: MonotonicStamp::new(),
        }
    }

    /// Creates the root directory if needed.
    pub async fn init(&self) -> anyhow::Result<()> {
        info!("creating media directory {}", self.root_path.display());
        fs::create_dir_all(&self.root_path)
            .await
            .with_context(|| format!("creating {}", self.root_path.display()))
    }
}

fn is_plain_component(part: &str) -> bool {
    !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\\'])
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    /// Writes the upload, refusing to overwrite an existing file.
    async fn store(&self, data: Bytes, group: &str, name: &str) -> anyhow::Result<String> {
        if !is_plain_component(group) || !is_plain_component(name) {
            bail!("invalid media location {group:?}/{name:?}");
        }

        let dir = self.root_path.join(group);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let target = dir.join(name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .with_context(|| format!("creating {}", target.display()))?;
        file.write_all(&data).await?;
        file.flush().await?;

        debug!(bytes = data.len(), "stored {}", target.display());
        Ok(format!("{}/{}/{}", self.url_prefix, group, name))
    }

    fn generate_unique_name(&self, filename: &str) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        format!("{}{}", self.stamps.next(now), extension(filename))
    }
}
