//! # rb-storage-s3
//!
//! `MediaStore` on an S3-compatible object store (MinIO, AWS S3).
//! Each media group is a bucket; objects are served straight from the store
//! at `<public_url>/<bucket>/<name>`, so the bucket is made publicly readable.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::Utc;
use rb_core::clock::MonotonicStamp;
use rb_core::models::extension;
use rb_core::traits::MediaStore;
use tracing::{debug, info, warn};

/// Pause between connection attempts during bootstrap.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Where and how to reach the object store.
#[derive(Debug, Clone)]
pub struct S3Options {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub public_url: String,
}

pub struct S3MediaStore {
    client: Client,
    public_url: String,
    stamps: MonotonicStamp,
}

impl S3MediaStore {
    fn with_client(client: Client, public_url: &str) -> Self {
        Self {
            client,
            public_url: public_url.trim_end_matches('/').to_string(),
            stamps: MonotonicStamp::new(),
        }
    }

    /// Connects to the store and makes sure `bucket` exists and is public.
    pub async fn connect(options: &S3Options, bucket: &str) -> anyhow::Result<Self> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .endpoint_url(&options.endpoint)
            .credentials_provider(Credentials::new(
                &options.access_key,
                &options.secret_key,
                None,
                None,
                "rb-config",
            ))
            .load()
            .await;
        // MinIO serves buckets under the path, not as subdomains.
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        let store = Self::with_client(Client::from_conf(config), &options.public_url);
        store.ensure_bucket(bucket).await?;
        Ok(store)
    }

    /// Keeps trying to connect until `timeout` runs out. `None` means the
    /// caller should fall back to another store.
    pub async fn connect_with_retry(
        options: &S3Options,
        bucket: &str,
        timeout: Duration,
    ) -> Option<Self> {
        let attempts = async {
            loop {
                info!("trying connection to object store at {}", options.endpoint);
                match Self::connect(options, bucket).await {
                    Ok(store) => return store,
                    Err(err) => {
                        warn!("error connecting to object store: {err:#}");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, attempts).await {
            Ok(store) => {
                info!("connected to object store at {}", options.endpoint);
                Some(store)
            }
            Err(_) => None,
        }
    }

    async fn ensure_bucket(&self, bucket: &str) -> anyhow::Result<()> {
        if self.client.head_bucket().bucket(bucket).send().await.is_err() {
            self.client
                .create_bucket()
                .bucket(bucket)
                .send()
                .await
                .with_context(|| format!("creating bucket {bucket}"))?;
            info!(bucket, "created bucket");
        }

        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(public_read_policy(bucket))
            .send()
            .await
            .with_context(|| format!("making bucket {bucket} publicly readable"))?;
        Ok(())
    }

    fn object_uri(&self, bucket: &str, name: &str) -> String {
        format!("{}/{}/{}", self.public_url, bucket, name)
    }
}

/// Anyone may list the bucket and read its objects.
fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Principal": { "AWS": ["*"] },
                "Action": ["s3:GetBucketLocation", "s3:ListBucket"],
                "Resource": [format!("arn:aws:s3:::{bucket}")]
            },
            {
                "Effect": "Allow",
                "Principal": { "AWS": ["*"] },
                "Action": ["s3:GetObject"],
                "Resource": [format!("arn:aws:s3:::{bucket}/*")]
            }
        ]
    })
    .to_string()
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn store(&self, data: Bytes, group: &str, name: &str) -> anyhow::Result<String> {
        if group.is_empty() || name.is_empty() {
            bail!("invalid media location {group:?}/{name:?}");
        }

        let content_type = mime_guess::from_path(name).first_or_octet_stream();
        let size = data.len();
        self.client
            .put_object()
            .bucket(group)
            .key(name)
            .content_type(content_type.essence_str())
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("uploading {group}/{name}"))?;

        debug!(bytes = size, bucket = group, "stored {name}");
        Ok(self.object_uri(group, name))
    }

    fn generate_unique_name(&self, filename: &str) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        format!("{}{}", self.stamps.next(now), extension(filename))
    }
}
