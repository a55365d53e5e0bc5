#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::web;
use rb_api::{AppState, Dependencies, Health};
use rb_auth_simple::SimpleAuthProvider;
use rb_core::board::BoardStore;
use rb_core::memory::MemoryStore;
use rb_storage_local::LocalMediaStore;

pub const BOUNDARY: &str = "rb-test-boundary";

pub fn scratch_dir(test: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "rb-api-{}-{}-{}",
        test,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

/// State over an in-memory store with uploads going to `media_root`.
pub async fn state(media_root: PathBuf) -> web::Data<AppState> {
    let db = Arc::new(MemoryStore::new());
    let board = BoardStore::open("/obj/", db.clone(), Default::default())
        .await
        .unwrap();
    let health = Dependencies::new(&["redis", "media"], false);
    health.set("redis", Health::Healthy);
    health.set("media", Health::Healthy);

    web::Data::new(AppState {
        board,
        media: Box::new(LocalMediaStore::new(media_root, "/images".into())),
        auth: Box::new(SimpleAuthProvider::new(db, b"test-key", 24)),
        health,
        media_group: "images".into(),
        boards: BTreeMap::from([
            ("/obj/".to_string(), "http://localhost:8080".to_string()),
            ("/tech/".to_string(), "http://tech.local".to_string()),
        ]),
    })
}

/// Encodes text fields and an optional `(field, filename, bytes)` file
/// as `multipart/form-data`, returning the content type and body.
pub fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
