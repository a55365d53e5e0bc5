//! # Rusty-Board Server
//!
//! Assembles the board from configuration and compile-time features, then
//! serves the API and the liveness check on separate ports.

mod bootstrap;

use actix_files::Files;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use rb_api::middleware::{cors_policy, standard_middleware};
use rb_api::{configure_live, configure_routes, AppState, Dependencies};
use rb_auth_simple::SimpleAuthProvider;
use rb_config::Settings;
use rb_core::board::{BoardStore, BumpPolicy};
use secrecy::ExposeSecret;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{connect_media, connect_store};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(settings.log.json);

    let health = Dependencies::new(&["redis", "media"], settings.server.mark_fallbacks_unhealthy);

    // 1. Key-value and ordered storage
    let backend = connect_store(&settings, &health).await;

    // 2. Board
    let bump: BumpPolicy = settings.board.bump.parse()?;
    let board = BoardStore::with_parts(
        settings.board.id.clone(),
        backend.kv.clone(),
        backend.kv.clone(),
        backend.ordered,
        bump,
    )
    .await
    .context("opening board")?;

    // 3. Media
    let media = connect_media(&settings, &health).await;

    // 4. Accounts
    let auth = SimpleAuthProvider::new(
        backend.kv,
        settings.jwt.key.expose_secret().as_bytes(),
        settings.jwt.ttl_hours,
    );

    let state = web::Data::new(AppState {
        board,
        media,
        auth: Box::new(auth),
        health,
        media_group: settings.media.group.clone(),
        boards: settings.boards.clone(),
    });

    let host = settings.server.host.clone();
    let media_prefix = settings.media.url_prefix.clone();
    let media_dir = settings.media.dir.clone();

    info!(
        board = %settings.board.id,
        bump = ?bump,
        "Rusty-Board starting on http://{}:{}",
        host,
        settings.server.port
    );

    let api = HttpServer::new(move || {
        App::new()
            .wrap(cors_policy())
            .wrap(standard_middleware())
            .app_data(state.clone())
            .configure(configure_routes)
            .service(Files::new(&media_prefix, &media_dir))
    })
    .bind((host.as_str(), settings.server.port))?
    .run();

    let live = HttpServer::new(|| App::new().configure(configure_live))
        .workers(1)
        .bind((host.as_str(), settings.server.live_port))?
        .run();

    futures_util::future::try_join(api, live).await?;
    Ok(())
}
