//! # rb-api Handlers
//!
//! This module coordinates the flow between HTTP requests and Core traits.

use std::collections::BTreeMap;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use rb_core::board::BoardStore;
use rb_core::error::AppError;
use rb_core::models::{extension, Post, Thread, ALLOWED_EXTENSIONS};
use rb_core::traits::{AuthProvider, MediaStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::form::{PostForm, Upload};
use crate::health::Dependencies;

const SUCCESS: &str = "SUCCESS";

/// State shared across all Actix-web workers.
pub struct AppState {
    pub board: BoardStore,
    pub media: Box<dyn MediaStore>,
    pub auth: Box<dyn AuthProvider>,
    pub health: Dependencies,
    /// Media group uploads are filed under
    pub media_group: String,
    /// Board directory: board id to the URL serving it
    pub boards: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub status: &'static str,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub status: &'static str,
    pub no: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub status: &'static str,
    pub no: String,
    pub thread: Thread,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyForm {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    pub no: Option<String>,
}

pub async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "v": "1", "data": "rusty-board api" }))
}

pub async fn live() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "HEALTHY" }))
}

pub async fn boards(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(&data.boards)
}

pub async fn ready(data: web::Data<AppState>) -> impl Responder {
    let report = data.health.report();
    if data.health.healthy() {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::InternalServerError().json(report)
    }
}

pub async fn register(
    data: web::Data<AppState>,
    form: web::Form<RegisterForm>,
) -> Result<HttpResponse, ApiError> {
    let token = data
        .auth
        .register(&form.email, &form.username, &form.password)
        .await?;

    Ok(HttpResponse::Created().json(UserResponse {
        status: SUCCESS,
        username: form.username.clone(),
        token,
    }))
}

pub async fn anon_register(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let (username, token) = data.auth.anonymous_register().await?;
    Ok(HttpResponse::Created().json(UserResponse {
        status: SUCCESS,
        username,
        token,
    }))
}

pub async fn login(
    data: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, ApiError> {
    let token = data.auth.login(&form.username, &form.password).await?;
    Ok(HttpResponse::Ok().json(UserResponse {
        status: SUCCESS,
        username: form.username.clone(),
        token,
    }))
}

pub async fn verify(
    data: web::Data<AppState>,
    form: web::Form<VerifyForm>,
) -> Result<HttpResponse, ApiError> {
    let username = data.auth.verify(&form.token)?;
    Ok(HttpResponse::Ok().json(UserResponse {
        status: SUCCESS,
        username,
        token: form.token.clone(),
    }))
}

pub async fn all_threads(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let threads = data.board.get_all_threads(data.board.id()).await?;
    Ok(HttpResponse::Ok().json(threads))
}

pub async fn get_thread(
    data: web::Data<AppState>,
    query: web::Query<ThreadQuery>,
) -> Result<HttpResponse, ApiError> {
    let raw = query
        .no
        .as_deref()
        .filter(|no| !no.is_empty())
        .ok_or_else(|| AppError::validation("query parameter 'no' is required"))?;
    let no: u64 = raw
        .parse()
        .map_err(|_| AppError::validation(format!("'{raw}' is not a post number")))?;

    let thread = data.board.get_thread(&no.to_string()).await?;
    Ok(HttpResponse::Ok().json(ThreadResponse {
        status: SUCCESS,
        no: no.to_string(),
        thread,
        kind: "THREAD",
    }))
}

/// Opens a new thread. The opening post must carry an image.
pub async fn add_thread(
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut form = PostForm::read(payload).await?;
    let upload = form
        .image
        .take()
        .ok_or_else(|| AppError::validation("a new thread needs an image"))?;

    let post = Post::new(form.field("name"), form.field("email"), form.field("comment"));
    let post = attach_image(&data, post, upload).await?;
    post.validate()?;

    let no = data
        .board
        .add_thread(Thread::new(post, form.field("subject")))
        .await?;

    Ok(HttpResponse::Created().json(CreatedResponse {
        status: SUCCESS,
        no: no.to_string(),
    }))
}

/// Replies to the thread named by the `threadNo` field.
pub async fn add_post(
    data: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut form = PostForm::read(payload).await?;

    let thread_no: u64 = form
        .field("threadNo")
        .parse()
        .map_err(|_| AppError::validation("field 'threadNo' must be a post number"))?;

    let thread_key = thread_no.to_string();
    // Before the upload is stored, so a missing thread leaves no file behind.
    data.board.get_thread(&thread_key).await?;

    let mut post = Post::new(form.field("name"), form.field("email"), form.field("comment"));
    if let Some(upload) = form.image.take() {
        post = attach_image(&data, post, upload).await?;
    }
    post.validate()?;

    let no = data.board.add_post(&thread_key, post).await?;

    Ok(HttpResponse::Created().json(CreatedResponse {
        status: SUCCESS,
        no: no.to_string(),
    }))
}

/// Stores the upload and points `post` at it. The extension is checked
/// first so rejected files never reach the media store.
async fn attach_image(data: &AppState, post: Post, upload: Upload) -> Result<Post, ApiError> {
    if !ALLOWED_EXTENSIONS.contains(&extension(&upload.filename)) {
        debug!(filename = %upload.filename, "upload rejected");
        return Err(AppError::validation(format!(
            "file type '{}' is not allowed",
            upload.filename
        ))
        .into());
    }

    let name = data.media.generate_unique_name(&upload.filename);
    let uri = data
        .media
        .store(upload.data, &data.media_group, &name)
        .await
        .map_err(|err| AppError::storage(format!("storing upload: {err:#}")))?;

    info!(%uri, "upload stored");
    Ok(post.with_image(&uri, &upload.filename))
}
