use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Multipart, State},
    http::{header, request::Parts, HeaderName},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    ai,
    config::Config,
    error::{AppError, Result},
    requests, storage,
    types::*,
};

/// Multipart uploads carry photos straight from phones.
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header_value = |name: &HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(Self {
            user_agent: header_value(&header::USER_AGENT),
            referer: header_value(&header::REFERER),
            x_forwarded_for: header_value(&HeaderName::from_static("x-forwarded-for")),
            remote_addr: parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string()),
        })
    }
}

/// Text fields and files of one multipart form, in arrival order.
#[derive(Debug, Default)]
struct FormParts {
    fields: HashMap<String, String>,
    files: Vec<(String, UploadedFile)>,
}

impl FormParts {
    fn text(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }

    /// Files sent under `name` (or the bracketed `name[]` variant).
    fn files_named(&self, name: &str) -> Vec<UploadedFile> {
        let bracketed = format!("{name}[]");
        self.files
            .iter()
            .filter(|(field, _)| field == name || *field == bracketed)
            .map(|(_, file)| file.clone())
            .collect()
    }
}

fn multipart_error(err: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(format!("invalid multipart body: {err}"))
}

async fn read_form(mut multipart: Multipart) -> Result<FormParts> {
    let mut form = FormParts::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(multipart_error)?;
            form.files.push((
                name,
                UploadedFile {
                    file_name: Some(file_name),
                    content_type,
                    bytes,
                },
            ));
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, text);
        }
    }
    Ok(form)
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn send_telegram(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendTelegramBody>,
) -> Result<Json<Value>> {
    let relay = state.telegram()?;
    if body.photos.is_empty() {
        relay.send_text(&body.text).await?;
    } else {
        relay.send_with_photos(&body.text, &body.photos).await?;
    }
    Ok(Json(json!({ "ok": true })))
}

async fn send_telegram_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let relay = state.telegram()?;
    let form = read_form(multipart).await?;
    let text = form.text("text");
    let files = form.files_named("files");
    relay.send_upload(text, &files).await?;
    if files.is_empty() {
        return Ok(Json(json!({ "ok": true, "info": "no files" })));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn send_document(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<Value>> {
    let relay = state.telegram()?;
    let form = read_form(multipart).await?;
    let Some(document) = form.files_named("document").into_iter().next() else {
        return Err(AppError::BadRequest("document is required".to_string()));
    };
    relay.send_document(form.text("caption"), &document).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn send_sms(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendSmsBody>,
) -> Result<Json<Value>> {
    state
        .sms()?
        .send_sms(&body.to, &body.text, body.subject.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn store_request(
    State(state): State<Arc<AppState>>,
    context: RequestContext,
    Json(body): Json<StoreRequestBody>,
) -> Result<Json<StoreRequestResponse>> {
    let (response, _) = requests::store_request(state.store()?, &body, &context).await?;
    Ok(Json(response))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let store = state.store()?;
    let form = read_form(multipart).await?;
    let request_id = form.text("request_id").trim();
    if request_id.is_empty() {
        return Err(AppError::BadRequest("request_id is required".to_string()));
    }
    let items = storage::upload_files(
        store,
        request_id,
        form.text("origin"),
        form.text("session_id"),
        &form.files_named("files"),
    )
    .await?;
    Ok(Json(UploadResponse {
        ok: true,
        uploaded: items.len(),
        items,
    }))
}

async fn ai_ensure_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnsureRequestBody>,
) -> Result<Json<EnsureRequestResponse>> {
    let request_id = ai::ensure_request(
        state.store()?,
        &state.session_locks,
        &body.session_id,
        body.source.as_deref(),
    )
    .await?;
    Ok(Json(EnsureRequestResponse { request_id }))
}

async fn ai_ingest_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestMessageBody>,
) -> Result<Json<IngestMessageResponse>> {
    let request_id = ai::ingest_message(state.store()?, &state.session_locks, &body).await?;
    Ok(Json(IngestMessageResponse {
        ok: true,
        request_id,
    }))
}

/// All routes under `/api`, with CORS open to the website.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/send-telegram", post(send_telegram))
        .route("/send-telegram-upload", post(send_telegram_upload))
        .route("/send-document", post(send_document))
        .route("/send-sms", post(send_sms))
        .route("/store-request", post(store_request))
        .route("/upload", post(upload))
        .route("/ai/ensure-request", post(ai_ensure_request))
        .route("/ai/ingest-message", post(ai_ingest_message));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    for section in config.missing_sections() {
        tracing::warn!(section, "upstream not configured, its endpoints will answer 500");
    }

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let state = AppState::new(config).context("failed to build HTTP client")?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))?;

    tracing::info!(%addr, "handyman backend listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server runtime failure")?;
    Ok(())
}
