use std::sync::Arc;

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    ai::SessionLocks,
    config::Config,
    error::{AppError, Result},
    sms::SmsRelay,
    supabase::DataStore,
    telegram::TelegramRelay,
};

pub struct AppState {
    pub telegram: Option<TelegramRelay>,
    pub sms: Option<SmsRelay>,
    pub store: Option<DataStore>,
    pub session_locks: SessionLocks,
}

impl AppState {
    /// Builds every configured relay around one shared HTTP client.
    pub fn new(config: Config) -> std::result::Result<Arc<Self>, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("handyman-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let telegram = config
            .telegram
            .map(|cfg| TelegramRelay::new(http.clone(), cfg));
        let sms = config.sms.map(|cfg| SmsRelay::new(http.clone(), cfg));
        let store = config.supabase.map(|cfg| DataStore::new(http.clone(), cfg));
        Ok(Arc::new(Self {
            telegram,
            sms,
            store,
            session_locks: SessionLocks::default(),
        }))
    }

    pub fn telegram(&self) -> Result<&TelegramRelay> {
        self.telegram.as_ref().ok_or(AppError::Configuration("Telegram"))
    }

    pub fn sms(&self) -> Result<&SmsRelay> {
        self.sms.as_ref().ok_or(AppError::Configuration("Telnyx"))
    }

    pub fn store(&self) -> Result<&DataStore> {
        self.store.as_ref().ok_or(AppError::Configuration("Supabase"))
    }
}

/// A file received through a multipart form, held in memory until relayed.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Deserialize)]
pub struct SendTelegramBody {
    pub text: String,
    #[serde(default)]
    pub photos: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendSmsBody {
    pub to: String,
    pub text: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreRequestBody {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub form_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub contact: Option<Map<String, Value>>,
    #[serde(default)]
    pub jobs: Option<Vec<Value>>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub photos: Option<Vec<Value>>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct StoreRequestResponse {
    pub ok: bool,
    pub stored: bool,
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EnsureRequestBody {
    pub session_id: String,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnsureRequestResponse {
    pub request_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestMessageBody {
    pub session_id: String,
    pub sender: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub photos_count: Option<u32>,
    #[serde(default)]
    pub storage_paths: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct IngestMessageResponse {
    pub ok: bool,
    pub request_id: String,
}

/// Descriptor returned for each file stored by the upload relay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredItem {
    pub storage_path: String,
    pub name: String,
    pub origin: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: Option<usize>,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub uploaded: usize,
    pub items: Vec<StoredItem>,
}

/// Client and proxy details captured from the inbound HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestContext {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub x_forwarded_for: Option<String>,
    pub remote_addr: Option<String>,
}
