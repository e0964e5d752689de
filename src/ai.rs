//! Request bookkeeping for the AI assistant chat.
//!
//! A session id from the browser maps to one `requests` row with
//! `form_type = "ai"`. Lookup-then-create is serialized per session inside
//! this process; separate instances can still race and need a unique index
//! on the data store side to be fully deduplicated.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use serde_json::json;

use crate::{
    error::{AppError, Result},
    supabase::{extract_id, DataStore, Returning},
    types::IngestMessageBody,
};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);
const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session async locks, dropped once no caller holds them.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    /// The lock shared by every concurrent caller for `session_id`.
    pub fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(session_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns the latest AI request id for `session_id`, creating a row if none exists.
pub async fn ensure_request(
    store: &DataStore,
    locks: &SessionLocks,
    session_id: &str,
    source: Option<&str>,
) -> Result<String> {
    let lock = locks.lock_for(session_id);
    let _guard = lock.lock().await;

    let query = [
        ("session_id", format!("eq.{session_id}")),
        ("form_type", "eq.ai".to_string()),
        ("select", "id".to_string()),
        ("order", "created_at.desc".to_string()),
        ("limit", "1".to_string()),
    ];
    match store.select("requests", &query, LOOKUP_TIMEOUT).await {
        Ok(rows) => {
            if let Some(id) = rows.first().and_then(extract_id) {
                return Ok(id);
            }
        }
        Err(err) => tracing::warn!(session_id, error = %err, "ai request lookup failed, creating"),
    }

    let row = json!({
        "source": source.filter(|s| !s.is_empty()).unwrap_or("website"),
        "form_type": "ai",
        "session_id": session_id,
        "status": "new",
        "meta": { "session_id": session_id },
    });
    let created = store
        .insert("requests", &[row], Returning::Representation, LOOKUP_TIMEOUT)
        .await?;
    let request_id = extract_id(&created)
        .ok_or_else(|| AppError::upstream("Supabase create request", None, "no request id returned"))?;
    tracing::info!(session_id, %request_id, "ai request created");
    Ok(request_id)
}

/// Appends one chat message to the session's request, creating the request if needed.
pub async fn ingest_message(
    store: &DataStore,
    locks: &SessionLocks,
    message: &IngestMessageBody,
) -> Result<String> {
    let request_id = ensure_request(store, locks, &message.session_id, None).await?;

    let mut row = json!({
        "request_id": request_id,
        "session_id": message.session_id,
        "sender": message.sender,
        "content": message.content.as_deref().unwrap_or_default(),
        "photos_count": message.photos_count.unwrap_or(0),
    });
    if let Some(paths) = message.storage_paths.as_ref().filter(|p| !p.is_empty()) {
        row["storage_paths"] = json!(paths);
    }
    store
        .insert("ai_messages", &[row], Returning::Minimal, MESSAGE_TIMEOUT)
        .await?;
    Ok(request_id)
}
