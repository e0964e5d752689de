//! Persistence of website form submissions.
//!
//! The request row is written first and is the only write whose failure
//! fails the submission. Detail rows and child batches (jobs, messages,
//! photos) are best-effort and logged when they fail; there is no rollback.

use std::{fmt, str::FromStr, time::Duration};

use serde_json::{json, Map, Value};

use crate::{
    error::{AppError, BestEffort, Result},
    supabase::{extract_id, DataStore, Returning},
    types::{RequestContext, StoreRequestBody, StoreRequestResponse},
};

const WRITE_TIMEOUT: Duration = Duration::from_secs(20);

const CONSENT_ALIASES: [&str; 3] = ["consentToText", "aiConsentToText", "hourlyConsentToText"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormType {
    Contact,
    Dynamic,
    Hourly,
    Ai,
    Unknown,
}

impl FormType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Dynamic => "dynamic",
            Self::Hourly => "hourly",
            Self::Ai => "ai",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for FormType {
    type Err = std::convert::Infallible;

    /// Unrecognised values map to [`FormType::Unknown`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "contact" => Self::Contact,
            "dynamic" => Self::Dynamic,
            "hourly" => Self::Hourly,
            "ai" => Self::Ai,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical contact columns of a request row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub consent_to_text: bool,
}

impl Contact {
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("full_name".into(), json!(self.full_name));
        map.insert("email".into(), json!(self.email));
        map.insert("phone".into(), json!(self.phone));
        map.insert("address".into(), json!(self.address));
        map.insert("consent_to_text".into(), json!(self.consent_to_text));
        map
    }
}

/// JSON truthiness: null, false, 0, "" and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Maps the website's field-name variants onto canonical contact columns.
///
/// Canonical names are accepted too, so normalizing an already-normalized
/// contact yields the same result.
pub fn normalize_contact(raw: &Map<String, Value>) -> Contact {
    let full_name = ["fullName", "name", "full_name"]
        .iter()
        .find_map(|key| text_field(raw, key))
        .unwrap_or_default();
    let consent_to_text = CONSENT_ALIASES
        .iter()
        .chain(std::iter::once(&"consent_to_text"))
        .any(|key| raw.get(*key).is_some_and(is_truthy));
    Contact {
        full_name,
        email: text_field(raw, "email").unwrap_or_default(),
        phone: text_field(raw, "phone").unwrap_or_default(),
        address: text_field(raw, "address").unwrap_or_default(),
        consent_to_text,
    }
}

/// Client metadata plus the session id and server-captured request context.
pub fn merge_meta(
    meta: Option<&Map<String, Value>>,
    session_id: Option<&str>,
    context: &RequestContext,
) -> Value {
    let mut merged = meta.cloned().unwrap_or_default();
    merged.insert("session_id".into(), json!(session_id));
    merged.insert("server_meta".into(), json!(context));
    Value::Object(merged)
}

/// The header row for one submission.
pub fn build_request_row(payload: &StoreRequestBody, form_type: FormType, context: &RequestContext) -> Value {
    let mut row = Map::new();
    row.insert(
        "source".into(),
        json!(payload.source.as_deref().filter(|s| !s.is_empty()).unwrap_or("website")),
    );
    row.insert("form_type".into(), json!(form_type.as_str()));
    row.insert("session_id".into(), json!(payload.session_id));
    row.insert(
        "meta".into(),
        merge_meta(payload.meta.as_ref(), payload.session_id.as_deref(), context),
    );
    if let Some(contact) = payload.contact.as_ref().filter(|c| !c.is_empty()) {
        row.extend(normalize_contact(contact).to_json());
    }
    Value::Object(row)
}

fn meta_field(meta: Option<&Map<String, Value>>, key: &str) -> Value {
    meta.and_then(|m| m.get(key)).cloned().unwrap_or(Value::Null)
}

/// The form-specific detail row, if the form type has one.
pub fn detail_row(
    form_type: FormType,
    request_id: &str,
    meta: Option<&Map<String, Value>>,
) -> Option<(&'static str, Value)> {
    match form_type {
        FormType::Dynamic => Some((
            "dynamic_details",
            json!({
                "request_id": request_id,
                "project_description": meta_field(meta, "projectDescription"),
                "timeline": meta_field(meta, "timeline"),
                "main_categories": meta_field(meta, "mainCategories"),
                "service_groups": meta_field(meta, "serviceGroups"),
                "detailed_services": meta_field(meta, "detailedServices"),
            }),
        )),
        FormType::Hourly => Some((
            "hourly_details",
            json!({
                "request_id": request_id,
                "hourly_package": meta_field(meta, "hourlyPackage"),
                "description": meta_field(meta, "description"),
            }),
        )),
        FormType::Contact => Some((
            "contact_details",
            json!({
                "request_id": request_id,
                "description": meta_field(meta, "description"),
            }),
        )),
        FormType::Ai | FormType::Unknown => None,
    }
}

fn entries<'a>(list: Option<&'a Vec<Value>>) -> impl Iterator<Item = &'a Map<String, Value>> {
    list.into_iter().flatten().filter_map(Value::as_object)
}

fn message_photos_count(message: &Map<String, Value>) -> Value {
    match message.get("photos_count") {
        Some(count) if is_truthy(count) => count.clone(),
        _ => json!(message
            .get("photos")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)),
    }
}

fn message_session(message: &Map<String, Value>, session_id: Option<&str>) -> Value {
    match message.get("session_id") {
        Some(sid) if is_truthy(sid) => sid.clone(),
        _ => json!(session_id),
    }
}

pub fn job_rows(jobs: Option<&Vec<Value>>, request_id: &str) -> Vec<Value> {
    entries(jobs)
        .map(|job| {
            json!({
                "request_id": request_id,
                "job_id": job.get("id"),
                "name": job.get("name"),
                "price": job.get("price"),
            })
        })
        .collect()
}

pub fn ai_job_rows(jobs: Option<&Vec<Value>>, request_id: &str, session_id: Option<&str>) -> Vec<Value> {
    job_rows(jobs, request_id)
        .into_iter()
        .map(|mut row| {
            row["session_id"] = json!(session_id);
            row
        })
        .collect()
}

pub fn message_rows(messages: Option<&Vec<Value>>, request_id: &str, session_id: Option<&str>) -> Vec<Value> {
    entries(messages)
        .map(|message| {
            json!({
                "request_id": request_id,
                "sender": message.get("sender"),
                "content": message.get("content"),
                "photos_count": message_photos_count(message),
                "session_id": message_session(message, session_id),
            })
        })
        .collect()
}

/// Conversation rows for the AI assistant, carrying storage paths of attached photos.
pub fn ai_message_rows(messages: Option<&Vec<Value>>, request_id: &str, session_id: Option<&str>) -> Vec<Value> {
    entries(messages)
        .map(|message| {
            let mut row = json!({
                "request_id": request_id,
                "session_id": message_session(message, session_id),
                "sender": message.get("sender"),
                "content": message.get("content"),
                "photos_count": message_photos_count(message),
            });
            let storage_paths = message
                .get("photos")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|photo| photo.get("storage_path"))
                .filter(|path| is_truthy(path))
                .cloned()
                .collect::<Vec<_>>();
            if !storage_paths.is_empty() {
                row["storage_paths"] = Value::Array(storage_paths);
            }
            row
        })
        .collect()
}

pub fn photo_rows(
    photos: Option<&Vec<Value>>,
    request_id: &str,
    form_type: FormType,
    session_id: Option<&str>,
) -> Vec<Value> {
    entries(photos)
        .map(|photo| {
            let origin = match photo.get("origin") {
                Some(origin) if is_truthy(origin) => origin.clone(),
                _ => json!(form_type.as_str()),
            };
            json!({
                "request_id": request_id,
                "url": photo.get("url"),
                "name": photo.get("name"),
                "origin": origin,
                "session_id": message_session(photo, session_id),
            })
        })
        .collect()
}

async fn insert_best_effort(store: &DataStore, table: &str, rows: Vec<Value>, request_id: &str) -> BestEffort {
    if rows.is_empty() {
        return BestEffort::Skipped;
    }
    let outcome = BestEffort::from_result(
        store
            .insert(table, &rows, Returning::Minimal, WRITE_TIMEOUT)
            .await,
    );
    outcome.log(table, request_id);
    outcome
}

/// Per-table outcome of the secondary writes of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryWrites {
    pub details: Vec<(&'static str, BestEffort)>,
    pub jobs: BestEffort,
    pub messages: BestEffort,
    pub photos: BestEffort,
}

/// Stores one form submission and returns the generated request id.
pub async fn store_request(
    store: &DataStore,
    payload: &StoreRequestBody,
    context: &RequestContext,
) -> Result<(StoreRequestResponse, SecondaryWrites)> {
    let form_type = payload
        .form_type
        .as_deref()
        .map(|s| s.parse::<FormType>().unwrap_or(FormType::Unknown))
        .unwrap_or(FormType::Unknown);
    let session_id = payload.session_id.as_deref();

    let row = build_request_row(payload, form_type, context);
    let created = store
        .insert("requests", &[row], Returning::Representation, WRITE_TIMEOUT)
        .await?;
    let request_id = extract_id(&created)
        .ok_or_else(|| AppError::upstream("Supabase insert requests", None, "no request id returned"))?;
    tracing::info!(%request_id, %form_type, "request stored");

    let meta = payload.meta.as_ref();
    let details = match form_type {
        FormType::Ai => vec![
            (
                "ai_messages",
                insert_best_effort(
                    store,
                    "ai_messages",
                    ai_message_rows(payload.messages.as_ref(), &request_id, session_id),
                    &request_id,
                )
                .await,
            ),
            (
                "ai_jobs",
                insert_best_effort(
                    store,
                    "ai_jobs",
                    ai_job_rows(payload.jobs.as_ref(), &request_id, session_id),
                    &request_id,
                )
                .await,
            ),
        ],
        _ => match detail_row(form_type, &request_id, meta) {
            Some((table, row)) => vec![(table, insert_best_effort(store, table, vec![row], &request_id).await)],
            None => Vec::new(),
        },
    };

    let jobs = insert_best_effort(
        store,
        "request_jobs",
        job_rows(payload.jobs.as_ref(), &request_id),
        &request_id,
    )
    .await;
    let messages = insert_best_effort(
        store,
        "request_messages",
        message_rows(payload.messages.as_ref(), &request_id, session_id),
        &request_id,
    )
    .await;
    let photos = insert_best_effort(
        store,
        "request_photos",
        photo_rows(payload.photos.as_ref(), &request_id, form_type, session_id),
        &request_id,
    )
    .await;

    Ok((
        StoreRequestResponse {
            ok: true,
            stored: true,
            request_id,
        },
        SecondaryWrites {
            details,
            jobs,
            messages,
            photos,
        },
    ))
}
