//! Relays uploaded files to object storage and records them in `request_photos`.

use std::{io::Cursor, time::Duration};

use chrono::Utc;
use image::ImageReader;
use serde_json::{json, Value};

use crate::{
    error::Result,
    supabase::{DataStore, Returning},
    types::{StoredItem, UploadedFile},
};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Client file name with path separators neutralized; `file` when absent.
pub fn safe_name(file_name: Option<&str>) -> String {
    let name = file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("file");
    name.chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// `{request_id}/{millis}_{index}_{name}`; `index` is the file's position in
/// its batch, so same-named files within one millisecond stay apart.
pub fn storage_path(request_id: &str, millis: i64, index: usize, name: &str) -> String {
    format!("{request_id}/{millis}_{index}_{name}")
}

/// Width and height read from the image header, or `None` for anything
/// that is not a decodable image.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn photo_row(request_id: &str, item: &StoredItem) -> Value {
    json!({
        "request_id": request_id,
        "storage_path": item.storage_path,
        "name": item.name,
        "origin": item.origin,
        "width": item.width,
        "height": item.height,
        "size_bytes": item.size_bytes,
        "session_id": item.session_id,
    })
}

/// Uploads each file in order, then writes one metadata row per file.
///
/// The first failed upload aborts the rest; objects already stored stay.
pub async fn upload_files(
    store: &DataStore,
    request_id: &str,
    origin: &str,
    session_id: &str,
    files: &[UploadedFile],
) -> Result<Vec<StoredItem>> {
    let mut stored = Vec::with_capacity(files.len());
    for (index, file) in files.iter().enumerate() {
        let name = safe_name(file.file_name.as_deref());
        let path = storage_path(request_id, Utc::now().timestamp_millis(), index, &name);
        let content_type = file
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        store
            .upload_object(&path, file.bytes.clone(), content_type, UPLOAD_TIMEOUT)
            .await?;

        let dimensions = image_dimensions(&file.bytes);
        tracing::debug!(%path, ?dimensions, bytes = file.bytes.len(), "object stored");
        stored.push(StoredItem {
            storage_path: path,
            name,
            origin: origin.to_string(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            size_bytes: (!file.bytes.is_empty()).then_some(file.bytes.len()),
            session_id: session_id.to_string(),
        });
    }

    if !stored.is_empty() {
        let rows = stored
            .iter()
            .map(|item| photo_row(request_id, item))
            .collect::<Vec<_>>();
        store
            .insert("request_photos", &rows, Returning::Minimal, UPLOAD_TIMEOUT)
            .await?;
    }
    tracing::info!(request_id, uploaded = stored.len(), "files uploaded");
    Ok(stored)
}
