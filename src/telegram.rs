//! Staff notifications through the Telegram Bot API.
//!
//! Photos are sent in batches of at most [`MEDIA_GROUP_LIMIT`]; a batch of one
//! goes out as `sendPhoto`, larger batches as `sendMediaGroup`. The caption is
//! attached only to the first photo of the first batch.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

use crate::{
    config::TelegramConfig,
    error::{AppError, Result},
    supabase::ensure_success,
    types::UploadedFile,
};

/// Upper bound Telegram accepts for one `sendMediaGroup` call.
pub const MEDIA_GROUP_LIMIT: usize = 10;

const TEXT_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No photos: a plain `sendMessage`.
    Text,
    Single,
    Group,
}

/// One outbound call in a photo send.
#[derive(Debug, PartialEq, Eq)]
pub struct Batch<'a, T> {
    pub dispatch: Dispatch,
    pub items: &'a [T],
    /// Caption for `items[0]`, present only on the first batch.
    pub caption: Option<&'a str>,
}

/// Splits `items` into the calls needed to deliver them with `text`.
///
/// No items and empty text yields no calls at all.
pub fn plan_batches<'a, T>(items: &'a [T], text: &'a str) -> Vec<Batch<'a, T>> {
    let caption = (!text.is_empty()).then_some(text);
    if items.is_empty() {
        return match caption {
            Some(text) => vec![Batch {
                dispatch: Dispatch::Text,
                items,
                caption: Some(text),
            }],
            None => Vec::new(),
        };
    }
    items
        .chunks(MEDIA_GROUP_LIMIT)
        .enumerate()
        .map(|(index, chunk)| Batch {
            dispatch: if chunk.len() == 1 {
                Dispatch::Single
            } else {
                Dispatch::Group
            },
            items: chunk,
            caption: if index == 0 { caption } else { None },
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TelegramRelay {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramRelay {
    pub fn new(client: reqwest::Client, config: TelegramConfig) -> Self {
        Self { client, config }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.config.api_base, self.config.bot_token)
    }

    async fn post_json(&self, method: &str, payload: &Value, timeout: Duration) -> Result<()> {
        let context = format!("Telegram {method}");
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| AppError::transport(&context, e))?;
        ensure_success(&context, response).await?;
        Ok(())
    }

    async fn post_form(&self, method: &str, form: Form, timeout: Duration) -> Result<()> {
        let context = format!("Telegram {method}");
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::transport(&context, e))?;
        ensure_success(&context, response).await?;
        Ok(())
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        let payload = json!({ "chat_id": self.config.chat_id, "text": text });
        self.post_json("sendMessage", &payload, TEXT_TIMEOUT).await?;
        tracing::info!(chars = text.len(), "telegram message sent");
        Ok(())
    }

    /// Sends photos referenced by URL, with `text` as caption.
    pub async fn send_with_photos(&self, text: &str, photo_urls: &[String]) -> Result<()> {
        for batch in plan_batches(photo_urls, text) {
            match batch.dispatch {
                Dispatch::Text => self.send_text(text).await?,
                Dispatch::Single => {
                    let mut payload = json!({
                        "chat_id": self.config.chat_id,
                        "photo": batch.items[0],
                    });
                    if let Some(caption) = batch.caption {
                        payload["caption"] = json!(caption);
                    }
                    self.post_json("sendPhoto", &payload, UPLOAD_TIMEOUT).await?;
                }
                Dispatch::Group => {
                    let media = batch
                        .items
                        .iter()
                        .enumerate()
                        .map(|(index, url)| media_item(url, index, batch.caption))
                        .collect::<Vec<_>>();
                    let payload = json!({ "chat_id": self.config.chat_id, "media": media });
                    self.post_json("sendMediaGroup", &payload, UPLOAD_TIMEOUT).await?;
                }
            }
        }
        tracing::info!(photos = photo_urls.len(), "telegram photos sent");
        Ok(())
    }

    /// Uploads raw files as photos, with `text` as caption.
    pub async fn send_upload(&self, text: &str, files: &[UploadedFile]) -> Result<()> {
        for batch in plan_batches(files, text) {
            match batch.dispatch {
                Dispatch::Text => self.send_text(text).await?,
                Dispatch::Single => {
                    let mut form = Form::new().text("chat_id", self.config.chat_id.clone());
                    if let Some(caption) = batch.caption {
                        form = form.text("caption", caption.to_string());
                    }
                    let form = form.part("photo", photo_part(&batch.items[0], 0)?);
                    self.post_form("sendPhoto", form, UPLOAD_TIMEOUT).await?;
                }
                Dispatch::Group => {
                    let mut form = Form::new().text("chat_id", self.config.chat_id.clone());
                    let mut media = Vec::with_capacity(batch.items.len());
                    for (index, file) in batch.items.iter().enumerate() {
                        let key = format!("photo{index}");
                        media.push(media_item(&format!("attach://{key}"), index, batch.caption));
                        form = form.part(key, photo_part(file, index)?);
                    }
                    let form = form.text("media", Value::Array(media).to_string());
                    self.post_form("sendMediaGroup", form, UPLOAD_TIMEOUT).await?;
                }
            }
        }
        tracing::info!(files = files.len(), "telegram upload sent");
        Ok(())
    }

    pub async fn send_document(&self, caption: &str, file: &UploadedFile) -> Result<()> {
        let part = file_part(file, "file.txt", "text/plain")?;
        let form = Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", part);
        self.post_form("sendDocument", form, TEXT_TIMEOUT).await?;
        tracing::info!(bytes = file.bytes.len(), "telegram document sent");
        Ok(())
    }
}

fn media_item(media: &str, index: usize, caption: Option<&str>) -> Value {
    let mut item = json!({ "type": "photo", "media": media });
    if let (0, Some(caption)) = (index, caption) {
        item["caption"] = json!(caption);
    }
    item
}

fn photo_part(file: &UploadedFile, index: usize) -> Result<Part> {
    file_part(file, &format!("photo{index}.jpg"), "image/jpeg")
}

fn file_part(file: &UploadedFile, default_name: &str, default_type: &str) -> Result<Part> {
    let name = file
        .file_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name.to_string());
    let content_type = file.content_type.as_deref().unwrap_or(default_type);
    Part::bytes(file.bytes.to_vec())
        .file_name(name)
        .mime_str(content_type)
        .map_err(|e| AppError::BadRequest(format!("invalid content type {content_type}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use wiremock::matchers::{body_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay(server: &MockServer) -> TelegramRelay {
        TelegramRelay::new(
            reqwest::Client::new(),
            TelegramConfig {
                bot_token: "TOKEN".to_string(),
                chat_id: "42".to_string(),
                api_base: server.uri(),
            },
        )
    }

    fn upload(name: &str) -> UploadedFile {
        UploadedFile {
            file_name: Some(name.to_string()),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(b"not really a png"),
        }
    }

    #[test]
    fn plan_without_photos_depends_on_text() {
        let none: [u8; 0] = [];
        assert!(plan_batches(&none, "").is_empty());
        let plan = plan_batches(&none, "hello");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].dispatch, Dispatch::Text);
        assert_eq!(plan[0].caption, Some("hello"));
    }

    #[test]
    fn plan_single_photo_carries_caption() {
        let plan = plan_batches(&[1], "caption");
        assert_eq!(
            plan,
            vec![Batch {
                dispatch: Dispatch::Single,
                items: &[1][..],
                caption: Some("caption"),
            }]
        );
    }

    #[test]
    fn plan_batches_respect_group_limit() {
        for n in 2..=35usize {
            let items = (0..n).collect::<Vec<_>>();
            let plan = plan_batches(&items, "text");
            assert_eq!(plan.len(), n.div_ceil(MEDIA_GROUP_LIMIT), "n = {n}");
            assert!(plan.iter().all(|b| b.items.len() <= MEDIA_GROUP_LIMIT));
            assert_eq!(plan.iter().map(|b| b.items.len()).sum::<usize>(), n);
            assert_eq!(plan[0].caption, Some("text"));
            assert!(plan[1..].iter().all(|b| b.caption.is_none()));
            for batch in &plan {
                let expected = if batch.items.len() == 1 {
                    Dispatch::Single
                } else {
                    Dispatch::Group
                };
                assert_eq!(batch.dispatch, expected);
            }
        }
    }

    #[test]
    fn plan_without_text_has_no_caption() {
        let items = [1, 2, 3];
        let plan = plan_batches(&items, "");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].caption, None);
    }

    #[test]
    fn media_item_caption_only_on_first() {
        assert_eq!(
            media_item("u0", 0, Some("c")),
            json!({ "type": "photo", "media": "u0", "caption": "c" })
        );
        assert_eq!(
            media_item("u1", 1, Some("c")),
            json!({ "type": "photo", "media": "u1" })
        );
    }

    #[tokio::test]
    async fn send_text_posts_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(json!({ "chat_id": "42", "text": "New request" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        relay(&server).send_text("New request").await.unwrap();
    }

    #[tokio::test]
    async fn send_text_surfaces_upstream_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_string("chat not found"))
            .mount(&server)
            .await;

        let err = relay(&server).send_text("hi").await.unwrap_err();
        assert_eq!(err.to_string(), "Telegram sendMessage failed: chat not found");
    }

    #[tokio::test]
    async fn eleven_photo_urls_make_a_group_and_a_single() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMediaGroup"))
            .and(body_string_contains("\"caption\":\"Job photos\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendPhoto"))
            .and(body_json(json!({ "chat_id": "42", "photo": "https://img/10.jpg" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let urls = (0..11).map(|i| format!("https://img/{i}.jpg")).collect::<Vec<_>>();
        relay(&server).send_with_photos("Job photos", &urls).await.unwrap();
    }

    #[tokio::test]
    async fn single_upload_uses_send_photo_with_caption() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendPhoto"))
            .and(body_string_contains("name=\"caption\""))
            .and(body_string_contains("filename=\"door.png\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        relay(&server)
            .send_upload("Broken door", &[upload("door.png")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn multiple_uploads_reference_attachments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMediaGroup"))
            .and(body_string_contains("attach://photo0"))
            .and(body_string_contains("attach://photo1"))
            .and(body_string_contains("name=\"photo1\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        relay(&server)
            .send_upload("", &[upload("a.png"), upload("b.png")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_files_and_no_text_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        relay(&server).send_upload("", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn document_defaults_file_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendDocument"))
            .and(body_string_contains("filename=\"file.txt\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let file = UploadedFile {
            file_name: None,
            content_type: None,
            bytes: Bytes::from_static(b"dialog transcript"),
        };
        relay(&server).send_document("Chat log", &file).await.unwrap();
    }
}
