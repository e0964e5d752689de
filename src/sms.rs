//! Text notifications through the Telnyx messaging API.

use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    config::SmsConfig,
    error::{AppError, Result},
    supabase::ensure_success,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct SmsRelay {
    client: reqwest::Client,
    config: SmsConfig,
}

impl SmsRelay {
    pub fn new(client: reqwest::Client, config: SmsConfig) -> Self {
        Self { client, config }
    }

    /// Gateway payload for one message; webhook URLs are included only when configured.
    pub fn payload(&self, to: &str, text: &str, subject: Option<&str>) -> Value {
        let mut payload = json!({
            "from": self.config.from_number,
            "messaging_profile_id": self.config.profile_id,
            "to": to,
            "text": text,
            "subject": subject.unwrap_or_default(),
            "use_profile_webhooks": true,
            "type": "SMS",
        });
        if let Some(url) = &self.config.webhook_url {
            payload["webhook_url"] = json!(url);
        }
        if let Some(url) = &self.config.webhook_failover_url {
            payload["webhook_failover_url"] = json!(url);
        }
        payload
    }

    pub async fn send_sms(&self, to: &str, text: &str, subject: Option<&str>) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v2/messages", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(SEND_TIMEOUT)
            .json(&self.payload(to, text, subject))
            .send()
            .await
            .map_err(|e| AppError::transport("Telnyx send", e))?;
        ensure_success("Telnyx send", response).await?;
        tracing::info!(to, "sms sent");
        Ok(())
    }
}
