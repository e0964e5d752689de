//! Process configuration, read once from the environment at startup.

use std::env;

use thiserror::Error;

const DEFAULT_PORT: &str = "8000";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_TELNYX_API_BASE: &str = "https://api.telnyx.com";
const DEFAULT_STORAGE_BUCKET: &str = "uploads";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    Missing(String),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },

    /// Some but not all of a section's required variables are set.
    #[error("{section} is partially configured, missing: {}", .missing.join(", "))]
    Partial {
        section: &'static str,
        missing: Vec<String>,
    },
}

/// Reads `name` from the process environment, falling back to `default`.
///
/// Unset and empty values are treated alike; with no default either one is
/// a [`ConfigError::Missing`].
pub fn env_var(name: &str, default: Option<&str>) -> Result<String, ConfigError> {
    lookup_var(&|key| env::var(key).ok(), name, default)
}

fn lookup_var(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: Option<&str>,
) -> Result<String, ConfigError> {
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => Ok(value),
        None => default
            .map(str::to_string)
            .ok_or_else(|| ConfigError::Missing(name.to_string())),
    }
}

fn base_url(value: String) -> String {
    value.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: String,
    pub from_number: String,
    pub profile_id: String,
    pub webhook_url: Option<String>,
    pub webhook_failover_url: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub telegram: Option<TelegramConfig>,
    pub sms: Option<SmsConfig>,
    pub supabase: Option<SupabaseConfig>,
}

impl Config {
    /// Loads `.env` (if present) and builds the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    ///
    /// Each upstream section is all-or-nothing: entirely absent leaves it
    /// `None`, partially present is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;

        let port_raw = lookup_var(lookup, "PORT", Some(DEFAULT_PORT))?;
        let port = port_raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
            name: "PORT".to_string(),
            value: port_raw.clone(),
        })?;
        let bind_addr = lookup_var(lookup, "BIND_ADDR", Some("0.0.0.0"))?;

        let telegram = section(
            lookup,
            "Telegram",
            &["TELEGRAM_BOT_TOKEN", "TELEGRAM_CHAT_ID"],
        )?
        .map(|values| -> Result<_, ConfigError> {
            Ok(TelegramConfig {
                bot_token: values[0].clone(),
                chat_id: values[1].clone(),
                api_base: base_url(lookup_var(
                    lookup,
                    "TELEGRAM_API_BASE",
                    Some(DEFAULT_TELEGRAM_API_BASE),
                )?),
            })
        })
        .transpose()?;

        let sms = section(
            lookup,
            "Telnyx",
            &["TELNYX_API_KEY", "TELNYX_FROM", "TELNYX_PROFILE_ID"],
        )?
        .map(|values| -> Result<_, ConfigError> {
            Ok(SmsConfig {
                api_key: values[0].clone(),
                from_number: values[1].clone(),
                profile_id: values[2].clone(),
                webhook_url: lookup_var(lookup, "TELNYX_WEBHOOK_URL", None).ok(),
                webhook_failover_url: lookup_var(lookup, "TELNYX_WEBHOOK_FAILOVER_URL", None).ok(),
                api_base: base_url(lookup_var(
                    lookup,
                    "TELNYX_API_BASE",
                    Some(DEFAULT_TELNYX_API_BASE),
                )?),
            })
        })
        .transpose()?;

        let supabase = section(
            lookup,
            "Supabase",
            &["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"],
        )?
        .map(|values| -> Result<_, ConfigError> {
            Ok(SupabaseConfig {
                url: base_url(values[0].clone()),
                service_key: values[1].clone(),
                bucket: lookup_var(lookup, "SUPABASE_STORAGE_BUCKET", Some(DEFAULT_STORAGE_BUCKET))?,
            })
        })
        .transpose()?;

        Ok(Self {
            bind_addr,
            port,
            telegram,
            sms,
            supabase,
        })
    }

    /// Names of upstream sections that are not configured.
    pub fn missing_sections(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.telegram.is_none() {
            missing.push("Telegram");
        }
        if self.sms.is_none() {
            missing.push("Telnyx");
        }
        if self.supabase.is_none() {
            missing.push("Supabase");
        }
        missing
    }
}

/// Resolves a group of required variables; `Ok(None)` when none of them is set.
fn section(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    keys: &[&str],
) -> Result<Option<Vec<String>>, ConfigError> {
    let mut values = Vec::with_capacity(keys.len());
    let mut missing = Vec::new();
    for key in keys {
        match lookup_var(lookup, key, None) {
            Ok(value) => values.push(value),
            Err(_) => missing.push(key.to_string()),
        }
    }
    if missing.is_empty() {
        Ok(Some(values))
    } else if missing.len() == keys.len() {
        Ok(None)
    } else {
        Err(ConfigError::Partial { section: name, missing })
    }
}
