use anyhow::Context;
use apnasquad_types::{Amount, DEFAULT_MAX_WITHDRAWAL};
use serde::Serialize;
use std::time::Duration;

use crate::gateway::{GatewayConfig, DEFAULT_CASHFREE_BASE_URL};
use crate::images::ImageKitConfig;
use crate::mailer::MailApiConfig;

pub const DEFAULT_HTTP_RATE_LIMIT_PER_HOUR: u64 = 400;
pub const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 400;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_UPLOAD_BODY_LIMIT_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: u64 = 30 * 60 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: u64 = 60 * 60 * 60;
pub const DEFAULT_SIGNUP_OTP_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_RESET_OTP_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_RESET_SESSION_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_OTP_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_OTP_LENGTH: usize = 4;

/// Server tunables. `None` disables the corresponding limit.
#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub http_rate_limit_per_hour: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub upload_body_limit_bytes: Option<usize>,
    pub max_withdrawal: Option<Amount>,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub signup_otp_ttl_secs: u64,
    pub reset_otp_ttl_secs: u64,
    pub reset_session_ttl_secs: u64,
    pub otp_max_attempts: u32,
    pub otp_length: usize,
    pub cache_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_rate_limit_per_hour: Some(DEFAULT_HTTP_RATE_LIMIT_PER_HOUR),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            upload_body_limit_bytes: Some(DEFAULT_UPLOAD_BODY_LIMIT_BYTES),
            max_withdrawal: Some(DEFAULT_MAX_WITHDRAWAL),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            signup_otp_ttl_secs: DEFAULT_SIGNUP_OTP_TTL_SECS,
            reset_otp_ttl_secs: DEFAULT_RESET_OTP_TTL_SECS,
            reset_session_ttl_secs: DEFAULT_RESET_SESSION_TTL_SECS,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            otp_length: DEFAULT_OTP_LENGTH,
            cache_prefix: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    pub fn signup_otp_ttl(&self) -> Duration {
        Duration::from_secs(self.signup_otp_ttl_secs)
    }

    pub fn reset_otp_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_otp_ttl_secs)
    }

    pub fn reset_session_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_session_ttl_secs)
    }
}

/// Credentials and endpoints read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub gateway: GatewayConfig,
    pub redis_url: Option<String>,
    pub mail: Option<MailApiConfig>,
    pub imagekit: Option<ImageKitConfig>,
}

impl Secrets {
    /// Reads secrets from the environment. Outside production, missing token
    /// secrets fall back to random per-process values and missing
    /// integrations are disabled.
    pub fn from_env(production: bool) -> anyhow::Result<Self> {
        let secret = |var: &str| -> anyhow::Result<String> {
            match optional_env(var) {
                Some(value) => Ok(value),
                None if production => anyhow::bail!("Missing required env: {var}"),
                None => {
                    tracing::warn!(var, "secret not set; using an ephemeral value");
                    Ok(hex::encode(rand::random::<[u8; 32]>()))
                }
            }
        };
        let access_token_secret = secret("ACCESS_TOKEN_SECRET")?;
        let refresh_token_secret = secret("REFRESH_TOKEN_SECRET")?;

        let gateway = GatewayConfig {
            base_url: optional_env("CASHFREE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CASHFREE_BASE_URL.to_string()),
            app_id: optional_env("CASHFREE_APP_ID").unwrap_or_default(),
            secret_key: optional_env("CASHFREE_SECRET_KEY").unwrap_or_default(),
            client_url: optional_env("CLIENT_URL").unwrap_or_default(),
        };
        if production && (gateway.app_id.is_empty() || gateway.secret_key.is_empty()) {
            anyhow::bail!("Missing required env: CASHFREE_APP_ID / CASHFREE_SECRET_KEY");
        }

        let mail = match (optional_env("MAIL_API_URL"), optional_env("MAIL_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(MailApiConfig {
                api_url,
                api_key,
                sender: optional_env("SENDER_EMAIL")
                    .context("SENDER_EMAIL is required when MAIL_API_URL is set")?,
            }),
            _ if production => anyhow::bail!("Missing required env: MAIL_API_URL / MAIL_API_KEY"),
            _ => None,
        };

        let imagekit = optional_env("IMAGEKIT_PRIVATE_KEY").map(|private_key| {
            let mut config = ImageKitConfig::new(private_key);
            if let Some(upload_url) = optional_env("IMAGEKIT_UPLOAD_URL") {
                config.upload_url = upload_url;
            }
            if let Some(api_url) = optional_env("IMAGEKIT_API_URL") {
                config.api_url = api_url;
            }
            config
        });

        Ok(Self {
            access_token_secret,
            refresh_token_secret,
            gateway,
            redis_url: optional_env("REDIS_URL"),
            mail,
            imagekit,
        })
    }
}

pub(crate) fn optional_env(var: &str) -> Option<String> {
    std::env::var(var).ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}
