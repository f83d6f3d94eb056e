mod api;
pub use api::Api;

pub mod auth;
pub mod cache;
pub mod config;
pub use config::{Secrets, ServerConfig};
pub mod error;
pub mod gateway;
mod ids;
pub mod images;
pub mod mailer;
mod metrics;
pub use metrics::{HttpMetricsSnapshot, LatencySnapshot, WalletMetricsSnapshot};
pub mod otp;
pub mod store;

use auth::TokenKeys;
use cache::OtpCache;
use gateway::PaymentGateway;
use images::ImageHost;
use mailer::Mailer;
use metrics::{HttpMetrics, WalletMetrics};
use otp::OtpStore;
use store::Store;

/// Shared state behind every route.
pub struct App {
    pub config: ServerConfig,
    pub store: Store,
    pub otps: OtpStore,
    pub tokens: TokenKeys,
    pub gateway: PaymentGateway,
    pub mailer: Mailer,
    pub images: ImageHost,
    http_metrics: HttpMetrics,
    wallet_metrics: WalletMetrics,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ServerConfig,
        store: Store,
        otps: OtpStore,
        tokens: TokenKeys,
        gateway: PaymentGateway,
        mailer: Mailer,
        images: ImageHost,
    ) -> Self {
        Self {
            config,
            store,
            otps,
            tokens,
            gateway,
            mailer,
            images,
            http_metrics: HttpMetrics::default(),
            wallet_metrics: WalletMetrics::default(),
        }
    }

    /// Wires the external collaborators described by `secrets`.
    pub fn from_secrets(
        config: ServerConfig,
        store: Store,
        secrets: Secrets,
    ) -> anyhow::Result<Self> {
        let cache = match secrets.redis_url.as_deref() {
            Some(url) => OtpCache::redis(url, config.cache_prefix.clone())?,
            None => {
                tracing::warn!("REDIS_URL not set; OTP codes are kept in memory");
                OtpCache::memory(config.cache_prefix.clone())
            }
        };
        let otps = OtpStore::new(cache, config.otp_length, config.otp_max_attempts);
        let tokens = TokenKeys::new(
            &secrets.access_token_secret,
            &secrets.refresh_token_secret,
            config.access_token_ttl(),
            config.refresh_token_ttl(),
        );
        let gateway = PaymentGateway::new(secrets.gateway)?;
        let mailer = match secrets.mail {
            Some(mail) => Mailer::api(mail)?,
            None => {
                tracing::warn!("mail api not configured; emails will be logged");
                Mailer::Log
            }
        };
        let images = match secrets.imagekit {
            Some(imagekit) => ImageHost::imagekit(imagekit)?,
            None => ImageHost::Disabled,
        };
        Ok(Self::new(config, store, otps, tokens, gateway, mailer, images))
    }

    pub(crate) fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_metrics.snapshot()
    }

    pub(crate) fn wallet_metrics(&self) -> &WalletMetrics {
        &self.wallet_metrics
    }

    pub fn wallet_metrics_snapshot(&self) -> WalletMetricsSnapshot {
        self.wallet_metrics.snapshot()
    }
}
