use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::store::CallStore;
use crate::vault::Vault;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

pub struct AppState {
    pub config: AppConfig,
    pub vault: Vault,
    pub store: Arc<dyn CallStore>,
    pub rate_limiter: RateLimiter,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn CallStore>, rate_limiter: RateLimiter) -> Self {
        let vault = Vault::new(config.encryption_key.as_deref());
        Self {
            config,
            vault,
            store,
            rate_limiter,
            http_client: reqwest::Client::new(),
        }
    }

    /// Absolute URL the provider uses for one of our routes.
    pub fn public_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.config.public_base_url, path_and_query)
    }
}
