//! Model routing: alternates between the primary model and a cheaper one.
//!
//! A router is owned by one orchestrator; there is no process-wide state,
//! so two sessions never perturb each other's rotation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use veritas_config::AppConfig;
use veritas_core::error::ProviderError;
use veritas_core::provider::Provider;
use crate::openai_compat::OpenAiCompatProvider;

/// Picks the model for each call.
///
/// Every `interval`-th call goes to the free model when one is configured;
/// all other calls go to the primary.
#[derive(Debug)]
pub struct ModelRouter {
    primary: String,
    free: Option<String>,
    interval: u64,
    counter: AtomicU64,
}

impl ModelRouter {
    pub fn new(primary: impl Into<String>, free: Option<String>, interval: u64) -> Self {
        Self {
            primary: primary.into(),
            free,
            interval: interval.max(1),
            counter: AtomicU64::new(0),
        }
    }

    /// A router that always returns `model`.
    pub fn fixed(model: impl Into<String>) -> Self {
        Self::new(model, None, 1)
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.model.primary.clone(),
            config.model.free.clone(),
            config.model.free_interval,
        )
    }

    /// Advance the counter and return the model for this call.
    pub fn next_model(&self) -> &str {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.free {
            Some(free) if n % self.interval == 0 => free,
            _ => &self.primary,
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn calls(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.counter.store(0, Ordering::Relaxed);
    }
}

/// Build the model client described by the configuration.
pub fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| ProviderError::NotConfigured("no API key (set VERITAS_API_KEY)".into()))?;
    let provider = OpenAiCompatProvider::new(
        "openai-compatible",
        config.base_url.clone(),
        api_key,
        Duration::from_secs(config.agent.call_timeout_secs),
    )?;
    Ok(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_third_call_uses_free_model() {
        let router = ModelRouter::new("paid", Some("free".into()), 3);
        let picks: Vec<String> = (0..6).map(|_| router.next_model().to_string()).collect();
        assert_eq!(picks, vec!["paid", "paid", "free", "paid", "paid", "free"]);
    }

    #[test]
    fn without_free_model_always_primary() {
        let router = ModelRouter::new("paid", None, 2);
        assert!((0..5).all(|_| router.next_model() == "paid"));
        assert_eq!(router.calls(), 5);
    }

    #[test]
    fn reset_restarts_rotation() {
        let router = ModelRouter::new("paid", Some("free".into()), 2);
        assert_eq!(router.next_model(), "paid");
        router.reset();
        assert_eq!(router.next_model(), "paid");
        assert_eq!(router.next_model(), "free");
    }

    #[test]
    fn routers_are_independent() {
        let a = ModelRouter::new("paid", Some("free".into()), 2);
        let b = ModelRouter::new("paid", Some("free".into()), 2);
        a.next_model();
        assert_eq!(b.next_model(), "paid");
        assert_eq!(a.next_model(), "free");
    }

    #[test]
    fn zero_interval_is_clamped() {
        let router = ModelRouter::new("paid", Some("free".into()), 0);
        assert_eq!(router.next_model(), "free");
    }

    #[test]
    fn build_provider_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(build_provider(&config), Err(ProviderError::NotConfigured(_))));
    }
}
