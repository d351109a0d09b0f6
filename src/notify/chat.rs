use super::{error_from_response, ChatNotifier, SendError, SendFuture};
use crate::config::ChatSettings;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Incoming-webhook chat client (Slack-compatible `{"text": ...}` payload).
///
/// Consecutive posts are spaced at least `min_interval` apart to stay under the
/// provider's rate limit; a 429 surfaces as [`SendError::RateLimited`] carrying the
/// server's `Retry-After` hint.
pub struct WebhookChat {
    client: Client,
    webhook_url: String,
    min_interval: Duration,
    last_post: Mutex<Option<Instant>>,
}

impl WebhookChat {
    pub fn new(webhook_url: &str, min_interval: Duration) -> Self {
        Self::with_timeout(webhook_url, min_interval, Duration::from_secs(10))
    }

    pub fn with_timeout(webhook_url: &str, min_interval: Duration, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("booking-notifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            webhook_url: webhook_url.to_string(),
            min_interval,
            last_post: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self::with_timeout(
            &settings.webhook_url,
            Duration::from_millis(settings.inter_message_delay_ms),
            Duration::from_secs(settings.timeout_seconds),
        )
    }

    async fn post_once(&self, text: &str) -> Result<(), SendError> {
        if self.webhook_url.is_empty() {
            return Err(SendError::NotConfigured("chat webhook"));
        }

        // held across the request so posts from one client never overlap
        let mut last_post = self.last_post.lock().await;
        if let Some(previous) = *last_post {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                log::debug!("Throttling chat post for {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }

        let result = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await;
        *last_post = Some(Instant::now());

        let response = result?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

impl ChatNotifier for WebhookChat {
    fn post<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(self.post_once(text))
    }
}

/// Dry-run notifier: logs the text instead of posting it.
#[derive(Debug, Default)]
pub struct LogChat;

impl ChatNotifier for LogChat {
    fn post<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            log::info!("[dry-run] chat: {text}");
            Ok(())
        })
    }
}
