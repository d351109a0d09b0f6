use super::{error_from_response, SendError, SendFuture, SmsMessage, SmsSender};
use crate::booking::normalize_phone;
use crate::config::SmsSettings;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// SMS gateway client authenticating every request with an HMAC-SHA256
/// signature over `date + salt`.
pub struct HmacSmsClient {
    client: Client,
    api_url: String,
    api_key: String,
    api_secret: String,
    sender: String,
}

impl HmacSmsClient {
    pub fn new(api_url: &str, api_key: &str, api_secret: &str, sender: &str) -> Self {
        Self::with_timeout(api_url, api_key, api_secret, sender, Duration::from_secs(10))
    }

    pub fn with_timeout(
        api_url: &str,
        api_key: &str,
        api_secret: &str,
        sender: &str,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("booking-notifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            sender: sender.to_string(),
        }
    }

    pub fn from_settings(settings: &SmsSettings) -> Self {
        Self::with_timeout(
            &settings.api_url,
            &settings.api_key,
            &settings.api_secret,
            &settings.sender,
            Duration::from_secs(settings.timeout_seconds),
        )
    }

    /// `Authorization` header value for one request.
    fn authorization(&self, date: &str, salt: &str) -> Result<String, SendError> {
        let signature = sign(&self.api_secret, date, salt)?;
        Ok(format!(
            "HMAC-SHA256 apiKey={}, date={}, salt={}, signature={}",
            self.api_key, date, salt, signature
        ))
    }

    async fn send_once(&self, message: &SmsMessage) -> Result<(), SendError> {
        if self.api_url.is_empty() || self.api_key.is_empty() {
            return Err(SendError::NotConfigured("sms gateway"));
        }

        let date = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let body = json!({
            "message": {
                "to": normalize_phone(&message.to),
                "from": normalize_phone(&self.sender),
                "text": message.text,
            }
        });

        log::debug!("Sending SMS to {}", message.to);
        let response = self
            .client
            .post(&self.api_url)
            .header(reqwest::header::AUTHORIZATION, self.authorization(&date, &salt)?)
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            log::debug!("SMS gateway accepted message for {}", message.to);
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}

impl SmsSender for HmacSmsClient {
    fn send<'a>(&'a self, message: &'a SmsMessage) -> SendFuture<'a> {
        Box::pin(self.send_once(message))
    }
}

/// Hex HMAC-SHA256 of `date + salt` keyed with the API secret.
pub fn sign(secret: &str, date: &str, salt: &str) -> Result<String, SendError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SendError::Auth(format!("invalid signing key: {e}")))?;
    mac.update(date.as_bytes());
    mac.update(salt.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Dry-run sender: logs the message instead of delivering it.
#[derive(Debug, Default)]
pub struct LogSms;

impl SmsSender for LogSms {
    fn send<'a>(&'a self, message: &'a SmsMessage) -> SendFuture<'a> {
        Box::pin(async move {
            log::info!("[dry-run] SMS to {}: {}", message.to, message.text);
            Ok(())
        })
    }
}
