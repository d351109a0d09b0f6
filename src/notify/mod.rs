//! Outbound notification collaborators (SMS gateway, chat webhook).
//!
//! A sender makes exactly one delivery attempt per call and reports a structured
//! [`SendError`]; retrying is the job of the action that uses it, driven by a
//! [`retry::RetryPolicy`].

pub mod chat;
pub mod retry;
pub mod sms;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

pub use chat::{LogChat, WebhookChat};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use sms::{HmacSmsClient, LogSms};

pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },
    #[error("delivery failed (HTTP {status}): {body}")]
    Delivery { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl SendError {
    /// Rejected credentials and missing configuration will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SendError::Auth(_) | SendError::NotConfigured(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(e: reqwest::Error) -> Self {
        SendError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    pub to: String,
    pub text: String,
}

pub trait SmsSender: Send + Sync {
    fn send<'a>(&'a self, message: &'a SmsMessage) -> SendFuture<'a>;
}

pub trait ChatNotifier: Send + Sync {
    fn post<'a>(&'a self, text: &'a str) -> SendFuture<'a>;
}

/// Map a non-success HTTP response to a [`SendError`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> SendError {
    let status = response.status();
    match status.as_u16() {
        401 | 403 => {
            let body = response.text().await.unwrap_or_default();
            SendError::Auth(format!("HTTP {status}: {body}"))
        }
        429 => SendError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        },
        code => SendError::Delivery {
            status: code,
            body: response.text().await.unwrap_or_default(),
        },
    }
}

/// `Retry-After` as delta-seconds (fractions allowed).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
