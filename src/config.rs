use crate::notify::RetryPolicy;
use crate::schema::{ChatTemplate, SmsTemplate};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub rules_path: String,
    /// Shown as `{shop}` in message templates.
    pub shop_name: String,
    /// Offset of the venue's local time from UTC; reservation times are local.
    pub timezone_offset_hours: i32,
    pub engine: EngineSettings,
    pub storage: StorageSettings,
    pub sms: SmsSettings,
    pub chat: ChatSettings,
    pub templates: Templates,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Refuse to start when a rule names a condition or action nobody registered.
    pub strict_types: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsSettings {
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub sender: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub webhook_url: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Minimum gap between two consecutive chat posts.
    pub inter_message_delay_ms: u64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub confirmation: String,
    pub reminder: String,
    pub option: String,
    pub cancellation: String,
    pub chat_new_booking: String,
    pub chat_failure: String,
    pub chat_summary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rules_path: "/etc/booking-notifier/rules.yaml".to_string(),
            shop_name: "Reservations".to_string(),
            timezone_offset_hours: 9,
            engine: EngineSettings::default(),
            storage: StorageSettings::default(),
            sms: SmsSettings::default(),
            chat: ChatSettings::default(),
            templates: Templates::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: "/var/lib/booking-notifier/bookings.db".to_string(),
        }
    }
}

impl Default for SmsSettings {
    fn default() -> Self {
        SmsSettings {
            api_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            sender: String::new(),
            max_attempts: 3,
            retry_delay_ms: 1000,
            max_delay_ms: 30_000,
            timeout_seconds: 10,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        ChatSettings {
            webhook_url: String::new(),
            max_attempts: 3,
            retry_delay_ms: 1000,
            max_delay_ms: 30_000,
            inter_message_delay_ms: 1000,
            timeout_seconds: 10,
        }
    }
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            confirmation: "[{shop}] {name}, your booking for {party_size} on {date} at {time} is confirmed."
                .to_string(),
            reminder: "[{shop}] Reminder: see you today at {time}, {name}.".to_string(),
            option: "[{shop}] {name}, your '{option}' option is ready for {date} {time}."
                .to_string(),
            cancellation: "[{shop}] {name}, your booking on {date} at {time} has been cancelled."
                .to_string(),
            chat_new_booking: "New booking {id}: {name} ({party_size}) on {date} {time}"
                .to_string(),
            chat_failure: "Notification failure for booking {id}: {message}".to_string(),
            chat_summary: "Booking {id}: {message}".to_string(),
        }
    }
}

impl Templates {
    pub fn sms(&self, template: SmsTemplate) -> &str {
        match template {
            SmsTemplate::Confirmation => &self.confirmation,
            SmsTemplate::Reminder => &self.reminder,
            SmsTemplate::Option => &self.option,
            SmsTemplate::Cancellation => &self.cancellation,
        }
    }

    pub fn chat(&self, template: ChatTemplate) -> &str {
        match template {
            ChatTemplate::NewBooking => &self.chat_new_booking,
            ChatTemplate::Failure => &self.chat_failure,
            ChatTemplate::Summary => &self.chat_summary,
        }
    }
}

impl SmsSettings {
    /// Linear backoff: the gateway is retried `retry_delay * attempt` apart.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl ChatSettings {
    /// Exponential backoff, with `Retry-After` hints honoured up to `max_delay_ms`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.retry_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

impl Settings {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.sms.api_url.is_empty() {
            url::Url::parse(&self.sms.api_url)
                .map_err(|e| anyhow::anyhow!("Invalid sms.api_url '{}': {}", self.sms.api_url, e))?;
        }
        if !self.chat.webhook_url.is_empty() {
            url::Url::parse(&self.chat.webhook_url).map_err(|e| {
                anyhow::anyhow!("Invalid chat.webhook_url '{}': {}", self.chat.webhook_url, e)
            })?;
        }
        if self.sms.max_attempts == 0 {
            anyhow::bail!("sms.max_attempts must be at least 1");
        }
        if self.chat.max_attempts == 0 {
            anyhow::bail!("chat.max_attempts must be at least 1");
        }
        self.timezone()?;
        Ok(())
    }

    pub fn timezone(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_hours * 3600).ok_or_else(|| {
            anyhow::anyhow!(
                "timezone_offset_hours out of range: {}",
                self.timezone_offset_hours
            )
        })
    }
}
