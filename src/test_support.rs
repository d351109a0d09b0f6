//! Fixtures shared by the unit tests.

use crate::booking::{Booking, BookingRecord};
use crate::config::Settings;
use crate::context::{EvaluationContext, Services};
use crate::notify::{ChatNotifier, SendError, SendFuture, SmsMessage, SmsSender};
use crate::storage::{BookingStore, MemoryStore};
use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone};
use std::sync::{Arc, Mutex};

/// 2026-10-19 17:30 at +09:00.
pub fn now() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(9 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 10, 19, 17, 30, 0)
        .unwrap()
}

/// Booking whose reservation is `minutes_until` minutes after [`now`].
pub fn booking(id: &str, minutes_until: i64) -> Booking {
    let reserved_at = now().naive_local() + TimeDelta::minutes(minutes_until);
    let mut booking = Booking::new(id, "010-1234-5678", reserved_at);
    booking.customer_name = "Kim".to_string();
    booking.party_size = 2;
    booking
}

pub fn context_at(record: Option<BookingRecord>, minutes_until: i64) -> EvaluationContext {
    context_for(booking("b1", minutes_until), record, Services::default())
}

pub fn context_for(
    booking: Booking,
    record: Option<BookingRecord>,
    services: Services,
) -> EvaluationContext {
    EvaluationContext::new(booking, record, now(), Arc::new(Settings::default()), services)
}

/// Services backed by the given store plus recording senders.
pub fn recording_services(store: Arc<MemoryStore>) -> (Services, Arc<RecordingSms>, Arc<RecordingChat>) {
    let sms = Arc::new(RecordingSms::default());
    let chat = Arc::new(RecordingChat::default());
    let services = Services::new(
        store as Arc<dyn BookingStore>,
        sms.clone() as Arc<dyn SmsSender>,
        chat.clone() as Arc<dyn ChatNotifier>,
    );
    (services, sms, chat)
}

/// SMS sender that remembers every attempt and can be told to fail.
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<SmsMessage>>,
    /// Fail this many attempts with a transport error before succeeding.
    pub fail_times: Mutex<u32>,
    /// Reject every attempt as unauthenticated.
    pub reject_auth: bool,
}

impl RecordingSms {
    pub fn failing(times: u32) -> Self {
        Self {
            fail_times: Mutex::new(times),
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }
}

impl SmsSender for RecordingSms {
    fn send<'a>(&'a self, message: &'a SmsMessage) -> SendFuture<'a> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(message.clone());
            if self.reject_auth {
                return Err(SendError::Auth("HTTP 401".to_string()));
            }
            let mut left = self.fail_times.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(SendError::Transport("connection reset".to_string()));
            }
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingChat {
    pub posted: Mutex<Vec<String>>,
}

impl RecordingChat {
    pub fn texts(&self) -> Vec<String> {
        self.posted.lock().unwrap().clone()
    }
}

impl ChatNotifier for RecordingChat {
    fn post<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            self.posted.lock().unwrap().push(text.to_string());
            Ok(())
        })
    }
}
