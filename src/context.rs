use crate::booking::{Booking, BookingRecord, Flag, Roster};
use crate::config::Settings;
use crate::notify::{ChatNotifier, LogChat, LogSms, SmsSender};
use crate::storage::{BookingStore, MemoryStore};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeDelta};
use std::sync::Arc;

/// Collaborator handles that effects may call.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn BookingStore>,
    pub sms: Arc<dyn SmsSender>,
    pub chat: Arc<dyn ChatNotifier>,
}

impl Services {
    pub fn new(
        store: Arc<dyn BookingStore>,
        sms: Arc<dyn SmsSender>,
        chat: Arc<dyn ChatNotifier>,
    ) -> Self {
        Self { store, sms, chat }
    }

    /// The given storage with logging-only notification senders. Dry runs pass
    /// an [`OverlayStore`](crate::storage::OverlayStore) so real records are
    /// read but never changed.
    pub fn dry_run(store: Arc<dyn BookingStore>) -> Self {
        Self::new(store, Arc::new(LogSms), Arc::new(LogChat))
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::dry_run(Arc::new(MemoryStore::new()))
    }
}

/// Everything conditions and actions may read while one booking is processed.
///
/// Built once per booking before the rule pass and only ever handed out by
/// shared reference, so every rule in the pass sees the same snapshot. An
/// effect that writes a flag goes through the store; the snapshot's `record`
/// keeps showing the state from before the pass.
pub struct EvaluationContext {
    booking: Booking,
    record: Option<BookingRecord>,
    now: DateTime<FixedOffset>,
    settings: Arc<Settings>,
    services: Services,
    roster: Arc<Roster>,
}

impl EvaluationContext {
    pub fn new(
        booking: Booking,
        record: Option<BookingRecord>,
        now: DateTime<FixedOffset>,
        settings: Arc<Settings>,
        services: Services,
    ) -> Self {
        Self {
            booking,
            record,
            now,
            settings,
            services,
            roster: Arc::new(Roster::default()),
        }
    }

    pub fn with_roster(mut self, roster: Arc<Roster>) -> Self {
        self.roster = roster;
        self
    }

    pub fn booking(&self) -> &Booking {
        &self.booking
    }

    /// The persisted record as it was when the pass started, `None` for a new booking.
    pub fn record(&self) -> Option<&BookingRecord> {
        self.record.as_ref()
    }

    pub fn is_new_booking(&self) -> bool {
        self.record.is_none()
    }

    /// Persisted flag value; absent records count as "not set".
    pub fn flag(&self, flag: Flag) -> bool {
        self.record.as_ref().is_some_and(|record| record.flag(flag))
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Evaluation time on the venue's wall clock, comparable with `reserved_at`.
    pub fn local_now(&self) -> NaiveDateTime {
        self.now.naive_local()
    }

    /// Signed time until the reservation; negative once it has passed.
    pub fn time_until_reservation(&self) -> TimeDelta {
        self.booking.reserved_at - self.local_now()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &dyn BookingStore {
        self.services.store.as_ref()
    }

    pub fn sms(&self) -> &dyn SmsSender {
        self.services.sms.as_ref()
    }

    pub fn chat(&self) -> &dyn ChatNotifier {
        self.services.chat.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Placeholder lookup for message templates.
    pub fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "shop" => Some(self.settings.shop_name.clone()),
            _ => self.booking.field(key),
        }
    }
}
