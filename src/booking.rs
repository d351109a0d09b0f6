use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A reservation as delivered by the upstream booking source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub phone: String,
    /// Local wall-clock time of the reservation.
    pub reserved_at: NaiveDateTime,
    #[serde(default = "default_party_size")]
    pub party_size: u32,
    #[serde(default)]
    pub status: BookingStatus,
    /// Optional add-on (course, plan) picked by the customer.
    #[serde(default)]
    pub option: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

fn default_party_size() -> u32 {
    1
}

impl Booking {
    pub fn new(id: &str, phone: &str, reserved_at: NaiveDateTime) -> Self {
        Self {
            id: id.to_string(),
            customer_name: String::new(),
            phone: phone.to_string(),
            reserved_at,
            party_size: 1,
            status: BookingStatus::Confirmed,
            option: None,
            note: None,
            created_at: None,
        }
    }

    /// Text value of a named field, used by placeholders and pattern conditions.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "id" | "booking_id" => Some(self.id.clone()),
            "customer_name" | "name" => Some(self.customer_name.clone()),
            "phone" => Some(self.phone.clone()),
            "party_size" => Some(self.party_size.to_string()),
            "status" => Some(self.status.to_string()),
            "option" => Some(self.option.clone().unwrap_or_default()),
            "note" => Some(self.note.clone().unwrap_or_default()),
            "date" => Some(self.reserved_at.format("%Y-%m-%d").to_string()),
            "time" => Some(self.reserved_at.format("%H:%M").to_string()),
            "reserved_at" => Some(self.reserved_at.format("%Y-%m-%d %H:%M").to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Confirmed,
    Pending,
    Cancelled,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Pending => "pending",
            BookingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Notification categories whose persisted flag gates re-sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    ConfirmSms,
    RemindSms,
    OptionSms,
}

impl Flag {
    pub const ALL: [Flag; 3] = [Flag::ConfirmSms, Flag::RemindSms, Flag::OptionSms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::ConfirmSms => "confirm_sms",
            Flag::RemindSms => "remind_sms",
            Flag::OptionSms => "option_sms",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("unknown flag '{s}'"))
    }
}

/// What the storage collaborator remembers about a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: String,
    #[serde(default)]
    pub confirm_sms: bool,
    #[serde(default)]
    pub remind_sms: bool,
    #[serde(default)]
    pub option_sms: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

impl BookingRecord {
    pub fn new(booking_id: &str) -> Self {
        Self {
            booking_id: booking_id.to_string(),
            confirm_sms: false,
            remind_sms: false,
            option_sms: false,
            created_at: None,
        }
    }

    pub fn flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::ConfirmSms => self.confirm_sms,
            Flag::RemindSms => self.remind_sms,
            Flag::OptionSms => self.option_sms,
        }
    }

    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::ConfirmSms => self.confirm_sms = value,
            Flag::RemindSms => self.remind_sms = value,
            Flag::OptionSms => self.option_sms = value,
        }
    }

    pub fn with_flag(mut self, flag: Flag, value: bool) -> Self {
        self.set_flag(flag, value);
        self
    }
}

/// Bookings per customer phone across one batch.
///
/// Built once before the per-booking loop starts and shared read-only after that,
/// so every booking in the batch sees the same counts.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    counts: HashMap<String, usize>,
}

impl Roster {
    pub fn from_bookings(bookings: &[Booking]) -> Self {
        let mut counts = HashMap::new();
        for booking in bookings {
            let phone = normalize_phone(&booking.phone);
            if phone.is_empty() || booking.status == BookingStatus::Cancelled {
                continue;
            }
            *counts.entry(phone).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn bookings_for(&self, phone: &str) -> usize {
        self.counts
            .get(&normalize_phone(phone))
            .copied()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Strip everything but digits so "010-1234-5678" and "01012345678" compare equal.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_flag_names_round_trip_through_from_str() {
        for flag in Flag::ALL {
            assert_eq!(flag.as_str().parse::<Flag>().unwrap(), flag);
        }
        assert!("promo_sms".parse::<Flag>().is_err());
    }

    #[test]
    fn test_record_flags() {
        let record = BookingRecord::new("b1").with_flag(Flag::RemindSms, true);
        assert!(!record.flag(Flag::ConfirmSms));
        assert!(record.flag(Flag::RemindSms));
        assert!(!record.flag(Flag::OptionSms));
    }

    #[test]
    fn test_roster_counts_by_normalized_phone() {
        let mut cancelled = Booking::new("b4", "010-1111-2222", at(20));
        cancelled.status = BookingStatus::Cancelled;
        let bookings = vec![
            Booking::new("b1", "010-1111-2222", at(18)),
            Booking::new("b2", "01011112222", at(19)),
            Booking::new("b3", "010-3333-4444", at(18)),
            cancelled,
            Booking::new("b5", "", at(18)),
        ];

        let roster = Roster::from_bookings(&bookings);
        assert_eq!(roster.bookings_for("010 1111 2222"), 2);
        assert_eq!(roster.bookings_for("01033334444"), 1);
        assert_eq!(roster.bookings_for("01099999999"), 0);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_booking_fields() {
        let mut booking = Booking::new("b1", "01012345678", at(18));
        booking.customer_name = "Kim".to_string();
        assert_eq!(booking.field("name").as_deref(), Some("Kim"));
        assert_eq!(booking.field("time").as_deref(), Some("18:00"));
        assert_eq!(booking.field("date").as_deref(), Some("2026-10-19"));
        assert_eq!(booking.field("option").as_deref(), Some(""));
        assert!(booking.field("unknown").is_none());
    }

    #[test]
    fn test_booking_deserializes_with_defaults() {
        let booking: Booking = serde_json::from_str(
            r#"{"id": "b1", "phone": "010", "reserved_at": "2026-10-19T18:30:00"}"#,
        )
        .unwrap();
        assert_eq!(booking.party_size, 1);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(booking.option.is_none());
    }
}
