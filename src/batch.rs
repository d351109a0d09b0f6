use crate::booking::{Booking, Roster};
use crate::config::Settings;
use crate::context::{EvaluationContext, Services};
use crate::engine::RuleEngine;
use crate::result::ActionResult;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Totals for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub bookings: usize,
    /// Bookings not evaluated because their record could not be read.
    pub skipped: usize,
    pub matched_rules: usize,
    pub actions_ok: usize,
    pub actions_failed: usize,
    pub failures: Vec<String>,
}

impl BatchReport {
    fn tally(&mut self, booking_id: &str, results: &[ActionResult]) {
        let mut last_rule: Option<&str> = None;
        for result in results {
            if last_rule != Some(result.rule_name.as_str()) {
                self.matched_rules += 1;
                last_rule = Some(result.rule_name.as_str());
            }
            if result.success {
                self.actions_ok += 1;
            } else {
                self.actions_failed += 1;
                self.failures.push(format!(
                    "booking {booking_id}: rule '{}' action '{}': {}",
                    result.rule_name,
                    result.action_type,
                    result.error.as_deref().unwrap_or(&result.message)
                ));
            }
        }
    }
}

/// Runs the rule set over a batch of bookings, one booking at a time.
pub struct BatchRunner<'e> {
    engine: &'e RuleEngine,
    settings: Arc<Settings>,
    services: Services,
}

impl<'e> BatchRunner<'e> {
    pub fn new(engine: &'e RuleEngine, settings: Arc<Settings>, services: Services) -> Self {
        Self {
            engine,
            settings,
            services,
        }
    }

    /// Process every booking against the rule set as of `now`.
    ///
    /// The roster is computed once up front. Each booking sees its persisted
    /// record as it was before its own pass; effects of earlier bookings in the
    /// batch are visible through the store.
    pub async fn run(&self, bookings: &[Booking], now: DateTime<FixedOffset>) -> BatchReport {
        let roster = Arc::new(Roster::from_bookings(bookings));
        let mut report = BatchReport {
            bookings: bookings.len(),
            ..BatchReport::default()
        };
        log::info!(
            "Processing {} bookings ({} distinct customers) at {}",
            bookings.len(),
            roster.len(),
            now.to_rfc3339()
        );

        for booking in bookings {
            let record = match self.services.store.get_record(&booking.id) {
                Ok(record) => record,
                Err(e) => {
                    log::error!("Skipping booking {}: could not read record: {e}", booking.id);
                    report.skipped += 1;
                    report
                        .failures
                        .push(format!("booking {}: record lookup failed: {e}", booking.id));
                    continue;
                }
            };

            let ctx = EvaluationContext::new(
                booking.clone(),
                record,
                now,
                self.settings.clone(),
                self.services.clone(),
            )
            .with_roster(roster.clone());

            let results = self.engine.process(&ctx).await;
            report.tally(&booking.id, &results);
        }

        log::info!(
            "Batch done: {} bookings, {} skipped, {} rules matched, {} actions ok, {} failed",
            report.bookings,
            report.skipped,
            report.matched_rules,
            report.actions_ok,
            report.actions_failed
        );
        report
    }
}

/// Read a JSON array of bookings.
pub fn load_bookings(path: impl AsRef<Path>) -> anyhow::Result<Vec<Booking>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read bookings file {}: {e}", path.display()))?;
    let bookings: Vec<Booking> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid bookings file {}: {e}", path.display()))?;
    Ok(bookings)
}

/// Load the rule document, wire the built-ins and check every named type resolves.
///
/// Unresolved types are logged; with `engine.strict_types` they are fatal.
pub fn build_engine(settings: &Settings, rules_path: &str) -> anyhow::Result<RuleEngine> {
    let mut engine = RuleEngine::from_file(rules_path)?;
    engine.register_builtins();

    let unresolved = engine.unresolved_kinds();
    for missing in &unresolved {
        log::warn!("{missing}");
    }
    if settings.engine.strict_types && !unresolved.is_empty() {
        anyhow::bail!(
            "{} unresolved condition/action type(s) in {rules_path} (engine.strict_types is on)",
            unresolved.len()
        );
    }

    log::info!(
        "Loaded {} rules from {rules_path} ({} enabled)",
        engine.rules().len(),
        engine.rules().iter().filter(|r| r.enabled).count()
    );
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{BookingRecord, BookingStatus, Flag};
    use crate::storage::{BookingStore, MemoryStore, OverlayStore, StoreError};
    use crate::test_support::{booking, now, recording_services};
    use std::io::Write;

    const RULES: &str = r#"
rules:
  - name: confirm
    conditions:
      - type: is_new_booking
      - type: status_is
        params: { statuses: [confirmed] }
    actions:
      - type: send_sms
        params: { template: confirmation, flag: confirm_sms }
  - name: regulars
    conditions:
      - type: repeat_customer
        params: { min_bookings: 2 }
    actions:
      - type: log
        params: { message: "regular {name}" }
"#;

    struct BrokenStore;

    impl BookingStore for BrokenStore {
        fn get_record(&self, booking_id: &str) -> Result<Option<BookingRecord>, StoreError> {
            if booking_id == "bad" {
                Err(StoreError::Backend("disk I/O error".to_string()))
            } else {
                Ok(None)
            }
        }

        fn create_record(&self, _record: &BookingRecord) -> Result<(), StoreError> {
            Ok(())
        }

        fn update_flag(&self, _id: &str, _flag: Flag, _value: bool) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn engine() -> RuleEngine {
        let mut engine = RuleEngine::from_yaml(RULES).unwrap();
        engine.register_builtins();
        engine
    }

    #[tokio::test]
    async fn test_batch_tallies_and_persists_flags() {
        let engine = engine();
        let store = Arc::new(MemoryStore::new());
        let (services, sms, _) = recording_services(store.clone());

        let first = booking("b1", 90);
        let mut second = booking("b2", 3 * 24 * 60);
        second.status = BookingStatus::Pending;
        let mut third = booking("b3", 120);
        third.phone = "010-9999-0000".to_string();

        let runner = BatchRunner::new(&engine, Arc::new(Settings::default()), services);
        let report = runner.run(&[first, second, third], now()).await;

        assert_eq!(report.bookings, 3);
        assert_eq!(report.skipped, 0);
        // b1 and b3 confirm; b1 and b2 share a phone and count as regulars.
        assert_eq!(report.matched_rules, 4);
        assert_eq!(report.actions_ok, 4);
        assert_eq!(report.actions_failed, 0);
        assert_eq!(sms.texts().len(), 2);
        assert!(store.get_record("b1").unwrap().unwrap().flag(Flag::ConfirmSms));
        assert!(store.get_record("b2").unwrap().is_none());

        let again = runner.run(&[booking("b1", 90)], now()).await;
        assert_eq!(again.matched_rules, 0);
        assert_eq!(sms.texts().len(), 2);
    }

    #[tokio::test]
    async fn test_store_read_failure_skips_only_that_booking() {
        let engine = engine();
        let (mut services, _, _) = recording_services(Arc::new(MemoryStore::new()));
        services.store = Arc::new(BrokenStore);

        let runner = BatchRunner::new(&engine, Arc::new(Settings::default()), services);
        let report = runner.run(&[booking("bad", 90), booking("ok", 90)], now()).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.matched_rules, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_dry_run_sees_stored_flags_and_writes_nothing() {
        let engine = engine();
        let notified = BookingRecord::new("b1").with_flag(Flag::ConfirmSms, true);
        let backing = Arc::new(MemoryStore::with_records([notified]));
        let services = Services::dry_run(Arc::new(OverlayStore::new(backing.clone())));
        let runner = BatchRunner::new(&engine, Arc::new(Settings::default()), services);

        let report = runner.run(&[booking("b1", 90)], now()).await;
        assert_eq!(report.matched_rules, 0);

        let mut fresh = booking("b2", 90);
        fresh.phone = "010-5555-0000".to_string();
        let report = runner.run(&[fresh], now()).await;
        assert_eq!(report.matched_rules, 1);
        assert_eq!(report.actions_ok, 1);
        assert!(backing.get_record("b2").unwrap().is_none());
    }

    #[test]
    fn test_build_engine_strict_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "rules:\n  - name: vip\n    conditions:\n      - type: is_vip\n    actions:\n      - type: log\n        params: {{ message: hi }}\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let mut settings = Settings::default();
        let engine = build_engine(&settings, path).unwrap();
        assert_eq!(engine.unresolved_kinds().len(), 1);

        settings.engine.strict_types = true;
        let Err(err) = build_engine(&settings, path) else {
            panic!("strict_types accepted an unregistered condition type");
        };
        assert!(err.to_string().contains("strict_types"));
    }

    #[test]
    fn test_load_bookings_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"b1","customer_name":"Kim","phone":"010-1234-5678","reserved_at":"2026-10-19T19:00:00","party_size":2}},
               {{"id":"b2","reserved_at":"2026-10-20T12:30:00","status":"cancelled"}}]"#
        )
        .unwrap();

        let bookings = load_bookings(file.path()).unwrap();
        assert_eq!(bookings.len(), 2);
        assert_eq!(bookings[0].party_size, 2);
        assert_eq!(bookings[1].status, BookingStatus::Cancelled);
        assert_eq!(bookings[1].party_size, 1);

        assert!(load_bookings("/nonexistent/bookings.json").is_err());
    }
}
