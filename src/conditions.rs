//! Built-in predicates over a booking and its persisted record.

use crate::context::EvaluationContext;
use crate::registry::{Condition, ConditionError, ConditionRegistry};
use crate::rules::Params;
use crate::schema::{
    ConditionKind, FieldMatchParams, FlagParams, HasOptionParams, PartySizeParams,
    RepeatCustomerParams, StatusParams, WithinHoursParams,
};
use chrono::TimeDelta;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// Register every built-in condition under its rule-document name.
pub fn register_builtin_conditions(registry: &mut ConditionRegistry) {
    for kind in ConditionKind::ALL {
        let name = kind.name();
        match kind {
            ConditionKind::IsNewBooking => registry.register_fn(name, is_new_booking),
            ConditionKind::HasRecord => registry.register_fn(name, has_record),
            ConditionKind::FlagNotSet => registry.register_fn(name, flag_not_set),
            ConditionKind::FlagSet => registry.register_fn(name, flag_set),
            ConditionKind::WithinHours => registry.register_fn(name, within_hours),
            ConditionKind::StatusIs => registry.register_fn(name, status_is),
            ConditionKind::HasPhone => registry.register_fn(name, has_phone),
            ConditionKind::HasOption => registry.register_fn(name, has_option),
            ConditionKind::PartySizeAtLeast => registry.register_fn(name, party_size_at_least),
            ConditionKind::FieldMatches => registry.register(name, FieldMatches::default()),
            ConditionKind::RepeatCustomer => registry.register_fn(name, repeat_customer),
        }
    }
    log::debug!("Registered {} built-in conditions", ConditionKind::ALL.len());
}

fn is_new_booking(ctx: &EvaluationContext, _params: &Params) -> Result<bool, ConditionError> {
    Ok(ctx.is_new_booking())
}

fn has_record(ctx: &EvaluationContext, _params: &Params) -> Result<bool, ConditionError> {
    Ok(!ctx.is_new_booking())
}

fn flag_not_set(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<FlagParams>("flag_not_set")?;
    Ok(!ctx.flag(p.flag))
}

fn flag_set(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<FlagParams>("flag_set")?;
    Ok(ctx.flag(p.flag))
}

/// Reservation is still ahead and no more than `hours` away.
fn within_hours(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<WithinHoursParams>("within_hours")?;
    let remaining = ctx.time_until_reservation();
    Ok(remaining > TimeDelta::zero() && remaining <= TimeDelta::hours(i64::from(p.hours)))
}

fn status_is(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<StatusParams>("status_is")?;
    Ok(p.statuses.contains(&ctx.booking().status))
}

fn has_phone(ctx: &EvaluationContext, _params: &Params) -> Result<bool, ConditionError> {
    Ok(!ctx.booking().phone.trim().is_empty())
}

fn has_option(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<HasOptionParams>("has_option")?;
    let option = match ctx.booking().option.as_deref().map(str::trim) {
        Some(option) if !option.is_empty() => option,
        _ => return Ok(false),
    };
    Ok(match &p.options {
        Some(allowed) => allowed.iter().any(|o| o == option),
        None => true,
    })
}

fn party_size_at_least(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<PartySizeParams>("party_size_at_least")?;
    Ok(ctx.booking().party_size >= p.size)
}

fn repeat_customer(ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
    let p = params.typed::<RepeatCustomerParams>("repeat_customer")?;
    let phone = &ctx.booking().phone;
    if phone.trim().is_empty() {
        return Ok(false);
    }
    Ok(ctx.roster().bookings_for(phone) >= p.min_bookings)
}

/// `field_matches`: regex over one booking text field.
///
/// Compiled patterns are kept per pattern string for the life of the engine.
#[derive(Default)]
pub struct FieldMatches {
    cache: Mutex<HashMap<String, Regex>>,
}

impl FieldMatches {
    fn is_match(&self, pattern: &str, value: &str) -> Result<bool, ConditionError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| ConditionError::Other("pattern cache lock poisoned".to_string()))?;
        if let Some(regex) = cache.get(pattern) {
            return Ok(regex.is_match(value));
        }
        let regex = Regex::new(pattern)
            .map_err(|e| ConditionError::Other(format!("invalid pattern '{pattern}': {e}")))?;
        let matched = regex.is_match(value);
        cache.insert(pattern.to_string(), regex);
        Ok(matched)
    }
}

impl Condition for FieldMatches {
    fn evaluate(&self, ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
        let p = params.typed::<FieldMatchParams>("field_matches")?;
        let value = ctx.booking().field(p.field.name()).unwrap_or_default();
        self.is_match(&p.pattern, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Booking, BookingRecord, BookingStatus, Flag, Roster};
    use crate::context::Services;
    use crate::rules::ConditionSpec;
    use crate::test_support::{booking, context_at, context_for};
    use std::sync::Arc;

    fn check(ctx: &EvaluationContext, spec: ConditionSpec) -> bool {
        let mut registry = ConditionRegistry::new();
        register_builtin_conditions(&mut registry);
        registry
            .get(&spec.kind)
            .unwrap()
            .evaluate(ctx, &spec.params)
            .unwrap()
    }

    fn with(booking: Booking) -> EvaluationContext {
        context_for(booking, None, Services::default())
    }

    #[test]
    fn test_every_kind_registered() {
        let mut registry = ConditionRegistry::new();
        register_builtin_conditions(&mut registry);
        for kind in ConditionKind::ALL {
            assert!(registry.contains(kind.name()), "{kind} missing");
        }
    }

    #[test]
    fn test_record_presence() {
        let fresh = context_at(None, 60);
        let known = context_at(Some(BookingRecord::new("b1")), 60);
        assert!(check(&fresh, ConditionSpec::new("is_new_booking")));
        assert!(!check(&known, ConditionSpec::new("is_new_booking")));
        assert!(check(&known, ConditionSpec::new("has_record")));
        assert!(!check(&fresh, ConditionSpec::new("has_record")));
    }

    #[test]
    fn test_flags_treat_missing_record_as_unset() {
        let not_set = ConditionSpec::new("flag_not_set").with("flag", "remind_sms");
        let set = ConditionSpec::new("flag_set").with("flag", "remind_sms");

        let fresh = context_at(None, 60);
        assert!(check(&fresh, not_set.clone()));
        assert!(!check(&fresh, set.clone()));

        let reminded = context_at(
            Some(BookingRecord::new("b1").with_flag(Flag::RemindSms, true)),
            60,
        );
        assert!(!check(&reminded, not_set));
        assert!(check(&reminded, set));
    }

    #[test]
    fn test_within_hours_window() {
        let spec = ConditionSpec::new("within_hours").with("hours", 2);
        assert!(check(&context_at(None, 90), spec.clone()));
        assert!(check(&context_at(None, 120), spec.clone()));
        assert!(!check(&context_at(None, 121), spec.clone()));
        assert!(!check(&context_at(None, 0), spec.clone()));
        assert!(!check(&context_at(None, -30), spec));
    }

    #[test]
    fn test_status_and_phone() {
        let mut cancelled = booking("b1", 60);
        cancelled.status = BookingStatus::Cancelled;
        cancelled.phone = "  ".to_string();
        let ctx = with(cancelled);

        let statuses = ConditionSpec::new("status_is").with(
            "statuses",
            serde_yaml::Value::Sequence(vec!["pending".into(), "cancelled".into()]),
        );
        assert!(check(&ctx, statuses));
        assert!(!check(&ctx, ConditionSpec::new("has_phone")));
        assert!(check(&context_at(None, 60), ConditionSpec::new("has_phone")));
    }

    #[test]
    fn test_has_option_with_and_without_list() {
        let mut b = booking("b1", 60);
        b.option = Some("anniversary cake".to_string());
        let ctx = with(b);

        assert!(check(&ctx, ConditionSpec::new("has_option")));
        let listed = ConditionSpec::new("has_option").with(
            "options",
            serde_yaml::Value::Sequence(vec!["anniversary cake".into()]),
        );
        assert!(check(&ctx, listed));
        let other = ConditionSpec::new("has_option")
            .with("options", serde_yaml::Value::Sequence(vec!["wine".into()]));
        assert!(!check(&ctx, other));

        let mut blank = booking("b2", 60);
        blank.option = Some(String::new());
        assert!(!check(&with(blank), ConditionSpec::new("has_option")));
    }

    #[test]
    fn test_party_size_and_field_match() {
        let mut b = booking("b1", 60);
        b.party_size = 6;
        b.note = Some("Window seat, VIP guest".to_string());
        let ctx = with(b);

        assert!(check(&ctx, ConditionSpec::new("party_size_at_least").with("size", 6)));
        assert!(!check(&ctx, ConditionSpec::new("party_size_at_least").with("size", 7)));

        let vip = ConditionSpec::new("field_matches")
            .with("field", "note")
            .with("pattern", "(?i)\\bvip\\b");
        assert!(check(&ctx, vip.clone()));
        assert!(check(&ctx, vip));
        let name = ConditionSpec::new("field_matches")
            .with("field", "customer_name")
            .with("pattern", "^Lee");
        assert!(!check(&ctx, name));
    }

    #[test]
    fn test_repeat_customer_uses_roster() {
        let first = booking("b1", 60);
        let mut second = booking("b2", 24 * 60);
        second.phone = "01012345678".to_string();
        let roster = Arc::new(Roster::from_bookings(&[first.clone(), second]));

        let ctx = with(first).with_roster(roster);
        let spec = ConditionSpec::new("repeat_customer").with("min_bookings", 2);
        assert!(check(&ctx, spec.clone()));
        assert!(!check(&context_at(None, 60), spec));
    }

    #[test]
    fn test_bad_params_surface_as_error() {
        let mut registry = ConditionRegistry::new();
        register_builtin_conditions(&mut registry);
        let ctx = context_at(None, 60);
        let spec = ConditionSpec::new("within_hours").with("hours", "soon");
        let result = registry.get("within_hours").unwrap().evaluate(&ctx, &spec.params);
        assert!(matches!(result, Err(ConditionError::Param(_))));
    }
}
