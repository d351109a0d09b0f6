//! Known condition and action kinds and the typed shape of their params.
//!
//! The loader checks every built-in kind it meets against the shapes below, so a
//! malformed `params` block fails the document before any rule runs. Kinds not
//! listed here are plugin kinds and are only resolved at evaluation time.

use crate::booking::{BookingStatus, Flag};
use crate::rules::{ActionSpec, ConditionSpec, ParamError, Params};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    IsNewBooking,
    HasRecord,
    FlagNotSet,
    FlagSet,
    WithinHours,
    StatusIs,
    HasPhone,
    HasOption,
    PartySizeAtLeast,
    FieldMatches,
    RepeatCustomer,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 11] = [
        ConditionKind::IsNewBooking,
        ConditionKind::HasRecord,
        ConditionKind::FlagNotSet,
        ConditionKind::FlagSet,
        ConditionKind::WithinHours,
        ConditionKind::StatusIs,
        ConditionKind::HasPhone,
        ConditionKind::HasOption,
        ConditionKind::PartySizeAtLeast,
        ConditionKind::FieldMatches,
        ConditionKind::RepeatCustomer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConditionKind::IsNewBooking => "is_new_booking",
            ConditionKind::HasRecord => "has_record",
            ConditionKind::FlagNotSet => "flag_not_set",
            ConditionKind::FlagSet => "flag_set",
            ConditionKind::WithinHours => "within_hours",
            ConditionKind::StatusIs => "status_is",
            ConditionKind::HasPhone => "has_phone",
            ConditionKind::HasOption => "has_option",
            ConditionKind::PartySizeAtLeast => "party_size_at_least",
            ConditionKind::FieldMatches => "field_matches",
            ConditionKind::RepeatCustomer => "repeat_customer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Decode and sanity-check `params` for this kind, keeping the decoded shape
    /// on `params` for evaluation.
    pub fn check(&self, params: &Params) -> Result<(), ParamError> {
        let kind = self.name();
        let invalid = |message: String| ParamError::Shape {
            kind: kind.to_string(),
            message,
        };
        match self {
            ConditionKind::IsNewBooking | ConditionKind::HasRecord | ConditionKind::HasPhone => {
                params.typed::<NoParams>(kind)?;
            }
            ConditionKind::FlagNotSet | ConditionKind::FlagSet => {
                params.typed::<FlagParams>(kind)?;
            }
            ConditionKind::WithinHours => {
                let p = params.typed::<WithinHoursParams>(kind)?;
                if p.hours == 0 {
                    return Err(invalid("hours must be greater than zero".to_string()));
                }
            }
            ConditionKind::StatusIs => {
                let p = params.typed::<StatusParams>(kind)?;
                if p.statuses.is_empty() {
                    return Err(invalid("statuses must not be empty".to_string()));
                }
            }
            ConditionKind::HasOption => {
                params.typed::<HasOptionParams>(kind)?;
            }
            ConditionKind::PartySizeAtLeast => {
                params.typed::<PartySizeParams>(kind)?;
            }
            ConditionKind::FieldMatches => {
                let p = params.typed::<FieldMatchParams>(kind)?;
                Regex::new(&p.pattern).map_err(|e| {
                    invalid(format!("invalid regex pattern '{}': {}", p.pattern, e))
                })?;
            }
            ConditionKind::RepeatCustomer => {
                let p = params.typed::<RepeatCustomerParams>(kind)?;
                if p.min_bookings < 2 {
                    return Err(invalid("min_bookings must be at least 2".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    SendSms,
    SetFlag,
    CreateRecord,
    NotifyChat,
    Log,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::SendSms,
        ActionKind::SetFlag,
        ActionKind::CreateRecord,
        ActionKind::NotifyChat,
        ActionKind::Log,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::SendSms => "send_sms",
            ActionKind::SetFlag => "set_flag",
            ActionKind::CreateRecord => "create_record",
            ActionKind::NotifyChat => "notify_chat",
            ActionKind::Log => "log",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn check(&self, params: &Params) -> Result<(), ParamError> {
        let kind = self.name();
        match self {
            ActionKind::SendSms => {
                let p = params.typed::<SendSmsParams>(kind)?;
                check_attempts(kind, p.max_attempts)?;
                if p.flag_value.is_some() && p.flag.is_none() {
                    return Err(ParamError::Shape {
                        kind: kind.to_string(),
                        message: "flag_value needs a flag".to_string(),
                    });
                }
            }
            ActionKind::SetFlag => {
                params.typed::<SetFlagParams>(kind)?;
            }
            ActionKind::CreateRecord => {
                params.typed::<NoParams>(kind)?;
            }
            ActionKind::NotifyChat => {
                let p = params.typed::<NotifyChatParams>(kind)?;
                check_attempts(kind, p.max_attempts)?;
            }
            ActionKind::Log => {
                params.typed::<LogParams>(kind)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn check_attempts(kind: &str, max_attempts: Option<u32>) -> Result<(), ParamError> {
    if max_attempts == Some(0) {
        return Err(ParamError::Shape {
            kind: kind.to_string(),
            message: "max_attempts must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Shape check for a condition spec; plugin kinds pass untouched.
pub fn check_condition(spec: &ConditionSpec) -> Result<(), ParamError> {
    match ConditionKind::from_name(&spec.kind) {
        Some(kind) => kind.check(&spec.params),
        None => Ok(()),
    }
}

/// Shape check for an action spec; plugin kinds pass untouched.
pub fn check_action(spec: &ActionSpec) -> Result<(), ParamError> {
    match ActionKind::from_name(&spec.kind) {
        Some(kind) => kind.check(&spec.params),
        None => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagParams {
    pub flag: Flag,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithinHoursParams {
    pub hours: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusParams {
    pub statuses: Vec<BookingStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HasOptionParams {
    #[serde(default)]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartySizeParams {
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    CustomerName,
    Note,
    Option,
    Phone,
}

impl MatchField {
    pub fn name(&self) -> &'static str {
        match self {
            MatchField::CustomerName => "customer_name",
            MatchField::Note => "note",
            MatchField::Option => "option",
            MatchField::Phone => "phone",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMatchParams {
    pub field: MatchField,
    pub pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepeatCustomerParams {
    pub min_bookings: usize,
}

/// SMS message templates; text comes from the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsTemplate {
    Confirmation,
    Reminder,
    Option,
    Cancellation,
}

impl SmsTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            SmsTemplate::Confirmation => "confirmation",
            SmsTemplate::Reminder => "reminder",
            SmsTemplate::Option => "option",
            SmsTemplate::Cancellation => "cancellation",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendSmsParams {
    pub template: SmsTemplate,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Written once the message is delivered, never before.
    #[serde(default)]
    pub flag: Option<Flag>,
    /// Value stored in `flag`, true when omitted.
    #[serde(default)]
    pub flag_value: Option<bool>,
}

impl SendSmsParams {
    pub fn flag_update(&self) -> Option<(Flag, bool)> {
        self.flag.map(|flag| (flag, self.flag_value.unwrap_or(true)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetFlagParams {
    pub flag: Flag,
    #[serde(default = "default_flag_value")]
    pub value: bool,
}

fn default_flag_value() -> bool {
    true
}

/// Chat notification templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatTemplate {
    NewBooking,
    Failure,
    Summary,
}

impl ChatTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            ChatTemplate::NewBooking => "new_booking",
            ChatTemplate::Failure => "failure",
            ChatTemplate::Summary => "summary",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyChatParams {
    pub template: ChatTemplate,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogParams {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    pub message: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_resolve() {
        for kind in ConditionKind::ALL {
            assert_eq!(ConditionKind::from_name(kind.name()), Some(kind));
        }
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ConditionKind::from_name("vip_customer"), None);
    }

    #[test]
    fn test_within_hours_requires_integer_hours() {
        assert!(check_condition(&ConditionSpec::new("within_hours").with("hours", 2)).is_ok());
        assert!(check_condition(&ConditionSpec::new("within_hours")).is_err());
        assert!(check_condition(&ConditionSpec::new("within_hours").with("hours", "2h")).is_err());
        assert!(check_condition(&ConditionSpec::new("within_hours").with("hours", 0)).is_err());
    }

    #[test]
    fn test_flag_params_use_known_flags() {
        assert!(check_condition(&ConditionSpec::new("flag_not_set").with("flag", "confirm_sms")).is_ok());
        assert!(check_condition(&ConditionSpec::new("flag_not_set").with("flag", "promo")).is_err());
        assert!(check_action(&ActionSpec::new("set_flag").with("flag", "remind_sms")).is_ok());
    }

    #[test]
    fn test_sms_template_must_come_from_enumeration() {
        assert!(check_action(&ActionSpec::new("send_sms").with("template", "reminder")).is_ok());
        assert!(check_action(&ActionSpec::new("send_sms").with("template", "birthday")).is_err());
        assert!(check_action(
            &ActionSpec::new("send_sms")
                .with("template", "reminder")
                .with("max_attempts", 0)
        )
        .is_err());
    }

    #[test]
    fn test_send_sms_flag_shape() {
        let with_flag = ActionSpec::new("send_sms")
            .with("template", "cancellation")
            .with("flag", "confirm_sms")
            .with("flag_value", false);
        assert!(check_action(&with_flag).is_ok());
        let p = with_flag.params.typed::<SendSmsParams>("send_sms").unwrap();
        assert_eq!(p.flag_update(), Some((Flag::ConfirmSms, false)));

        let orphan_value = ActionSpec::new("send_sms")
            .with("template", "reminder")
            .with("flag_value", true);
        assert!(check_action(&orphan_value).is_err());
        assert!(check_action(
            &ActionSpec::new("send_sms")
                .with("template", "reminder")
                .with("flag", "promo")
        )
        .is_err());
    }

    #[test]
    fn test_check_keeps_decoded_params() {
        let spec = ConditionSpec::new("within_hours").with("hours", 2);
        check_condition(&spec).unwrap();
        assert!(spec.params.is_decoded());
    }

    #[test]
    fn test_unknown_fields_rejected_for_builtins() {
        assert!(check_condition(&ConditionSpec::new("is_new_booking").with("hours", 2)).is_err());
    }

    #[test]
    fn test_field_matches_compiles_pattern() {
        let good = ConditionSpec::new("field_matches")
            .with("field", "note")
            .with("pattern", "(?i)birthday");
        let bad = ConditionSpec::new("field_matches")
            .with("field", "note")
            .with("pattern", "(unclosed");
        assert!(check_condition(&good).is_ok());
        assert!(check_condition(&bad).is_err());
    }

    #[test]
    fn test_plugin_kinds_pass_shape_check() {
        let spec = ConditionSpec::new("vip_customer").with("anything", true);
        assert!(check_condition(&spec).is_ok());
    }
}
