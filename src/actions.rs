//! Built-in effects: customer SMS, staff chat, record bookkeeping and logging.

use crate::booking::{BookingRecord, Flag};
use crate::context::EvaluationContext;
use crate::notify::SmsMessage;
use crate::registry::{Action, ActionError, ActionFuture, ActionRegistry};
use crate::rules::{ParamError, Params};
use crate::schema::{
    ActionKind, LogParams, NoParams, NotifyChatParams, SendSmsParams, SetFlagParams,
};
use crate::storage::StoreError;
use crate::template;

/// Register every built-in action under its rule-document name.
pub fn register_builtin_actions(registry: &mut ActionRegistry) {
    for kind in ActionKind::ALL {
        let name = kind.name();
        match kind {
            ActionKind::SendSms => registry.register(name, SendSms),
            ActionKind::SetFlag => registry.register_fn(name, set_flag),
            ActionKind::CreateRecord => registry.register_fn(name, create_record),
            ActionKind::NotifyChat => registry.register(name, NotifyChat),
            ActionKind::Log => registry.register_fn(name, log_message),
        }
    }
    log::debug!("Registered {} built-in actions", ActionKind::ALL.len());
}

fn render(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String, ParamError> {
    template::render(text, lookup).map_err(ParamError::UnknownPlaceholder)
}

/// `send_sms`: render a customer template and deliver it through the SMS gateway.
pub struct SendSms;

impl Action for SendSms {
    fn execute<'a>(&'a self, ctx: &'a EvaluationContext, params: &'a Params) -> ActionFuture<'a> {
        Box::pin(async move {
            let p = params.typed::<SendSmsParams>("send_sms")?;
            let booking = ctx.booking();
            if booking.phone.trim().is_empty() {
                return Err(ActionError::Other(format!(
                    "booking {} has no phone number",
                    booking.id
                )));
            }

            let text = render(ctx.settings().templates.sms(p.template), |key| ctx.lookup(key))?;
            let message = SmsMessage {
                to: booking.phone.clone(),
                text,
            };
            let policy = ctx
                .settings()
                .sms
                .retry_policy()
                .with_max_attempts(p.max_attempts);
            let label = format!("{} SMS for booking {}", p.template.name(), booking.id);

            let ((), attempts) = policy.run(&label, |_| ctx.sms().send(&message)).await?;
            let sent = format!(
                "{} SMS sent to {} after {} attempt(s)",
                p.template.name(),
                booking.phone,
                attempts
            );

            let Some((flag, value)) = p.flag_update() else {
                return Ok(sent);
            };
            persist_flag(ctx, flag, value).map_err(|e| {
                ActionError::Other(format!("{sent}, but {flag} could not be saved: {e}"))
            })?;
            Ok(format!("{sent}; {flag} set to {value}"))
        })
    }
}

/// `notify_chat`: post a staff-facing message to the chat webhook.
pub struct NotifyChat;

impl Action for NotifyChat {
    fn execute<'a>(&'a self, ctx: &'a EvaluationContext, params: &'a Params) -> ActionFuture<'a> {
        Box::pin(async move {
            let p = params.typed::<NotifyChatParams>("notify_chat")?;
            let extra = p.message.clone().unwrap_or_default();
            let text = render(ctx.settings().templates.chat(p.template), |key| match key {
                "message" => Some(extra.clone()),
                _ => ctx.lookup(key),
            })?;
            let policy = ctx
                .settings()
                .chat
                .retry_policy()
                .with_max_attempts(p.max_attempts);
            let label = format!("{} chat post for booking {}", p.template.name(), ctx.booking().id);

            let ((), attempts) = policy.run(&label, |_| ctx.chat().post(&text)).await?;
            Ok(format!(
                "{} chat message posted after {} attempt(s)",
                p.template.name(),
                attempts
            ))
        })
    }
}

/// Write a notification flag, creating the record when missing.
fn persist_flag(ctx: &EvaluationContext, flag: Flag, value: bool) -> Result<(), StoreError> {
    let id = &ctx.booking().id;
    match ctx.store().update_flag(id, flag, value) {
        Err(StoreError::NotFound(_)) => {
            log::debug!("No record for booking {id} yet, creating one to hold {flag}");
            let mut record = BookingRecord::new(id).with_flag(flag, value);
            record.created_at = Some(ctx.local_now());
            ctx.store().create_record(&record)
        }
        other => other,
    }
}

/// `set_flag`: persist a notification flag unconditionally.
fn set_flag(ctx: &EvaluationContext, params: &Params) -> Result<String, ActionError> {
    let p = params.typed::<SetFlagParams>("set_flag")?;
    persist_flag(ctx, p.flag, p.value)?;
    Ok(format!("{} set to {} for booking {}", p.flag, p.value, ctx.booking().id))
}

/// `create_record`: start tracking a booking with every flag cleared.
fn create_record(ctx: &EvaluationContext, params: &Params) -> Result<String, ActionError> {
    params.typed::<NoParams>("create_record")?;
    let id = &ctx.booking().id;
    let mut record = BookingRecord::new(id);
    record.created_at = Some(ctx.local_now());
    match ctx.store().create_record(&record) {
        Ok(()) => Ok(format!("record created for booking {id}")),
        Err(StoreError::Conflict(_)) => Ok(format!("record for booking {id} already exists")),
        Err(e) => Err(e.into()),
    }
}

fn log_message(ctx: &EvaluationContext, params: &Params) -> Result<String, ActionError> {
    let p = params.typed::<LogParams>("log")?;
    let level: log::Level = p.level.into();
    log::log!(level, "booking {}: {}", ctx.booking().id, p.message);
    Ok(p.message.clone())
}
