pub mod actions;
pub mod batch;
pub mod booking;
pub mod conditions;
pub mod config;
pub mod context;
pub mod engine;
pub mod loader;
pub mod notify;
pub mod registry;
pub mod result;
pub mod rules;
pub mod schema;
pub mod storage;
pub mod template;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::{BatchReport, BatchRunner};
pub use booking::{Booking, BookingRecord, BookingStatus, Flag};
pub use config::Settings;
pub use context::{EvaluationContext, Services};
pub use engine::RuleEngine;
pub use loader::LoadError;
pub use registry::{Action, ActionError, Condition, ConditionError};
pub use result::ActionResult;
pub use rules::{ActionSpec, ConditionSpec, Params, RuleDefinition};
