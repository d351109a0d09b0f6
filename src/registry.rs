//! Name-keyed tables of pluggable predicates and effects.
//!
//! The engine never knows what a condition or action does; it looks the rule's
//! `type` up here at evaluation time. Registering the same name twice replaces
//! the earlier entry, which is how an application overrides a built-in.

use crate::context::EvaluationContext;
use crate::notify::RetryError;
use crate::rules::{ParamError, Params};
use crate::storage::StoreError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Send(#[from] RetryError),
    #[error("{0}")]
    Other(String),
}

/// Output of an effect: a human-readable success message, or why it failed.
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ActionError>> + Send + 'a>>;

/// A predicate over the evaluation context.
pub trait Condition: Send + Sync {
    fn evaluate(&self, ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError>;
}

impl<F> Condition for F
where
    F: Fn(&EvaluationContext, &Params) -> Result<bool, ConditionError> + Send + Sync,
{
    fn evaluate(&self, ctx: &EvaluationContext, params: &Params) -> Result<bool, ConditionError> {
        self(ctx, params)
    }
}

/// A side effect run when a rule matches.
pub trait Action: Send + Sync {
    fn execute<'a>(&'a self, ctx: &'a EvaluationContext, params: &'a Params) -> ActionFuture<'a>;
}

/// Adapter for effects that finish without awaiting anything.
struct SyncAction<F>(F);

impl<F> Action for SyncAction<F>
where
    F: Fn(&EvaluationContext, &Params) -> Result<String, ActionError> + Send + Sync,
{
    fn execute<'a>(&'a self, ctx: &'a EvaluationContext, params: &'a Params) -> ActionFuture<'a> {
        Box::pin(std::future::ready((self.0)(ctx, params)))
    }
}

#[derive(Default, Clone)]
pub struct ConditionRegistry {
    entries: HashMap<String, Arc<dyn Condition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, condition: impl Condition + 'static) {
        if self
            .entries
            .insert(name.to_string(), Arc::new(condition))
            .is_some()
        {
            log::debug!("Condition '{name}' re-registered, replacing previous entry");
        }
    }

    /// Register a closure; the signature pins the closure's argument types.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&EvaluationContext, &Params) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        self.register(name, f);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Condition>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default, Clone)]
pub struct ActionRegistry {
    entries: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, action: impl Action + 'static) {
        if self
            .entries
            .insert(name.to_string(), Arc::new(action))
            .is_some()
        {
            log::debug!("Action '{name}' re-registered, replacing previous entry");
        }
    }

    /// Register a synchronous effect closure.
    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&EvaluationContext, &Params) -> Result<String, ActionError> + Send + Sync + 'static,
    {
        self.register(name, SyncAction(f));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
