use crate::context::EvaluationContext;
use crate::loader::{self, LoadError};
use crate::registry::{Action, ActionError, ActionRegistry, Condition, ConditionError, ConditionRegistry};
use crate::result::{ActionResult, ResultAccumulator};
use crate::rules::{ActionSpec, Params, RuleDefinition};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Binds a loaded rule set to the registered predicates and effects.
///
/// Rules are fixed at construction. Registration takes `&mut self` and
/// processing takes `&self`, so everything is wired before the first booking.
pub struct RuleEngine {
    rules: Vec<RuleDefinition>,
    conditions: ConditionRegistry,
    actions: ActionRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindCategory {
    Condition,
    Action,
}

/// A `type` named by a rule that nothing has registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedKind {
    pub rule: String,
    pub category: KindCategory,
    pub kind: String,
}

impl fmt::Display for UnresolvedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let category = match self.category {
            KindCategory::Condition => "condition",
            KindCategory::Action => "action",
        };
        write!(f, "rule '{}': {} type '{}' is not registered", self.rule, category, self.kind)
    }
}

impl RuleEngine {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self {
            rules,
            conditions: ConditionRegistry::new(),
            actions: ActionRegistry::new(),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, LoadError> {
        Ok(Self::new(loader::load_rules(content)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Ok(Self::new(loader::load_rules_file(path)?))
    }

    pub fn register_condition(&mut self, name: &str, condition: impl Condition + 'static) {
        self.conditions.register(name, condition);
    }

    pub fn register_condition_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&EvaluationContext, &Params) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        self.conditions.register_fn(name, f);
    }

    pub fn register_action(&mut self, name: &str, action: impl Action + 'static) {
        self.actions.register(name, action);
    }

    pub fn register_action_fn<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&EvaluationContext, &Params) -> Result<String, ActionError> + Send + Sync + 'static,
    {
        self.actions.register_fn(name, f);
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn conditions(&self) -> &ConditionRegistry {
        &self.conditions
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn conditions_mut(&mut self) -> &mut ConditionRegistry {
        &mut self.conditions
    }

    pub fn actions_mut(&mut self) -> &mut ActionRegistry {
        &mut self.actions
    }

    /// Wire every built-in condition and action. Call before registering
    /// application overrides, since later registrations win.
    pub fn register_builtins(&mut self) {
        crate::conditions::register_builtin_conditions(&mut self.conditions);
        crate::actions::register_builtin_actions(&mut self.actions);
    }

    /// Every condition/action type used by a rule with no registration behind it.
    ///
    /// Meant to be checked once after startup wiring; evaluation itself treats
    /// these as failing conditions / failed actions.
    pub fn unresolved_kinds(&self) -> Vec<UnresolvedKind> {
        let mut missing = Vec::new();
        for rule in &self.rules {
            for spec in &rule.conditions {
                if !self.conditions.contains(&spec.kind) {
                    missing.push(UnresolvedKind {
                        rule: rule.name.clone(),
                        category: KindCategory::Condition,
                        kind: spec.kind.clone(),
                    });
                }
            }
            for spec in &rule.actions {
                if !self.actions.contains(&spec.kind) {
                    missing.push(UnresolvedKind {
                        rule: rule.name.clone(),
                        category: KindCategory::Action,
                        kind: spec.kind.clone(),
                    });
                }
            }
        }
        missing
    }

    /// AND over the rule's conditions, in order, stopping at the first false.
    ///
    /// Disabled rules are false without touching any condition. An unregistered
    /// type, an error return or a panic all count as false for that condition.
    pub fn evaluate(&self, rule: &RuleDefinition, ctx: &EvaluationContext) -> bool {
        if !rule.enabled {
            log::debug!("Rule '{}' is disabled", rule.name);
            return false;
        }
        if rule.conditions.is_empty() {
            log::warn!("Rule '{}' has no conditions; treating as no match", rule.name);
            return false;
        }

        for (index, spec) in rule.conditions.iter().enumerate() {
            let condition = match self.conditions.get(&spec.kind) {
                Some(condition) => condition,
                None => {
                    log::warn!(
                        "Rule '{}': condition type '{}' is not registered, treating as false",
                        rule.name,
                        spec.kind
                    );
                    return false;
                }
            };

            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| condition.evaluate(ctx, &spec.params)));
            match outcome {
                Ok(Ok(true)) => {
                    log::debug!(
                        "Rule '{}' condition #{} '{}' passed",
                        rule.name,
                        index + 1,
                        spec.kind
                    );
                }
                Ok(Ok(false)) => {
                    log::debug!(
                        "Rule '{}' condition #{} '{}' failed, skipping remaining conditions",
                        rule.name,
                        index + 1,
                        spec.kind
                    );
                    return false;
                }
                Ok(Err(e)) => {
                    log::warn!(
                        "Rule '{}' condition '{}' errored, treating as false: {e}",
                        rule.name,
                        spec.kind
                    );
                    return false;
                }
                Err(payload) => {
                    log::warn!(
                        "Rule '{}' condition '{}' panicked, treating as false: {}",
                        rule.name,
                        spec.kind,
                        panic_message(payload.as_ref())
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Run the rule's actions in declared order, one result per action.
    ///
    /// A failing action never stops the ones after it.
    pub async fn execute(&self, rule: &RuleDefinition, ctx: &EvaluationContext) -> Vec<ActionResult> {
        let mut acc = ResultAccumulator::new();
        self.dispatch(rule, ctx, &mut acc).await;
        acc.into_results()
    }

    /// Run every rule against one booking and collect the action results.
    ///
    /// All rules are considered in load order; matching one does not stop the
    /// others. Nothing raised inside a rule escapes this call.
    pub async fn process(&self, ctx: &EvaluationContext) -> Vec<ActionResult> {
        let mut acc = ResultAccumulator::new();

        for rule in &self.rules {
            let pass = AssertUnwindSafe(self.run_rule(rule, ctx, &mut acc))
                .catch_unwind()
                .await;
            if let Err(payload) = pass {
                log::error!(
                    "Rule '{}' aborted by an internal fault, continuing with next rule: {}",
                    rule.name,
                    panic_message(payload.as_ref())
                );
            }
        }

        log::debug!(
            "Booking '{}': {} action results, {} failed",
            ctx.booking().id,
            acc.len(),
            acc.failures()
        );
        acc.into_results()
    }

    async fn run_rule(
        &self,
        rule: &RuleDefinition,
        ctx: &EvaluationContext,
        acc: &mut ResultAccumulator,
    ) {
        let matches = self.evaluate(rule, ctx);
        log::info!("Rule '{}' evaluation result: {}", rule.name, matches);
        if matches {
            log::info!(
                "Rule '{}' matched booking '{}', running {} actions",
                rule.name,
                ctx.booking().id,
                rule.actions.len()
            );
            self.dispatch(rule, ctx, acc).await;
        }
    }

    async fn dispatch(&self, rule: &RuleDefinition, ctx: &EvaluationContext, acc: &mut ResultAccumulator) {
        for spec in &rule.actions {
            let result = self.run_action(rule, spec, ctx).await;
            acc.push(result);
        }
    }

    async fn run_action(
        &self,
        rule: &RuleDefinition,
        spec: &ActionSpec,
        ctx: &EvaluationContext,
    ) -> ActionResult {
        let action = match self.actions.get(&spec.kind) {
            Some(action) => action,
            None => {
                return ActionResult::failed(
                    &rule.name,
                    &spec.kind,
                    spec.params.clone(),
                    "action type not registered",
                    format!("no action registered under '{}'", spec.kind),
                )
            }
        };

        let params = match spec.params.resolve(|key| ctx.lookup(key)) {
            Ok(params) => params,
            Err(e) => {
                return ActionResult::failed(
                    &rule.name,
                    &spec.kind,
                    spec.params.clone(),
                    "could not resolve params",
                    e.to_string(),
                )
            }
        };

        let outcome = AssertUnwindSafe(async { action.execute(ctx, &params).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(message)) => ActionResult::succeeded(&rule.name, &spec.kind, params, message),
            Ok(Err(e)) => {
                ActionResult::failed(&rule.name, &spec.kind, params, "action failed", e.to_string())
            }
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                ActionResult::failed(&rule.name, &spec.kind, params, "action panicked", detail)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
