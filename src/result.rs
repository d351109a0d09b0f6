use crate::rules::Params;
use serde::Serialize;

/// Outcome of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub rule_name: String,
    pub action_type: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Params as the action saw them, placeholders resolved.
    pub params: Params,
}

impl ActionResult {
    pub fn succeeded(rule_name: &str, action_type: &str, params: Params, message: String) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            action_type: action_type.to_string(),
            success: true,
            message,
            error: None,
            params,
        }
    }

    pub fn failed(
        rule_name: &str,
        action_type: &str,
        params: Params,
        message: &str,
        error: String,
    ) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            action_type: action_type.to_string(),
            success: false,
            message: message.to_string(),
            error: Some(error),
            params,
        }
    }
}

/// Collects results for one booking in rule-then-action order.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    results: Vec<ActionResult>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ActionResult) {
        if result.success {
            log::debug!(
                "Rule '{}' action '{}' succeeded: {}",
                result.rule_name,
                result.action_type,
                result.message
            );
        } else {
            log::warn!(
                "Rule '{}' action '{}' failed: {} ({})",
                result.rule_name,
                result.action_type,
                result.message,
                result.error.as_deref().unwrap_or("no detail")
            );
        }
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    pub fn into_results(self) -> Vec<ActionResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_keeps_order_and_counts_failures() {
        let mut acc = ResultAccumulator::new();
        acc.push(ActionResult::succeeded("r1", "a", Params::new(), "ok".to_string()));
        acc.push(ActionResult::failed(
            "r1",
            "b",
            Params::new(),
            "action failed",
            "boom".to_string(),
        ));
        acc.push(ActionResult::succeeded("r2", "c", Params::new(), "ok".to_string()));

        assert_eq!(acc.len(), 3);
        assert_eq!(acc.failures(), 1);
        let kinds: Vec<_> = acc
            .into_results()
            .into_iter()
            .map(|r| (r.rule_name, r.action_type))
            .collect();
        assert_eq!(
            kinds,
            [
                ("r1".to_string(), "a".to_string()),
                ("r1".to_string(), "b".to_string()),
                ("r2".to_string(), "c".to_string())
            ]
        );
    }

    #[test]
    fn test_serializes_without_empty_error() {
        let ok = ActionResult::succeeded("r", "log", Params::new(), "logged".to_string());
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["success"], true);
    }
}
