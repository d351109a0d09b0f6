use crate::rules::RuleDefinition;
use crate::schema;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read rule document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed rule document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid rule {rule}: {message}")]
    Schema { rule: String, message: String },
}

impl LoadError {
    fn schema(rule: &str, message: impl Into<String>) -> Self {
        LoadError::Schema {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

pub fn load_rules_file(path: impl AsRef<Path>) -> Result<Vec<RuleDefinition>, LoadError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_rules(&content)
}

/// Parse and validate a rule document.
///
/// The document is either a bare sequence of rules or a mapping with a `rules`
/// key. An empty document or an empty/absent rule list yields no rules. The first
/// invalid rule fails the whole document, so callers get every rule or none.
pub fn load_rules(content: &str) -> Result<Vec<RuleDefinition>, LoadError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: Value = serde_yaml::from_str(content)?;
    let entries = match document {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(entries) => entries,
        Value::Mapping(mut map) => match map.remove("rules") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Sequence(entries)) => entries,
            Some(_) => return Err(LoadError::schema("document", "'rules' must be a list")),
        },
        _ => {
            return Err(LoadError::schema(
                "document",
                "expected a list of rules or a mapping with a 'rules' list",
            ))
        }
    };

    let mut rules = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();

    for (index, entry) in entries.into_iter().enumerate() {
        let rule = parse_rule(index, entry)?;
        if !seen.insert(rule.name.clone()) {
            return Err(LoadError::schema(
                &format!("'{}'", rule.name),
                "duplicate rule name",
            ));
        }
        log::debug!(
            "Loaded rule '{}' ({} conditions, {} actions, enabled: {})",
            rule.name,
            rule.conditions.len(),
            rule.actions.len(),
            rule.enabled
        );
        rules.push(rule);
    }

    log::info!("Loaded {} rules", rules.len());
    Ok(rules)
}

fn parse_rule(index: usize, entry: Value) -> Result<RuleDefinition, LoadError> {
    let position = format!("#{}", index + 1);
    let map = match &entry {
        Value::Mapping(map) => map,
        _ => return Err(LoadError::schema(&position, "rule must be a mapping")),
    };

    let name = match map.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(Value::String(_)) => return Err(LoadError::schema(&position, "'name' is empty")),
        Some(_) => return Err(LoadError::schema(&position, "'name' must be a string")),
        None => return Err(LoadError::schema(&position, "missing 'name'")),
    };
    let label = format!("'{name}'");

    check_entry_list(&label, map, "conditions")?;
    check_entry_list(&label, map, "actions")?;

    match map.get("enabled") {
        None | Some(Value::Bool(_)) => {}
        Some(_) => return Err(LoadError::schema(&label, "'enabled' must be a boolean")),
    }
    match map.get("description") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => return Err(LoadError::schema(&label, "'description' must be a string")),
    }

    let rule: RuleDefinition =
        serde_yaml::from_value(entry).map_err(|e| LoadError::schema(&label, e.to_string()))?;

    for condition in &rule.conditions {
        schema::check_condition(condition).map_err(|e| LoadError::schema(&label, e.to_string()))?;
    }
    for action in &rule.actions {
        schema::check_action(action).map_err(|e| LoadError::schema(&label, e.to_string()))?;
    }

    Ok(rule)
}

/// `conditions` / `actions`: a non-empty list of mappings, each with a `type`.
fn check_entry_list(label: &str, map: &Mapping, key: &str) -> Result<(), LoadError> {
    let items = match map.get(key) {
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(LoadError::schema(label, format!("'{key}' must be a list"))),
        None => return Err(LoadError::schema(label, format!("missing '{key}'"))),
    };
    if items.is_empty() {
        return Err(LoadError::schema(label, format!("'{key}' must not be empty")));
    }

    for (i, item) in items.iter().enumerate() {
        let entry = match item {
            Value::Mapping(entry) => entry,
            _ => {
                return Err(LoadError::schema(
                    label,
                    format!("{key}[{i}] must be a mapping"),
                ))
            }
        };
        match entry.get("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => {}
            Some(_) => {
                return Err(LoadError::schema(
                    label,
                    format!("{key}[{i}].type must be a non-empty string"),
                ))
            }
            None => {
                return Err(LoadError::schema(
                    label,
                    format!("{key}[{i}] is missing 'type'"),
                ))
            }
        }
        match entry.get("params") {
            None | Some(Value::Null) | Some(Value::Mapping(_)) => {}
            Some(_) => {
                return Err(LoadError::schema(
                    label,
                    format!("{key}[{i}].params must be a mapping"),
                ))
            }
        }
    }
    Ok(())
}
