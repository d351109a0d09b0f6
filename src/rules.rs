use crate::template;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// A named, enable-able pairing of ordered conditions and ordered actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub conditions: Vec<ConditionSpec>,
    pub actions: Vec<ActionSpec>,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            description: None,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn when(mut self, condition: ConditionSpec) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn then(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One condition of a rule, resolved against the condition registry by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl ConditionSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: Params::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key, value);
        self
    }
}

/// One action of a rule, resolved against the action registry by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl ActionSpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            params: Params::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key, value);
        self
    }
}

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("invalid params for '{kind}': {message}")]
    Shape { kind: String, message: String },
    #[error("unknown placeholder '{{{0}}}'")]
    UnknownPlaceholder(String),
}

/// Parameter bag of a condition or action.
///
/// Built-in kinds read it through [`Params::typed`], which decodes into the
/// kind's param struct once and keeps the result. The loader primes that slot
/// while it checks the document. Plugin kinds may read it key by key.
#[derive(Clone, Default)]
pub struct Params {
    values: BTreeMap<String, Value>,
    typed: OnceLock<Arc<dyn Any + Send + Sync>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
        self.typed = OnceLock::new();
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Decode into the typed parameter shape of `kind`.
    pub fn decode<T: DeserializeOwned>(&self, kind: &str) -> Result<T, ParamError> {
        let mapping: serde_yaml::Mapping = self
            .values
            .iter()
            .map(|(k, v)| (Value::String(k.clone()), v.clone()))
            .collect();
        serde_yaml::from_value(Value::Mapping(mapping)).map_err(|e| ParamError::Shape {
            kind: kind.to_string(),
            message: e.to_string(),
        })
    }

    /// Like [`Params::decode`], but the first successful decode is kept and
    /// handed out again on later calls for the same `T`.
    pub fn typed<T>(&self, kind: &str) -> Result<Arc<T>, ParamError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if let Some(cached) = self.typed.get() {
            if let Ok(typed) = Arc::clone(cached).downcast::<T>() {
                return Ok(typed);
            }
        }
        let typed = Arc::new(self.decode::<T>(kind)?);
        let slot: Arc<dyn Any + Send + Sync> = typed.clone();
        // a slot already holding another shape keeps it
        let _ = self.typed.set(slot);
        Ok(typed)
    }

    #[cfg(test)]
    pub(crate) fn is_decoded(&self) -> bool {
        self.typed.get().is_some()
    }

    /// Copy of these params with `{placeholder}`s in string values replaced
    /// through `lookup`.
    ///
    /// Params without placeholders come back as a clone that keeps its decoded
    /// shape.
    pub fn resolve<F>(&self, lookup: F) -> Result<Params, ParamError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut resolved = BTreeMap::new();
        for (key, value) in &self.values {
            resolved.insert(key.clone(), resolve_value(value, &lookup)?);
        }
        if resolved == self.values {
            return Ok(self.clone());
        }
        Ok(Params::from(resolved))
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.values.iter()).finish()
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// `params:` left empty in YAML reads as no params.
impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
        Ok(Params::from(values.unwrap_or_default()))
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            typed: OnceLock::new(),
        }
    }
}

fn resolve_value(
    value: &Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Value, ParamError> {
    match value {
        Value::String(s) => template::render(s, lookup)
            .map(Value::String)
            .map_err(ParamError::UnknownPlaceholder),
        Value::Sequence(items) => items
            .iter()
            .map(|item| resolve_value(item, lookup))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, lookup)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other.clone()),
    }
}
