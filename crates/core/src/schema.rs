//! Function definitions and parameter schemas.
//!
//! A [`FunctionDefinition`] is what the model sees: name, description and a
//! JSON-schema-like parameter list. It is also what incoming arguments are
//! validated against before any handler runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RegistryError, ValidationError};
use crate::function::Arguments;
use crate::value::Value;

/// The JSON-schema primitive types a parameter may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// Coerce a model-supplied value into this type, if it is coercible.
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Integer(i)) => Some(Value::String(i.to_string())),
            (Self::String, Value::Float(f)) => Some(Value::String(f.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

            (Self::Integer, Value::Integer(_)) => Some(value.clone()),
            (Self::Integer, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Some(Value::Integer(*f as i64))
            }
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::Integer),

            (Self::Number, Value::Integer(_) | Value::Float(_)) => Some(value.clone()),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float),

            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },

            (Self::Array, Value::List(_)) => Some(value.clone()),
            (Self::Object, Value::Map(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema for a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParameterType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Allowed values, compared after coercion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Substituted when an optional parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            allowed: Vec::new(),
            minimum: None,
            maximum: None,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Integer, description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Number, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParameterType::Boolean, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_json_schema(&self) -> serde_json::Value {
        let mut schema = serde_json::json!({
            "type": self.kind.as_str(),
            "description": self.description,
        });
        if !self.allowed.is_empty() {
            schema["enum"] = serde_json::Value::Array(
                self.allowed.iter().cloned().map(Into::into).collect(),
            );
        }
        if let Some(min) = self.minimum {
            schema["minimum"] = serde_json::json!(min);
        }
        if let Some(max) = self.maximum {
            schema["maximum"] = serde_json::json!(max);
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone().into();
        }
        schema
    }

    fn check(&self, raw: &Value) -> Result<Value, ValidationError> {
        let value = self
            .kind
            .coerce(raw)
            .ok_or_else(|| ValidationError::TypeMismatch {
                param: self.name.clone(),
                expected: self.kind.to_string(),
                found: raw.type_name().to_string(),
            })?;

        if !self.allowed.is_empty() && !self.allowed.contains(&value) {
            return Err(ValidationError::NotInEnum {
                param: self.name.clone(),
                value: value.to_json_string(),
                allowed: self
                    .allowed
                    .iter()
                    .map(Value::to_json_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum.filter(|min| n < *min) {
                return Err(ValidationError::OutOfRange {
                    param: self.name.clone(),
                    reason: format!("{n} is below the minimum {min}"),
                });
            }
            if let Some(max) = self.maximum.filter(|max| n > *max) {
                return Err(ValidationError::OutOfRange {
                    param: self.name.clone(),
                    reason: format!("{n} is above the maximum {max}"),
                });
            }
        }

        Ok(value)
    }
}

/// A function the model may call. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// Parameters in declaration order.
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter (builder style).
    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Render in the structured tool-calling format:
    /// `{name, description, parameters: {type: object, properties, required}}`.
    pub fn to_tool_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// Parse a definition from the tool-calling JSON format. Accepts both the
    /// bare `{name, description, parameters}` shape and the wrapped
    /// `{type: "function", function: {...}}` shape.
    pub fn from_tool_schema(schema: &serde_json::Value) -> Result<Self, RegistryError> {
        let body = schema.get("function").unwrap_or(schema);
        let invalid = |msg: &str| RegistryError::InvalidDefinition(msg.to_string());

        let name = body
            .get("name")
            .and_then(serde_json::Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| invalid("definition must include a name"))?;
        let description = body
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        let mut definition = Self::new(name, description);
        let Some(params) = body.get("parameters") else {
            return Ok(definition);
        };

        let required: Vec<&str> = params
            .get("required")
            .and_then(serde_json::Value::as_array)
            .map(|r| r.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default();

        if let Some(properties) = params.get("properties").and_then(serde_json::Value::as_object) {
            for (param_name, prop) in properties {
                let kind = prop
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .and_then(ParameterType::parse)
                    .ok_or_else(|| {
                        RegistryError::InvalidDefinition(format!(
                            "parameter '{param_name}' of '{name}' has no supported type"
                        ))
                    })?;
                let description = prop
                    .get("description")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();

                let mut spec = ParameterSpec::new(param_name.clone(), kind, description);
                spec.required = required.contains(&param_name.as_str());
                if let Some(values) = prop.get("enum").and_then(serde_json::Value::as_array) {
                    spec.allowed = values.iter().cloned().map(Value::from).collect();
                }
                spec.minimum = prop.get("minimum").and_then(serde_json::Value::as_f64);
                spec.maximum = prop.get("maximum").and_then(serde_json::Value::as_f64);
                spec.default = prop.get("default").cloned().map(Value::from);
                definition.parameters.push(spec);
            }
        }

        for name in &required {
            if definition.parameter(name).is_none() {
                return Err(RegistryError::InvalidDefinition(format!(
                    "required parameter '{name}' is not declared in properties"
                )));
            }
        }

        Ok(definition)
    }

    /// Validate raw, model-produced arguments against this schema.
    ///
    /// Checks run in a fixed order: shape, unknown keys, then each declared
    /// parameter in declaration order. The first violation is returned.
    pub fn validate(&self, raw: &serde_json::Value) -> Result<Arguments, ValidationError> {
        let empty = serde_json::Map::new();
        let object = match raw {
            serde_json::Value::Object(map) => map,
            // Some providers send `null` or "" for zero-argument calls
            serde_json::Value::Null => &empty,
            serde_json::Value::String(s) if s.trim().is_empty() => &empty,
            other => {
                return Err(ValidationError::NotAnObject {
                    found: Value::from(other.clone()).type_name().to_string(),
                });
            }
        };

        if let Some(unknown) = object.keys().find(|k| self.parameter(k).is_none()) {
            return Err(ValidationError::UnknownParameter {
                param: unknown.clone(),
            });
        }

        let mut validated = BTreeMap::new();
        for spec in &self.parameters {
            let supplied = object
                .get(&spec.name)
                .cloned()
                .map(Value::from)
                .filter(|v| !v.is_null());

            match supplied {
                Some(raw_value) => {
                    validated.insert(spec.name.clone(), spec.check(&raw_value)?);
                }
                None if spec.required => {
                    return Err(ValidationError::MissingParameter {
                        param: spec.name.clone(),
                    });
                }
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(Arguments::new(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather() -> FunctionDefinition {
        FunctionDefinition::new("get_weather", "Current weather for a location")
            .param(ParameterSpec::string("location", "City name").required())
            .param(
                ParameterSpec::string("units", "Unit system")
                    .one_of(["metric", "imperial"])
                    .default_value("metric"),
            )
            .param(ParameterSpec::integer("days", "Forecast days").range(1.0, 5.0))
    }

    #[test]
    fn tool_schema_shape() {
        let schema = weather().to_tool_schema();
        assert_eq!(schema["name"], "get_weather");
        assert_eq!(schema["parameters"]["type"], "object");
        assert_eq!(schema["parameters"]["required"], json!(["location"]));
        assert_eq!(
            schema["parameters"]["properties"]["units"]["enum"],
            json!(["metric", "imperial"])
        );
        assert_eq!(schema["parameters"]["properties"]["days"]["minimum"], json!(1.0));
    }

    #[test]
    fn parses_wrapped_openai_definition() {
        let raw = json!({
            "type": "function",
            "function": {
                "name": "create_reminder",
                "description": "Creates a reminder",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "title": {"type": "string", "description": "Title"},
                        "time": {"type": "string", "description": "When"}
                    },
                    "required": ["title", "time"]
                }
            }
        });
        let def = FunctionDefinition::from_tool_schema(&raw).unwrap();
        assert_eq!(def.name, "create_reminder");
        assert_eq!(def.parameters.len(), 2);
        assert!(def.parameters.iter().all(|p| p.required));
    }

    #[test]
    fn rejects_definition_without_name() {
        let err = FunctionDefinition::from_tool_schema(&json!({"description": "x"})).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefinition(_)));
    }

    #[test]
    fn rejects_required_parameter_missing_from_properties() {
        let raw = json!({
            "name": "f",
            "parameters": {"type": "object", "properties": {}, "required": ["ghost"]}
        });
        assert!(FunctionDefinition::from_tool_schema(&raw).is_err());
    }

    #[test]
    fn validate_applies_defaults_and_coercions() {
        let args = weather()
            .validate(&json!({"location": "Madrid", "days": "3"}))
            .unwrap();
        assert_eq!(args.str("location"), Some("Madrid"));
        assert_eq!(args.str("units"), Some("metric"));
        assert_eq!(args.i64("days"), Some(3));
    }

    #[test]
    fn validate_reports_missing_required() {
        let err = weather().validate(&json!({"units": "metric"})).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingParameter {
                param: "location".into()
            }
        );
    }

    #[test]
    fn validate_null_counts_as_missing() {
        let err = weather().validate(&json!({"location": null})).unwrap_err();
        assert!(matches!(err, ValidationError::MissingParameter { .. }));
    }

    #[test]
    fn validate_enforces_enum() {
        let err = weather()
            .validate(&json!({"location": "Oslo", "units": "kelvin"}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotInEnum { .. }));
    }

    #[test]
    fn validate_enforces_range() {
        let err = weather()
            .validate(&json!({"location": "Oslo", "days": 9}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));
    }

    #[test]
    fn validate_rejects_uncoercible_type() {
        let err = weather()
            .validate(&json!({"location": ["a", "b"]}))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::TypeMismatch {
                param: "location".into(),
                expected: "string".into(),
                found: "array".into(),
            }
        );
    }

    #[test]
    fn validate_rejects_fractional_integer() {
        let err = weather()
            .validate(&json!({"location": "Oslo", "days": 2.5}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::TypeMismatch { .. }));
    }

    #[test]
    fn validate_rejects_unknown_parameter() {
        let err = weather()
            .validate(&json!({"location": "Oslo", "colour": "blue"}))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownParameter {
                param: "colour".into()
            }
        );
    }

    #[test]
    fn validate_rejects_non_object() {
        let err = weather().validate(&json!("{not json")).unwrap_err();
        assert!(matches!(err, ValidationError::NotAnObject { .. }));
    }

    #[test]
    fn zero_argument_function_accepts_null() {
        let def = FunctionDefinition::new("list_reminders", "List pending reminders");
        assert!(def.validate(&serde_json::Value::Null).unwrap().is_empty());
    }

    #[test]
    fn boolean_strings_coerce() {
        let def = FunctionDefinition::new("f", "")
            .param(ParameterSpec::boolean("loud", "").required());
        let args = def.validate(&json!({"loud": "TRUE"})).unwrap();
        assert_eq!(args.get("loud"), Some(&Value::Bool(true)));
    }
}
