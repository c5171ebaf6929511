//! Declarative tool parameter schemas and the validation algorithm.

use serde_json::Value;
use sshmux_errors::McpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn schema_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<&'static [&'static str]>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<&'static str>,
}

impl ParamSpec {
    pub fn new(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: false,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn enum_values(mut self, values: &'static [&'static str]) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn minimum(mut self, value: f64) -> Self {
        self.minimum = Some(value);
        self
    }

    pub fn maximum(mut self, value: f64) -> Self {
        self.maximum = Some(value);
        self
    }

    pub fn pattern(mut self, value: &'static str) -> Self {
        self.pattern = Some(value);
        self
    }

    fn json_schema(&self) -> Value {
        let mut obj = serde_json::json!({
            "type": self.param_type.schema_name(),
            "description": self.description,
        });
        if let Some(default) = &self.default {
            obj["default"] = default.clone();
        }
        if let Some(values) = self.enum_values {
            obj["enum"] = serde_json::json!(values);
        }
        if let Some(min) = self.minimum {
            obj["minimum"] = serde_json::json!(min);
        }
        if let Some(max) = self.maximum {
            obj["maximum"] = serde_json::json!(max);
        }
        if let Some(pattern) = self.pattern {
            obj["pattern"] = serde_json::json!(pattern);
        }
        obj
    }
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    /// Renders `{name, description, inputSchema}` for `tools/list`.
    pub fn to_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            properties.insert(p.name.to_string(), p.json_schema());
            if p.required {
                required.push(p.name);
            }
        }
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }
}

/// Runs the validation algorithm against `input`, returning a new object
/// containing only the declared keys with coerced values.
pub fn validate(tool: &ToolSpec, input: &Value) -> Result<Value, McpError> {
    let input_obj = input.as_object().cloned().unwrap_or_default();
    let mut out = serde_json::Map::new();
    let mut consumed: Vec<String> = Vec::new();

    for spec in &tool.params {
        consumed.push(spec.name.to_string());
        let provided = input_obj.get(spec.name);

        let value = match provided {
            None => {
                if spec.required {
                    return Err(McpError::tool_error(format!(
                        "Required parameter '{}'",
                        spec.name
                    )));
                }
                spec.default.clone().unwrap_or(Value::Null)
            }
            Some(v) => coerce(spec, v)?,
        };

        if let Some(enum_values) = spec.enum_values {
            if let Some(s) = value.as_str() {
                if !enum_values.contains(&s) {
                    return Err(McpError::tool_error(format!(
                        "Parameter '{}' must be one of {:?}",
                        spec.name, enum_values
                    )));
                }
            }
        }

        if let Some(min) = spec.minimum {
            if let Some(n) = value.as_f64() {
                if n < min {
                    return Err(McpError::tool_error(format!(
                        "Parameter '{}' must be >= {min}",
                        spec.name
                    )));
                }
            }
        }
        if let Some(max) = spec.maximum {
            if let Some(n) = value.as_f64() {
                if n > max {
                    return Err(McpError::tool_error(format!(
                        "Parameter '{}' must be <= {max}",
                        spec.name
                    )));
                }
            }
        }

        if let Some(pattern) = spec.pattern {
            if let Some(s) = value.as_str() {
                let re = regex::Regex::new(pattern).map_err(|e| {
                    McpError::internal(format!("invalid pattern for '{}': {e}", spec.name))
                })?;
                if !re.is_match(s) {
                    return Err(McpError::tool_error(format!(
                        "Parameter '{}' does not match the required pattern",
                        spec.name
                    )));
                }
            }
        }

        out.insert(spec.name.to_string(), value);
    }

    let unexpected: Vec<&String> = input_obj.keys().filter(|k| !consumed.contains(k)).collect();
    if !unexpected.is_empty() {
        return Err(McpError::tool_error(format!(
            "Unexpected parameters: {}",
            unexpected
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(Value::Object(out))
}

fn coerce(spec: &ParamSpec, value: &Value) -> Result<Value, McpError> {
    match spec.param_type {
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(type_error(spec, "string")),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => parse_bool(s)
                .map(Value::Bool)
                .ok_or_else(|| type_error(spec, "boolean")),
            _ => Err(type_error(spec, "boolean")),
        },
        ParamType::Integer => match value {
            // Booleans must not satisfy integer — explicit guard.
            Value::Bool(_) => Err(type_error(spec, "integer")),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(|n| serde_json::json!(n))
                .map_err(|_| type_error(spec, "integer")),
            _ => Err(type_error(spec, "integer")),
        },
        ParamType::Number => match value {
            Value::Bool(_) => Err(type_error(spec, "number")),
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .map(|n| serde_json::json!(n))
                .map_err(|_| type_error(spec, "number")),
            _ => Err(type_error(spec, "number")),
        },
        ParamType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(type_error(spec, "object")),
        },
        ParamType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(type_error(spec, "array")),
        },
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn type_error(spec: &ParamSpec, expected: &str) -> McpError {
    McpError::tool_error(format!("Parameter '{}' must be a {expected}", spec.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tool() -> ToolSpec {
        ToolSpec {
            name: "test_tool",
            description: "test",
            params: vec![
                ParamSpec::new("hostname", ParamType::String, "host").required(),
                ParamSpec::new("port", ParamType::Integer, "port")
                    .minimum(1.0)
                    .maximum(65535.0),
            ],
        }
    }

    #[test]
    fn missing_required_param_fails() {
        let err = validate(&test_tool(), &serde_json::json!({})).unwrap_err();
        assert!(err.message.contains("Required parameter 'hostname'"));
    }

    #[test]
    fn unexpected_param_fails() {
        let err = validate(&test_tool(), &serde_json::json!({"hostname": "h", "extra": 1})).unwrap_err();
        assert!(err.message.contains("Unexpected parameters"));
    }

    #[test]
    fn boolean_string_values_are_coerced() {
        let tool = ToolSpec {
            name: "bool_tool",
            description: "d",
            params: vec![ParamSpec::new("flag", ParamType::Boolean, "flag")],
        };
        let out = validate(&tool, &serde_json::json!({"flag": "yes"})).unwrap();
        assert_eq!(out["flag"], true);
    }

    #[test]
    fn boolean_is_rejected_as_integer() {
        let tool = ToolSpec {
            name: "int_tool",
            description: "d",
            params: vec![ParamSpec::new("n", ParamType::Integer, "n")],
        };
        let err = validate(&tool, &serde_json::json!({"n": true})).unwrap_err();
        assert!(err.message.contains("must be a integer"));
    }

    #[test]
    fn port_out_of_range_is_rejected() {
        let err = validate(&test_tool(), &serde_json::json!({"hostname": "h", "port": 70000})).unwrap_err();
        assert!(err.message.contains("must be <= 65535"));
    }

    #[test]
    fn port_at_boundaries_accepted() {
        assert!(validate(&test_tool(), &serde_json::json!({"hostname": "h", "port": 1})).is_ok());
        assert!(validate(&test_tool(), &serde_json::json!({"hostname": "h", "port": 65535})).is_ok());
    }
}
