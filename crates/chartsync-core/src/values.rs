//! Override values declared on a release request

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{CoreError, Result};

/// Override values as a JSON tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Parse the raw `values` text of a release request.
    ///
    /// Empty text and an explicit `null` document mean "no overrides".
    /// Anything else must be a YAML mapping; scalars and sequences are
    /// rejected so they never reach the packaging engine.
    pub fn parse_overrides(raw: Option<&str>) -> Result<Self> {
        let Some(text) = raw.filter(|t| !t.trim().is_empty()) else {
            return Ok(Self::new());
        };

        let value: JsonValue =
            serde_yaml::from_str(text).map_err(|e| CoreError::InvalidValues {
                message: e.to_string(),
            })?;

        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(_) => Ok(Self(value)),
            other => Err(CoreError::InvalidValues {
                message: format!(
                    "expected a mapping of keys to values, got {}",
                    json_kind(&other)
                ),
            }),
        }
    }

    /// Serialize back to YAML (the form handed to the packaging engine)
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }

    match value {
        JsonValue::Object(map) => map.get(path[0]).and_then(|v| get_nested(v, &path[1..])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides_mapping() {
        let values = Values::parse_overrides(Some("l1: v1\nimage:\n  tag: \"2.0\"\n")).unwrap();
        assert_eq!(values.get("l1").unwrap(), "v1");
        assert_eq!(values.get("image.tag").unwrap(), "2.0");
    }

    #[test]
    fn test_parse_overrides_empty_means_none() {
        assert!(Values::parse_overrides(None).unwrap().is_empty());
        assert!(Values::parse_overrides(Some("")).unwrap().is_empty());
        assert!(Values::parse_overrides(Some("  \n")).unwrap().is_empty());
        assert!(Values::parse_overrides(Some("null")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_overrides_rejects_malformed_yaml() {
        let err = Values::parse_overrides(Some("l1:\nl2")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidValues { .. }));
    }

    #[test]
    fn test_parse_overrides_rejects_scalars_and_lists() {
        let err = Values::parse_overrides(Some("just-a-string")).unwrap_err();
        assert!(err.to_string().contains("a string"));

        let err = Values::parse_overrides(Some("- a\n- b\n")).unwrap_err();
        assert!(err.to_string().contains("a list"));
    }

    #[test]
    fn test_to_yaml_reparses() {
        let values = Values::parse_overrides(Some("a:\n  b: 1\n")).unwrap();
        let yaml = values.to_yaml().unwrap();
        assert_eq!(Values::parse_overrides(Some(&yaml)).unwrap(), values);
    }
}
