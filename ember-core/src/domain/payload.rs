//! Job payload

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Opaque unit of work handed to the worker function
///
/// `input` is the text to transform; `parameters` carries optional knobs
/// such as `style` or `source_language` that only the worker interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub input: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

impl Payload {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            parameters: Map::new(),
        }
    }

    /// Attach an optional parameter
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Look up a string parameter
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// Check the payload is admissible
    ///
    /// The input must contain something other than whitespace and must not
    /// exceed `max_chars` characters.
    pub fn validate(&self, max_chars: usize) -> Result<(), ValidationError> {
        if self.input.trim().is_empty() {
            return Err(ValidationError::EmptyInput);
        }

        let len = self.input.chars().count();
        if len > max_chars {
            return Err(ValidationError::InputTooLong {
                len,
                max: max_chars,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_text() {
        assert!(Payload::new("hello").validate(512).is_ok());
    }

    #[test]
    fn test_validate_rejects_blank() {
        assert_eq!(
            Payload::new("").validate(512),
            Err(ValidationError::EmptyInput)
        );
        assert_eq!(
            Payload::new("  \n\t").validate(512),
            Err(ValidationError::EmptyInput)
        );
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        let arabic = "مرحبا";
        assert!(Payload::new(arabic).validate(5).is_ok());
        assert_eq!(
            Payload::new(arabic).validate(4),
            Err(ValidationError::InputTooLong { len: 5, max: 4 })
        );
    }

    #[test]
    fn test_parameters_are_omitted_when_empty() {
        let json = serde_json::to_value(Payload::new("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"input": "hi"}));

        let payload = Payload::new("hi").with_parameter("style", "formal");
        assert_eq!(payload.parameter_str("style"), Some("formal"));
        assert_eq!(payload.parameter_str("missing"), None);
    }
}
