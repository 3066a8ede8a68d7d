//! Common types used across CLI modules

use serde_json::Value;
use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    /// Full UUID
    Full(Uuid),
    /// Prefix that should uniquely identify a job
    Prefix(String),
}

impl IdOrPrefix {
    /// Parse a string into an IdOrPrefix
    ///
    /// Attempts to parse as a full UUID first, otherwise treats as a prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.trim().to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

/// A `KEY=VALUE` job parameter from the command line
///
/// The value is read as JSON when it parses (numbers, booleans, objects)
/// and as a plain string otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub key: String,
    pub value: Value,
}

impl std::str::FromStr for Parameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(format!("parameter name missing in '{}'", s));
        }

        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_or_prefix() {
        let id = Uuid::new_v4();
        assert_eq!(IdOrPrefix::parse(&id.to_string()), IdOrPrefix::Full(id));
        assert_eq!(
            IdOrPrefix::parse("3F2A"),
            IdOrPrefix::Prefix("3f2a".to_string())
        );
        assert!(IdOrPrefix::parse("3f2a").as_uuid().is_none());
    }

    #[test]
    fn test_parameter_values() {
        let p: Parameter = "style=formal".parse().unwrap();
        assert_eq!(p.key, "style");
        assert_eq!(p.value, json!("formal"));

        let p: Parameter = "max_length=120".parse().unwrap();
        assert_eq!(p.value, json!(120));

        let p: Parameter = "note=a=b".parse().unwrap();
        assert_eq!(p.value, json!("a=b"));
    }

    #[test]
    fn test_parameter_errors() {
        assert!("style".parse::<Parameter>().is_err());
        assert!("=formal".parse::<Parameter>().is_err());
    }
}
