use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-' or '_'"
    ))
}

/// Tool and function ids are namespaced (`portia:slack:bot:send_message`,
/// `math.add`), so `:` and `.` are accepted as separators.
pub fn validate_qualified_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value.starts_with([':', '.']) || value.ends_with([':', '.']) {
        return Err(format!("{kind} must not start or end with a separator"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':' | '.'))
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-', '_', ':' or '.'"
    ))
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal, $validate:path) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                $validate($kind, raw)?;
                Ok(Self(raw.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                self.as_str()
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = String;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(|err| {
                    D::Error::custom(format!("invalid {} `{}`: {}", $kind, raw, err))
                })
            }
        }
    };
}

define_id_type!(StepName, "step name", validate_identifier_value);
define_id_type!(InputName, "input name", validate_identifier_value);
define_id_type!(SchemaId, "schema id", validate_identifier_value);
define_id_type!(ToolId, "tool id", validate_qualified_identifier_value);
define_id_type!(FunctionId, "function id", validate_qualified_identifier_value);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_names_reject_separators() {
        assert!(StepName::parse("get_ticket").is_ok());
        assert!(StepName::parse("get.ticket").is_err());
        assert!(StepName::parse("").is_err());
    }

    #[test]
    fn tool_ids_accept_namespaces() {
        assert!(ToolId::parse("portia:mcp:api.githubcopilot.com:list_commits").is_ok());
        assert!(ToolId::parse(":leading").is_err());
        assert!(ToolId::parse("trailing.").is_err());
        assert!(ToolId::parse("with space").is_err());
    }
}
