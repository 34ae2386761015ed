use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Identifiers end up as `_`-separated components of run directory names, so
/// `_` itself is not allowed.
pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only lowercase ASCII letters, digits or '-'"
    ))
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                let normalized = raw.trim().to_ascii_lowercase();
                validate_identifier_value($kind, &normalized)?;
                Ok(Self(normalized))
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

define_id_type!(ProviderId, "provider id");
define_id_type!(PromptStyle, "prompt style");

impl Default for PromptStyle {
    fn default() -> Self {
        Self("detailed".to_string())
    }
}

/// Maps free text (workflow names, model tags such as `llava:13b`) onto the
/// character set allowed inside one run directory component.
pub fn sanitize_component(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let collapsed = mapped
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if collapsed.is_empty() {
        "unnamed".to_string()
    } else {
        collapsed
    }
}

/// Short stable id for a work item, derived from its source path.
pub fn item_id_for_path(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_normalize_case_and_reject_underscores() {
        assert_eq!(ProviderId::parse(" Ollama ").expect("parse").as_str(), "ollama");
        assert!(ProviderId::parse("open_ai").is_err());
        assert!(ProviderId::parse("").is_err());
    }

    #[test]
    fn sanitize_component_keeps_separator_free_names() {
        assert_eq!(sanitize_component("llava:13b"), "llava-13b");
        assert_eq!(sanitize_component("Summer_Trip 2024"), "Summer-Trip-2024");
        assert_eq!(sanitize_component("gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(sanitize_component("///"), "unnamed");
    }

    #[test]
    fn item_ids_are_stable_and_short() {
        let a = item_id_for_path(Path::new("photos/a.jpg"));
        assert_eq!(a.len(), 12);
        assert_eq!(a, item_id_for_path(Path::new("photos/a.jpg")));
        assert_ne!(a, item_id_for_path(Path::new("photos/b.jpg")));
    }
}
