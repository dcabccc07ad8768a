use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;

/// Keys that would trigger prototype pollution in a dynamically-typed
/// backend. The collaborator map is keyed by email; we reject these keys as
/// defence-in-depth even though Rust's `HashMap` has no prototype chain —
/// see spec §9.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// A validated, lower-cased email address used as a collaborator map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim();
        if FORBIDDEN_KEYS.iter().any(|k| k.eq_ignore_ascii_case(trimmed)) {
            return Err(StoreError::MalformedRequest(format!(
                "email '{trimmed}' is not permitted"
            )));
        }
        if trimmed.is_empty() || !trimmed.contains('@') || trimmed.contains(char::is_whitespace) {
            return Err(StoreError::MalformedRequest(format!(
                "'{trimmed}' is not a valid email address"
            )));
        }
        let (local, domain) = trimmed
            .split_once('@')
            .ok_or_else(|| StoreError::MalformedRequest(format!("'{trimmed}' is not a valid email address")))?;
        if local.is_empty() || domain.is_empty() || !domain.contains('.') {
            return Err(StoreError::MalformedRequest(format!(
                "'{trimmed}' is not a valid email address"
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Email::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_address() {
        assert!(Email::parse("Owner@Example.com").is_ok());
    }

    #[test]
    fn rejects_prototype_pollution_keys() {
        assert!(Email::parse("__proto__").is_err());
        assert!(Email::parse("constructor").is_err());
        assert!(Email::parse("prototype").is_err());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(Email::parse("not-an-email").is_err());
        assert!(Email::parse("a@b").is_err());
        assert!(Email::parse("").is_err());
    }

    #[test]
    fn lowercases_for_stable_keying() {
        let e = Email::parse("Owner@Example.COM").unwrap();
        assert_eq!(e.as_str(), "owner@example.com");
    }
}
