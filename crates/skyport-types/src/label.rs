use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::StoreError;

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^v[1-9][0-9]*$").expect("static regex"))
}

/// A release label, `v<N>` with `N` starting at 1 and strictly increasing
/// within a deployment (spec §3, §8 invariant 1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if !label_regex().is_match(raw) {
            return Err(StoreError::MalformedRequest(format!(
                "'{raw}' is not a valid release label"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn first() -> Self {
        Self("v1".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn number(&self) -> u64 {
        self.0[1..].parse().expect("validated by parse()")
    }

    /// The label that must follow this one in a package history.
    pub fn next(&self) -> Self {
        Self(format!("v{}", self.number() + 1))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Label {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Label::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_label_is_v1() {
        assert_eq!(Label::first().as_str(), "v1");
    }

    #[test]
    fn next_increments_the_number() {
        let v1 = Label::parse("v1").unwrap();
        assert_eq!(v1.next().as_str(), "v2");
        let v9 = Label::parse("v9").unwrap();
        assert_eq!(v9.next().as_str(), "v10");
    }

    #[test]
    fn rejects_malformed_labels() {
        assert!(Label::parse("v0").is_err());
        assert!(Label::parse("v01").is_err());
        assert!(Label::parse("1").is_err());
        assert!(Label::parse("vX").is_err());
    }
}
