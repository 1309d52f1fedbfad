use crate::error::DefinitionError;
use serde::Deserialize;
use std::fmt;

/// A flow's declared spec version. Missing components are zero, so `"11"` is `11.0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SpecVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses `"11"`, `"11.12"` or `"11.12.3"`.
    pub fn parse(text: &str) -> Result<Self, DefinitionError> {
        let invalid = || DefinitionError::InvalidVersion(text.to_string());
        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid());
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Reads a version as found in raw JSON, where it may be a string or a number.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DefinitionError> {
        match value {
            serde_json::Value::String(s) => Self::parse(s),
            serde_json::Value::Number(n) => Self::parse(&n.to_string()),
            other => Err(DefinitionError::InvalidVersion(other.to_string())),
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The range of spec major versions the engine executes, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    pub min_major: u32,
    pub max_major: u32,
}

impl Default for VersionGate {
    fn default() -> Self {
        Self {
            min_major: 11,
            max_major: 13,
        }
    }
}

impl VersionGate {
    pub fn new(min_major: u32, max_major: u32) -> Self {
        Self {
            min_major,
            max_major,
        }
    }

    pub fn is_supported(&self, version: &SpecVersion) -> bool {
        (self.min_major..=self.max_major).contains(&version.major)
    }
}

/// Reads only the declared version out of a raw flow document.
///
/// Nothing else in the document is looked at, so a flow with an unsupported version
/// is rejected no matter how broken the rest of it is.
pub fn probe_version(raw: &str) -> Result<SpecVersion, DefinitionError> {
    #[derive(Deserialize)]
    struct Probe {
        #[serde(alias = "spec_version")]
        version: Option<serde_json::Value>,
    }

    let probe: Probe =
        serde_json::from_str(raw).map_err(|e| DefinitionError::JsonParseError(e.to_string()))?;
    let version = probe
        .version
        .ok_or_else(|| DefinitionError::MissingField("version".to_string()))?;
    SpecVersion::from_json(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!(SpecVersion::parse("11").unwrap(), SpecVersion::new(11, 0, 0));
        assert_eq!(SpecVersion::parse("11.12").unwrap(), SpecVersion::new(11, 12, 0));
        assert_eq!(SpecVersion::parse("13.0.4").unwrap(), SpecVersion::new(13, 0, 4));
        assert!(SpecVersion::parse("eleven").is_err());
        assert!(SpecVersion::parse("1.2.3.4").is_err());
        assert!(SpecVersion::parse("").is_err());
    }

    #[test]
    fn test_gate_range_is_inclusive() {
        let gate = VersionGate::default();
        assert!(!gate.is_supported(&SpecVersion::new(10, 9, 0)));
        assert!(gate.is_supported(&SpecVersion::new(11, 0, 0)));
        assert!(gate.is_supported(&SpecVersion::new(13, 99, 0)));
        assert!(!gate.is_supported(&SpecVersion::new(20, 0, 0)));
    }

    #[test]
    fn test_probe_ignores_the_rest_of_the_document() {
        let raw = r#"{"version": 20.0, "action_sets": "not a list", "entry": 7}"#;
        assert_eq!(probe_version(raw).unwrap(), SpecVersion::new(20, 0, 0));
        assert_eq!(
            probe_version(r#"{"entry": "a"}"#),
            Err(DefinitionError::MissingField("version".to_string()))
        );
    }
}
