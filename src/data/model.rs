use crate::ast::Value;
use crate::error::ConfigError;
use ahash::AHashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;

/// How ambiguous numeric dates such as `03/04/2024` are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateStyle {
    #[default]
    DayFirst,
    MonthFirst,
    YearFirst,
}

/// Number and date conventions used when coercing typed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Locale {
    pub decimal_separator: char,
    pub grouping_separator: Option<char>,
    pub date_style: DateStyle,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            grouping_separator: Some(','),
            date_style: DateStyle::DayFirst,
        }
    }
}

/// The contact a run is collecting responses for. Read-only to the engine.
///
/// Attribute keys are case-normalized on construction so that `contact.District`
/// and `contact.district` resolve to the same value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactContext {
    pub uuid: Option<String>,
    pub language: Option<String>,
    pub groups: Vec<String>,
    attributes: AHashMap<String, Value>,
}

impl ContactContext {
    pub fn new(uuid: Option<String>) -> Self {
        Self {
            uuid,
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(normalize_key(key), value.into());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Looks up an attribute. `uuid`, `language` and `groups` are exposed as
    /// attributes too; groups render as a comma separated list.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let key = normalize_key(key);
        if let Some(value) = self.attributes.get(&key) {
            return Some(value.clone());
        }
        match key.as_str() {
            "uuid" => self.uuid.clone().map(Value::Text),
            "language" => self.language.clone().map(Value::Text),
            "groups" => Some(Value::Text(self.groups.iter().join(", "))),
            _ => None,
        }
    }

    /// Loads a contact from a JSON file with plain attribute values.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|message| ConfigError::Parse {
            path: path.to_string(),
            message,
        })
    }

    /// Parses `{"uuid": .., "language": .., "groups": [..], "fields": {"age": 15}}`.
    pub fn from_json(json: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct RawContact {
            uuid: Option<String>,
            language: Option<String>,
            #[serde(default)]
            groups: Vec<String>,
            #[serde(default)]
            fields: serde_json::Map<String, serde_json::Value>,
        }

        let raw: RawContact = serde_json::from_str(json).map_err(|e| e.to_string())?;
        let attributes = raw
            .fields
            .iter()
            .map(|(k, v)| (normalize_key(k), Value::from_json(v)))
            .collect();
        Ok(Self {
            uuid: raw.uuid,
            language: raw.language,
            groups: raw.groups,
            attributes,
        })
    }
}

/// Organization-level constants and conventions shared by every run of an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrgContext {
    pub uuid: String,
    pub name: String,
    pub locale: Locale,
    constants: AHashMap<String, Value>,
}

impl OrgContext {
    pub fn new(uuid: &str, name: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_constant(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.constants.insert(normalize_key(key), value.into());
        self
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        let key = normalize_key(key);
        match self.constants.get(&key) {
            Some(value) => Some(value.clone()),
            None if key == "name" => Some(Value::Text(self.name.clone())),
            None if key == "uuid" => Some(Value::Text(self.uuid.clone())),
            None => None,
        }
    }

    /// Loads an org from `{"uuid": .., "name": .., "locale": {..}, "constants": {..}}`.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct RawOrg {
            uuid: String,
            #[serde(default)]
            name: String,
            #[serde(default)]
            locale: Locale,
            #[serde(default)]
            constants: serde_json::Map<String, serde_json::Value>,
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        let raw: RawOrg = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            uuid: raw.uuid,
            name: raw.name,
            locale: raw.locale,
            constants: raw
                .constants
                .iter()
                .map(|(k, v)| (normalize_key(k), Value::from_json(v)))
                .collect(),
        })
    }
}

/// Normalizes a field or attribute key: trimmed, lowercase, inner whitespace as `_`.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .join("_")
}
