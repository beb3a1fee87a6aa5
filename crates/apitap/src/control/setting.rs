// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Setting keys and typed values.
//!
//! A key is a setting name, optionally scoped to one contract operation:
//!
//! - `mock_mode` - global
//! - `mock_mode@GET /pets/{petId}` - only for that operation

use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for injected delays.
pub const MAX_DELAY_MS: u64 = 60_000;

/// Known settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingName {
    /// Synthesize responses instead of contacting the upstream.
    MockMode,
    /// Contract validation mode.
    Validation,
    /// Delay injected before dispatch, in milliseconds.
    DelayMs,
    /// Indent generated JSON bodies.
    MockPretty,
}

impl SettingName {
    pub const ALL: [SettingName; 4] = [
        SettingName::MockMode,
        SettingName::Validation,
        SettingName::DelayMs,
        SettingName::MockPretty,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MockMode => "mock_mode",
            Self::Validation => "validation",
            Self::DelayMs => "delay_ms",
            Self::MockPretty => "mock_pretty",
        }
    }

    /// Value used when the key was never set.
    pub fn default_value(self) -> SettingValue {
        match self {
            Self::MockMode | Self::MockPretty => SettingValue::Bool(false),
            Self::Validation => SettingValue::Validation(ValidationMode::Report),
            Self::DelayMs => SettingValue::DelayMs(0),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            Self::MockMode | Self::MockPretty => "a boolean",
            Self::Validation => "one of \"off\", \"report\", \"enforce\"",
            Self::DelayMs => "a non-negative integer (milliseconds)",
        }
    }

    /// Parse a JSON value into the type this setting holds.
    pub fn parse_value(self, value: &serde_json::Value) -> Result<SettingValue, ControlError> {
        let mismatch = || ControlError::TypeMismatch {
            key: self.as_str().to_string(),
            expected: self.expected(),
        };
        let parsed = match self {
            Self::MockMode | Self::MockPretty => {
                SettingValue::Bool(value.as_bool().ok_or_else(mismatch)?)
            }
            Self::Validation => {
                let raw = value.as_str().ok_or_else(mismatch)?;
                SettingValue::Validation(raw.parse().map_err(|_| mismatch())?)
            }
            Self::DelayMs => SettingValue::DelayMs(value.as_u64().ok_or_else(mismatch)?),
        };
        self.check(&parsed)?;
        Ok(parsed)
    }

    /// Check that `value` has the right type and range for this setting.
    pub fn check(self, value: &SettingValue) -> Result<(), ControlError> {
        let type_ok = matches!(
            (self, value),
            (Self::MockMode | Self::MockPretty, SettingValue::Bool(_))
                | (Self::Validation, SettingValue::Validation(_))
                | (Self::DelayMs, SettingValue::DelayMs(_))
        );
        if !type_ok {
            return Err(ControlError::TypeMismatch {
                key: self.as_str().to_string(),
                expected: self.expected(),
            });
        }
        if let SettingValue::DelayMs(ms) = value {
            if *ms > MAX_DELAY_MS {
                return Err(ControlError::OutOfRange {
                    key: self.as_str().to_string(),
                    reason: format!("{} ms exceeds the {} ms maximum", ms, MAX_DELAY_MS),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingName {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| ControlError::UnknownKey(s.to_string()))
    }
}

/// Validation mode for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// No validation.
    Off,
    /// Validate and record violations; never block traffic.
    #[default]
    Report,
    /// Validate; reject non-conformant requests before dispatch.
    Enforce,
}

impl ValidationMode {
    pub fn is_enabled(self) -> bool {
        self != Self::Off
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Report => "report",
            Self::Enforce => "enforce",
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "report" => Ok(Self::Report),
            "enforce" => Ok(Self::Enforce),
            other => Err(format!("unknown validation mode '{}'", other)),
        }
    }
}

/// A typed setting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Validation(ValidationMode),
    DelayMs(u64),
}

impl SettingValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_validation(self) -> Option<ValidationMode> {
        match self {
            Self::Validation(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn as_delay(self) -> Option<Duration> {
        match self {
            Self::DelayMs(ms) => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(b),
            Self::Validation(mode) => serde_json::Value::String(mode.as_str().to_string()),
            Self::DelayMs(ms) => serde_json::Value::from(ms),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Validation(mode) => f.write_str(mode.as_str()),
            Self::DelayMs(ms) => write!(f, "{}ms", ms),
        }
    }
}

/// Where a setting applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    /// A contract operation id, e.g. `GET /pets/{petId}`.
    Operation(String),
}

/// A setting name plus its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SettingKey {
    pub name: SettingName,
    pub scope: Scope,
}

impl SettingKey {
    pub fn global(name: SettingName) -> Self {
        Self {
            name,
            scope: Scope::Global,
        }
    }

    pub fn scoped(name: SettingName, operation: impl Into<String>) -> Self {
        Self {
            name,
            scope: Scope::Operation(operation.into()),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Global => f.write_str(self.name.as_str()),
            Scope::Operation(op) => write!(f, "{}@{}", self.name, op),
        }
    }
}

impl FromStr for SettingKey {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('@') {
            None => Ok(Self::global(s.parse()?)),
            Some((name, operation)) => {
                let operation = normalize_operation(operation)
                    .ok_or_else(|| ControlError::UnknownKey(s.to_string()))?;
                Ok(Self::scoped(name.trim().parse()?, operation))
            }
        }
    }
}

impl Serialize for SettingKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SettingKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalize `get  /pets/{id}` to `GET /pets/{id}`.
fn normalize_operation(raw: &str) -> Option<String> {
    let mut parts = raw.split_whitespace();
    let method = parts.next()?;
    let path = parts.next()?;
    if parts.next().is_some() || !path.starts_with('/') {
        return None;
    }
    Some(format!("{} {}", method.to_ascii_uppercase(), path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_roundtrip_display_and_parse() {
        let key: SettingKey = "mock_mode@get /pets/{petId}".parse().unwrap();
        assert_eq!(key, SettingKey::scoped(SettingName::MockMode, "GET /pets/{petId}"));
        assert_eq!(key.to_string(), "mock_mode@GET /pets/{petId}");

        let global: SettingKey = "validation".parse().unwrap();
        assert_eq!(global.scope, Scope::Global);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            "colour".parse::<SettingKey>(),
            Err(ControlError::UnknownKey(_))
        ));
        assert!("mock_mode@pets".parse::<SettingKey>().is_err());
    }

    #[test]
    fn values_are_typed_per_name() {
        assert_eq!(
            SettingName::MockMode.parse_value(&json!(true)).unwrap(),
            SettingValue::Bool(true)
        );
        assert_eq!(
            SettingName::Validation.parse_value(&json!("enforce")).unwrap(),
            SettingValue::Validation(ValidationMode::Enforce)
        );
        assert_eq!(
            SettingName::DelayMs.parse_value(&json!(250)).unwrap(),
            SettingValue::DelayMs(250)
        );
        assert!(SettingName::MockMode.parse_value(&json!("yes")).is_err());
        assert!(SettingName::DelayMs.parse_value(&json!(-1)).is_err());
        assert!(matches!(
            SettingName::DelayMs.parse_value(&json!(MAX_DELAY_MS + 1)),
            Err(ControlError::OutOfRange { .. })
        ));
    }

    #[test]
    fn value_json_shape() {
        assert_eq!(SettingValue::Bool(true).to_json(), json!(true));
        assert_eq!(
            serde_json::to_value(SettingValue::Validation(ValidationMode::Off)).unwrap(),
            json!("off")
        );
        assert_eq!(SettingValue::DelayMs(5).to_json(), json!(5));
    }
}
