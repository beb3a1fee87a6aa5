// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control commands.
//!
//! JSON-encoded, tagged by `type`:
//!
//! ```json
//! {"type": "get_setting", "key": "mock_mode@GET /pets"}
//! {"type": "set_setting", "key": "validation", "value": "enforce"}
//! {"type": "list_settings"}
//! {"type": "subscribe_transactions"}
//! ```
//!
//! Unknown tags are reported as [`ReplyCode::UnrecognizedCommand`], never
//! silently ignored.

use super::{ControlStore, SettingKey, SettingName, SettingValue};
use crate::bus::Channel;
use crate::error::{CommandError, ControlError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Every command the control channel accepts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    GetSetting { key: String },
    SetSetting { key: String, value: serde_json::Value },
    ListSettings,
    SubscribeTransactions,
    UnsubscribeTransactions,
    Ping {
        #[serde(default)]
        id: Option<u64>,
    },
}

impl ControlCommand {
    /// Wire tags, one per variant; see [`ControlCommand::tag`].
    pub const TAGS: [&'static str; 6] = [
        "get_setting",
        "set_setting",
        "list_settings",
        "subscribe_transactions",
        "unsubscribe_transactions",
        "ping",
    ];

    /// The `type` tag this command is sent with.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::GetSetting { .. } => "get_setting",
            Self::SetSetting { .. } => "set_setting",
            Self::ListSettings => "list_settings",
            Self::SubscribeTransactions => "subscribe_transactions",
            Self::UnsubscribeTransactions => "unsubscribe_transactions",
            Self::Ping { .. } => "ping",
        }
    }

    /// Parse a JSON command, separating unknown commands from malformed ones.
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| CommandError::Malformed(format!("invalid JSON: {}", e)))?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| CommandError::Malformed("missing \"type\" field".into()))?;
        if !Self::TAGS.contains(&tag) {
            return Err(CommandError::Unrecognized(tag.to_string()));
        }
        serde_json::from_value(value).map_err(|e| CommandError::Malformed(e.to_string()))
    }
}

/// One row of a settings listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingEntry {
    pub key: SettingKey,
    pub value: SettingValue,
    pub version: u64,
}

/// Reply error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyCode {
    UnrecognizedCommand,
    MalformedCommand,
    InvalidKey,
    InvalidValue,
    /// The command needs a streaming connection (e.g. subscribe over REST).
    NotSupported,
}

/// Replies to control commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    Setting {
        key: SettingKey,
        value: SettingValue,
        /// False when the key was never set and `value` is the default.
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    SettingUpdated {
        key: SettingKey,
        value: SettingValue,
        version: u64,
    },
    Settings {
        version: u64,
        settings: Vec<SettingEntry>,
    },
    Subscribed {
        channel: Channel,
    },
    Unsubscribed {
        channel: Channel,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
    },
    Error {
        code: ReplyCode,
        message: String,
    },
}

impl ControlReply {
    pub fn error(code: ReplyCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<CommandError> for ControlReply {
    fn from(err: CommandError) -> Self {
        let code = match err {
            CommandError::Unrecognized(_) => ReplyCode::UnrecognizedCommand,
            CommandError::Malformed(_) => ReplyCode::MalformedCommand,
        };
        Self::error(code, err.to_string())
    }
}

impl From<ControlError> for ControlReply {
    fn from(err: ControlError) -> Self {
        let code = match err {
            ControlError::UnknownKey(_) => ReplyCode::InvalidKey,
            ControlError::TypeMismatch { .. } | ControlError::OutOfRange { .. } => {
                ReplyCode::InvalidValue
            }
        };
        Self::error(code, err.to_string())
    }
}

/// Executes control commands against a [`ControlStore`].
///
/// Subscription commands only acknowledge here; wiring the actual stream is
/// the connection's job.
#[derive(Clone)]
pub struct ControlService {
    store: Arc<ControlStore>,
}

impl ControlService {
    pub fn new(store: Arc<ControlStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ControlStore> {
        &self.store
    }

    /// Parse and execute a JSON command.
    pub fn handle_text(&self, text: &str) -> ControlReply {
        match ControlCommand::parse(text) {
            Ok(command) => self.handle(command),
            Err(err) => {
                warn!("Rejected control command: {}", err);
                err.into()
            }
        }
    }

    pub fn handle(&self, command: ControlCommand) -> ControlReply {
        debug!("Control command {}: {:?}", command.tag(), command);
        match command {
            ControlCommand::GetSetting { key } => self.get_setting(&key),
            ControlCommand::SetSetting { key, value } => match self.store.set_json(&key, &value) {
                Ok((key, value, version)) => ControlReply::SettingUpdated {
                    key,
                    value,
                    version,
                },
                Err(err) => err.into(),
            },
            ControlCommand::ListSettings => self.list_settings(),
            ControlCommand::SubscribeTransactions => ControlReply::Subscribed {
                channel: Channel::Transactions,
            },
            ControlCommand::UnsubscribeTransactions => ControlReply::Unsubscribed {
                channel: Channel::Transactions,
            },
            ControlCommand::Ping { id } => ControlReply::Pong { id },
        }
    }

    fn get_setting(&self, raw_key: &str) -> ControlReply {
        let key: SettingKey = match raw_key.parse() {
            Ok(key) => key,
            Err(err) => return err.into(),
        };
        match self.store.snapshot().get(&key) {
            Some(entry) => ControlReply::Setting {
                key,
                value: entry.value,
                found: true,
                version: Some(entry.version),
            },
            None => {
                let value = key.name.default_value();
                ControlReply::Setting {
                    key,
                    value,
                    found: false,
                    version: None,
                }
            }
        }
    }

    fn list_settings(&self) -> ControlReply {
        let snapshot = self.store.snapshot();
        let mut settings: Vec<SettingEntry> = snapshot
            .entries()
            .into_iter()
            .map(|(key, entry)| SettingEntry {
                key,
                value: entry.value,
                version: entry.version,
            })
            .collect();

        // Globals that were never set are listed with their defaults.
        for name in SettingName::ALL {
            let key = SettingKey::global(name);
            if snapshot.get(&key).is_none() {
                settings.push(SettingEntry {
                    key,
                    value: name.default_value(),
                    version: 0,
                });
            }
        }
        settings.sort_by(|a, b| a.key.cmp(&b.key));

        ControlReply::Settings {
            version: snapshot.version(),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::control::ValidationMode;

    fn service() -> ControlService {
        ControlService::new(Arc::new(ControlStore::new(EventBus::new())))
    }

    #[test]
    fn parse_known_commands() {
        let cmd = ControlCommand::parse(
            r#"{"type": "set_setting", "key": "mock_mode", "value": true}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ControlCommand::SetSetting {
                key: "mock_mode".into(),
                value: serde_json::json!(true)
            }
        );
        assert_eq!(
            ControlCommand::parse(r#"{"type": "list_settings"}"#).unwrap(),
            ControlCommand::ListSettings
        );
    }

    #[test]
    fn every_tag_parses_to_its_variant() {
        let commands = [
            ControlCommand::GetSetting { key: "delay_ms".into() },
            ControlCommand::SetSetting {
                key: "delay_ms".into(),
                value: serde_json::json!(5),
            },
            ControlCommand::ListSettings,
            ControlCommand::SubscribeTransactions,
            ControlCommand::UnsubscribeTransactions,
            ControlCommand::Ping { id: Some(1) },
        ];
        assert_eq!(commands.len(), ControlCommand::TAGS.len());

        for command in commands {
            let tag = command.tag();
            assert!(ControlCommand::TAGS.contains(&tag), "missing tag {}", tag);
            let text = serde_json::json!({
                "type": tag,
                "key": "delay_ms",
                "value": 5,
                "id": 1,
            });
            let parsed = ControlCommand::parse(&text.to_string()).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn unknown_type_is_unrecognized_not_malformed() {
        assert_eq!(
            ControlCommand::parse(r#"{"type": "reboot"}"#),
            Err(CommandError::Unrecognized("reboot".into()))
        );
        assert!(matches!(
            ControlCommand::parse(r#"{"type": "get_setting"}"#),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            ControlCommand::parse("not json"),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn set_then_get_roundtrip() {
        let service = service();
        let reply = service.handle_text(
            r#"{"type": "set_setting", "key": "validation@GET /pets", "value": "enforce"}"#,
        );
        assert!(matches!(reply, ControlReply::SettingUpdated { version: 1, .. }));

        match service.handle(ControlCommand::GetSetting {
            key: "validation@GET /pets".into(),
        }) {
            ControlReply::Setting {
                value,
                found,
                version,
                ..
            } => {
                assert_eq!(value, SettingValue::Validation(ValidationMode::Enforce));
                assert!(found);
                assert_eq!(version, Some(1));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn get_unset_key_reports_default() {
        let reply = service().handle(ControlCommand::GetSetting {
            key: "mock_mode".into(),
        });
        assert_eq!(
            reply,
            ControlReply::Setting {
                key: SettingKey::global(SettingName::MockMode),
                value: SettingValue::Bool(false),
                found: false,
                version: None,
            }
        );
    }

    #[test]
    fn invalid_key_and_value_map_to_codes() {
        let service = service();
        assert_eq!(
            service.handle_text(r#"{"type": "get_setting", "key": "nope"}"#),
            ControlReply::error(ReplyCode::InvalidKey, "Unknown setting key: nope")
        );
        let reply = service
            .handle_text(r#"{"type": "set_setting", "key": "delay_ms", "value": "soon"}"#);
        assert!(matches!(
            reply,
            ControlReply::Error {
                code: ReplyCode::InvalidValue,
                ..
            }
        ));
        let reply = service.handle_text(r#"{"type": "shutdown"}"#);
        assert!(matches!(
            reply,
            ControlReply::Error {
                code: ReplyCode::UnrecognizedCommand,
                ..
            }
        ));
    }

    #[test]
    fn list_includes_defaults_for_unset_globals() {
        let service = service();
        service.handle_text(r#"{"type": "set_setting", "key": "mock_mode", "value": true}"#);
        match service.handle(ControlCommand::ListSettings) {
            ControlReply::Settings { version, settings } => {
                assert_eq!(version, 1);
                assert_eq!(settings.len(), SettingName::ALL.len());
                let mock = settings
                    .iter()
                    .find(|e| e.key == SettingKey::global(SettingName::MockMode))
                    .unwrap();
                assert_eq!(mock.value, SettingValue::Bool(true));
                assert_eq!(mock.version, 1);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn reply_serialization_is_tagged() {
        let json = serde_json::to_value(ControlReply::SettingUpdated {
            key: SettingKey::scoped(SettingName::DelayMs, "GET /pets"),
            value: SettingValue::DelayMs(100),
            version: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "setting_updated");
        assert_eq!(json["key"], "delay_ms@GET /pets");
        assert_eq!(json["value"], 100);
    }
}
