// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control store - live, versioned proxy settings.
//!
//! # Concurrency
//!
//! - **Snapshots**: the whole settings map is an immutable [`ControlSnapshot`]
//!   behind an `ArcSwap`. Readers take an `Arc` (atomic load, no lock) and
//!   keep a consistent view for as long as they hold it.
//! - **Writes**: [`ControlStore::set`] builds a new map and installs it with a
//!   compare-and-swap loop. Writers never block each other; on the same key
//!   the last installed write wins, and every installed write bumps the
//!   version by exactly one.
//! - **Notifications**: a [`SettingChange`] is published on
//!   [`Channel::Control`] after the new map is installed.

mod command;
mod setting;

pub use command::{ControlCommand, ControlReply, ControlService, ReplyCode, SettingEntry};
pub use setting::{Scope, SettingKey, SettingName, SettingValue, ValidationMode, MAX_DELAY_MS};

use crate::bus::{BusEvent, Channel, EventBus};
use crate::error::ControlError;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A setting value together with the store version that installed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionedValue {
    pub value: SettingValue,
    pub version: u64,
}

/// A published setting mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingChange {
    pub key: SettingKey,
    pub value: SettingValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<SettingValue>,
    pub version: u64,
}

// ============================================================================
// Snapshot
// ============================================================================

/// An immutable view of every setting at one store version.
#[derive(Debug, Clone, Default)]
pub struct ControlSnapshot {
    version: u64,
    settings: HashMap<SettingKey, VersionedValue>,
}

impl ControlSnapshot {
    /// Store version this snapshot was taken at (0 = nothing set yet).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Exact lookup, no scope fallback.
    pub fn get(&self, key: &SettingKey) -> Option<VersionedValue> {
        self.settings.get(key).copied()
    }

    /// Effective value for `name` on `operation`: the scoped value if set,
    /// else the global one, else the setting's default.
    pub fn resolve(&self, name: SettingName, operation: Option<&str>) -> SettingValue {
        if let Some(op) = operation {
            if let Some(v) = self.settings.get(&SettingKey::scoped(name, op)) {
                return v.value;
            }
        }
        self.settings
            .get(&SettingKey::global(name))
            .map(|v| v.value)
            .unwrap_or_else(|| name.default_value())
    }

    pub fn mock_mode(&self, operation: Option<&str>) -> bool {
        self.resolve(SettingName::MockMode, operation)
            .as_bool()
            .unwrap_or(false)
    }

    pub fn validation(&self, operation: Option<&str>) -> ValidationMode {
        self.resolve(SettingName::Validation, operation)
            .as_validation()
            .unwrap_or_default()
    }

    pub fn delay(&self, operation: Option<&str>) -> Duration {
        self.resolve(SettingName::DelayMs, operation)
            .as_delay()
            .unwrap_or_default()
    }

    pub fn mock_pretty(&self, operation: Option<&str>) -> bool {
        self.resolve(SettingName::MockPretty, operation)
            .as_bool()
            .unwrap_or(false)
    }

    /// Every explicitly set entry, sorted by key.
    pub fn entries(&self) -> Vec<(SettingKey, VersionedValue)> {
        let mut out: Vec<_> = self
            .settings
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

// ============================================================================
// Store
// ============================================================================

/// Versioned settings store shared by the pipeline and the control surfaces.
pub struct ControlStore {
    state: ArcSwap<ControlSnapshot>,
    bus: EventBus,
}

impl ControlStore {
    /// Create an empty store publishing its changes on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self {
            state: ArcSwap::from_pointee(ControlSnapshot::default()),
            bus,
        }
    }

    /// Current snapshot. Cheap; hold it for the duration of one decision.
    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.state.load_full()
    }

    /// Current value for an exact key, if it was ever set.
    pub fn get(&self, key: &SettingKey) -> Option<SettingValue> {
        self.state.load().get(key).map(|v| v.value)
    }

    /// Set a value, returning the new store version.
    pub fn set(&self, key: SettingKey, value: SettingValue) -> Result<u64, ControlError> {
        key.name.check(&value)?;

        let previous = self.state.rcu(|current| {
            let mut next = ControlSnapshot::clone(current);
            next.version = current.version + 1;
            next.settings.insert(
                key.clone(),
                VersionedValue {
                    value,
                    version: next.version,
                },
            );
            next
        });
        let version = previous.version + 1;
        let old = previous.get(&key).map(|v| v.value);

        debug!("Setting {} = {} (v{})", key, value, version);
        self.bus.publish(
            Channel::Control,
            BusEvent::SettingChanged(Arc::new(SettingChange {
                key,
                value,
                previous: old,
                version,
            })),
        );
        Ok(version)
    }

    /// Parse `key` and a JSON value, then [`set`](Self::set).
    pub fn set_json(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(SettingKey, SettingValue, u64), ControlError> {
        let key: SettingKey = key.parse()?;
        let value = key.name.parse_value(value)?;
        let version = self.set(key.clone(), value)?;
        Ok((key, value, version))
    }

    /// Install initial settings (from configuration). Each one is a normal
    /// versioned write.
    pub fn seed<I>(&self, settings: I) -> Result<u64, ControlError>
    where
        I: IntoIterator<Item = (SettingKey, SettingValue)>,
    {
        let mut version = self.state.load().version;
        for (key, value) in settings {
            version = self.set(key, value)?;
        }
        info!("Control store seeded at v{}", version);
        Ok(version)
    }

    pub fn version(&self) -> u64 {
        self.state.load().version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::thread;

    fn store() -> ControlStore {
        ControlStore::new(EventBus::new())
    }

    #[test]
    fn unknown_keys_read_as_disabled_defaults() {
        let store = store();
        let snap = store.snapshot();
        assert!(!snap.mock_mode(Some("GET /pets")));
        assert_eq!(snap.validation(None), ValidationMode::Report);
        assert_eq!(snap.delay(None), Duration::ZERO);
        assert!(store.get(&SettingKey::global(SettingName::MockMode)).is_none());
    }

    #[test]
    fn scoped_value_overrides_global() {
        let store = store();
        store
            .set(SettingKey::global(SettingName::MockMode), SettingValue::Bool(true))
            .unwrap();
        store
            .set(
                SettingKey::scoped(SettingName::MockMode, "GET /pets"),
                SettingValue::Bool(false),
            )
            .unwrap();

        let snap = store.snapshot();
        assert!(!snap.mock_mode(Some("GET /pets")));
        assert!(snap.mock_mode(Some("POST /pets")));
        assert!(snap.mock_mode(None));
    }

    #[test]
    fn versions_increase_by_one_per_write() {
        let store = store();
        let v1 = store
            .set(SettingKey::global(SettingName::DelayMs), SettingValue::DelayMs(10))
            .unwrap();
        let v2 = store
            .set(SettingKey::global(SettingName::DelayMs), SettingValue::DelayMs(20))
            .unwrap();
        assert_eq!((v1, v2), (1, 2));
        let entry = store
            .snapshot()
            .get(&SettingKey::global(SettingName::DelayMs))
            .unwrap();
        assert_eq!(entry.version, 2);
        assert_eq!(entry.value, SettingValue::DelayMs(20));
    }

    #[test]
    fn wrong_type_leaves_state_untouched() {
        let store = store();
        let err = store
            .set(
                SettingKey::global(SettingName::MockMode),
                SettingValue::DelayMs(3),
            )
            .unwrap_err();
        assert!(matches!(err, ControlError::TypeMismatch { .. }));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let store = store();
        let before = store.snapshot();
        store
            .set(SettingKey::global(SettingName::MockMode), SettingValue::Bool(true))
            .unwrap();
        assert!(!before.mock_mode(None));
        assert!(store.snapshot().mock_mode(None));
    }

    #[test]
    fn concurrent_writes_each_get_a_distinct_version() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..100)
                        .map(|i| {
                            let key = if t % 2 == 0 {
                                SettingKey::global(SettingName::DelayMs)
                            } else {
                                SettingKey::scoped(SettingName::DelayMs, format!("GET /t{}", t))
                            };
                            store.set(key, SettingValue::DelayMs(i)).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut versions: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), 800);
        assert_eq!(store.version(), 800);
    }

    #[tokio::test]
    async fn set_publishes_change_event() {
        let bus = EventBus::new();
        let store = ControlStore::new(bus.clone());
        let mut sub = bus.subscribe(Channel::Control);

        store
            .set(SettingKey::global(SettingName::MockMode), SettingValue::Bool(true))
            .unwrap();
        store
            .set(SettingKey::global(SettingName::MockMode), SettingValue::Bool(false))
            .unwrap();

        let _ = sub.next().await.unwrap();
        match sub.next().await.unwrap() {
            BusEvent::SettingChanged(change) => {
                assert_eq!(change.version, 2);
                assert_eq!(change.value, SettingValue::Bool(false));
                assert_eq!(change.previous, Some(SettingValue::Bool(true)));
            }
            BusEvent::Transaction(_) => panic!("expected a setting change"),
        }
    }

    #[test]
    fn set_json_parses_key_and_value() {
        let store = store();
        let (key, value, version) = store
            .set_json("validation@post /pets", &serde_json::json!("enforce"))
            .unwrap();
        assert_eq!(key.to_string(), "validation@POST /pets");
        assert_eq!(value, SettingValue::Validation(ValidationMode::Enforce));
        assert_eq!(version, 1);
        assert_eq!(
            store.snapshot().validation(Some("POST /pets")),
            ValidationMode::Enforce
        );
    }
}
