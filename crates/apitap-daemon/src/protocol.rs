// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live feed messages.
//!
//! Clients send control commands (see [`apitap::ControlCommand`]); the
//! server answers with a [`ControlReply`] and pushes [`FeedMessage`]s:
//!
//! ```json
//! {"type": "welcome", "version": "0.1.0", "session_id": "3f2a9c1e", ...}
//! {"type": "transaction", "id": "...", "mode": "mocked", ...}
//! {"type": "setting_changed", "key": "mock_mode", "value": true, "version": 4}
//! {"type": "lagged", "channel": "transactions", "skipped": 12}
//! ```

use apitap::{Channel, ControlReply, MonitorPlaceholders, SettingChange, Transaction};
use serde::Serialize;
use std::sync::Arc;

/// Server-initiated messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// First message on every connection.
    Welcome {
        version: String,
        session_id: String,
        placeholders: MonitorPlaceholders,
        /// Control store version at connect time.
        control_version: u64,
    },

    /// A completed exchange, in completion order.
    Transaction(Arc<Transaction>),

    /// A control store mutation.
    SettingChanged(Arc<SettingChange>),

    /// Events dropped because this client fell behind.
    Lagged { channel: Channel, skipped: u64 },
}

impl FeedMessage {
    pub fn welcome(
        session_id: &str,
        placeholders: MonitorPlaceholders,
        control_version: u64,
    ) -> Self {
        Self::Welcome {
            version: apitap::VERSION.to_string(),
            session_id: session_id.to_string(),
            placeholders,
            control_version,
        }
    }
}

/// Anything written to the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Feed(FeedMessage),
    Reply(ControlReply),
}

impl From<FeedMessage> for Outbound {
    fn from(msg: FeedMessage) -> Self {
        Self::Feed(msg)
    }
}

impl From<ControlReply> for Outbound {
    fn from(reply: ControlReply) -> Self {
        Self::Reply(reply)
    }
}
