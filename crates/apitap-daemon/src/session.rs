// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live feed session management.
//!
//! Each connected WebSocket client gets a session that:
//! - executes control commands and replies on the same socket
//! - always receives control changes
//! - receives transactions between `subscribe_transactions` and
//!   `unsubscribe_transactions`
//!
//! Bus subscriptions drop the oldest events when the client falls behind;
//! the client is told how many it missed with a `lagged` message.

use crate::protocol::{FeedMessage, Outbound};
use apitap::{
    BusEvent, Channel, ControlCommand, ControlReply, ControlService, EventBus,
    MonitorPlaceholders, Subscription,
};
use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbound queue depth per client.
const OUTBOUND_CAPACITY: usize = 256;

/// A live feed client session
pub struct FeedSession {
    control: ControlService,
    bus: EventBus,
    placeholders: MonitorPlaceholders,
    /// Active feeds: channel -> forwarding task
    feeds: DashMap<Channel, JoinHandle<()>>,
    /// Session ID for logging
    session_id: String,
}

impl FeedSession {
    pub fn new(control: ControlService, bus: EventBus, placeholders: MonitorPlaceholders) -> Self {
        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        info!("[{}] New feed session", session_id);

        Self {
            control,
            bus,
            placeholders,
            feeds: DashMap::new(),
            session_id,
        }
    }

    /// Run the session until the client disconnects.
    pub async fn run(self, socket: WebSocket) -> Result<(), axum::Error> {
        let (mut ws_tx, mut ws_rx) = socket.split();

        // Subscribe before the welcome so no change after it is missed.
        let control_feed = self.bus.subscribe(Channel::Control);

        let welcome = FeedMessage::welcome(
            &self.session_id,
            self.placeholders.clone(),
            self.control.store().version(),
        );
        match serde_json::to_string(&Outbound::from(welcome)) {
            Ok(json) => ws_tx.send(Message::Text(json)).await?,
            Err(e) => error!("[{}] Failed to serialize welcome: {}", self.session_id, e),
        }

        let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

        let session_id = self.session_id.clone();
        let ws_forward = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            debug!("[{}] WebSocket send failed, closing", session_id);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("[{}] Failed to serialize message: {}", session_id, e);
                    }
                }
            }
        });

        self.start_feed(control_feed, tx.clone());

        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if self.handle_message(&text, &tx).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("[{}] Client closed connection", self.session_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Axum answers pings
                }
                Ok(Message::Pong(_)) => {
                    debug!("[{}] Pong received", self.session_id);
                }
                Ok(Message::Binary(_)) => {
                    warn!("[{}] Binary messages not supported", self.session_id);
                }
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", self.session_id, e);
                    break;
                }
            }
        }

        // Cleanup
        for entry in self.feeds.iter() {
            entry.value().abort();
        }
        self.feeds.clear();
        ws_forward.abort();
        info!("[{}] Session ended", self.session_id);

        Ok(())
    }

    /// Handle one client command. Errors only when the outbound queue closed.
    async fn handle_message(
        &self,
        text: &str,
        tx: &mpsc::Sender<Outbound>,
    ) -> Result<(), mpsc::error::SendError<Outbound>> {
        let command = match ControlCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!("[{}] Rejected command: {}", self.session_id, e);
                return tx.send(ControlReply::from(e).into()).await;
            }
        };
        debug!("[{}] Received: {:?}", self.session_id, command);

        match command {
            ControlCommand::SubscribeTransactions => {
                // Subscribe first: the feed starts no later than the reply.
                let subscription = (!self.feeds.contains_key(&Channel::Transactions))
                    .then(|| self.bus.subscribe(Channel::Transactions));
                tx.send(self.control.handle(command).into()).await?;
                if let Some(subscription) = subscription {
                    self.start_feed(subscription, tx.clone());
                    info!("[{}] Subscribed to transactions", self.session_id);
                }
            }
            ControlCommand::UnsubscribeTransactions => {
                if let Some((_, task)) = self.feeds.remove(&Channel::Transactions) {
                    task.abort();
                    info!("[{}] Unsubscribed from transactions", self.session_id);
                }
                tx.send(self.control.handle(command).into()).await?;
            }
            command => {
                tx.send(self.control.handle(command).into()).await?;
            }
        }
        Ok(())
    }

    /// Forward a bus subscription to the client.
    fn start_feed(&self, subscription: Subscription, tx: mpsc::Sender<Outbound>) {
        let channel = subscription.channel();
        let task = tokio::spawn(forward_feed(subscription, tx, self.session_id.clone()));
        if let Some(previous) = self.feeds.insert(channel, task) {
            previous.abort();
        }
    }
}

async fn forward_feed(
    mut subscription: Subscription,
    tx: mpsc::Sender<Outbound>,
    session_id: String,
) {
    let channel = subscription.channel();
    let mut reported = 0;

    while let Some(event) = subscription.next().await {
        let dropped = subscription.dropped();
        if dropped > reported {
            let notice = FeedMessage::Lagged {
                channel,
                skipped: dropped - reported,
            };
            reported = dropped;
            if tx.send(notice.into()).await.is_err() {
                break;
            }
        }

        let msg = match event {
            BusEvent::Transaction(transaction) => FeedMessage::Transaction(transaction),
            BusEvent::SettingChanged(change) => FeedMessage::SettingChanged(change),
        };
        if tx.send(msg.into()).await.is_err() {
            debug!(
                "[{}] Client disconnected, stopping '{}' feed",
                session_id,
                channel.as_str()
            );
            break;
        }
    }
}
