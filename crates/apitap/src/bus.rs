// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process event bus.
//!
//! Connects producers (the transaction pipeline, the control store) to any
//! number of consumers (live feed sessions, internal listeners) without any of
//! them blocking on the others.
//!
//! # Delivery
//!
//! Each [`Channel`] is a bounded ring of `capacity` events. [`EventBus::publish`]
//! never blocks and never waits for subscribers. A subscriber that falls more
//! than `capacity` events behind loses the *oldest* events it has not read yet
//! (drop-oldest); the loss is counted on its [`Subscription`] and logged.
//! A new subscription starts at the point of subscription, never replaying
//! history.

use crate::control::SettingChange;
use crate::transaction::Transaction;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

/// Default per-channel ring capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Bus channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Completed transactions, in completion order.
    Transactions,
    /// Control setting changes.
    Control,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Control => "control",
        }
    }
}

/// A message carried on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Transaction(Arc<Transaction>),
    SettingChanged(Arc<SettingChange>),
}

/// Cloneable handle to the bus. All clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    transactions: broadcast::Sender<BusEvent>,
    control: broadcast::Sender<BusEvent>,
    capacity: usize,
    published: AtomicU64,
}

impl EventBus {
    /// Create a bus with [`DEFAULT_CHANNEL_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus whose channels each buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (transactions, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                transactions,
                control,
                capacity,
                published: AtomicU64::new(0),
            }),
        }
    }

    fn sender(&self, channel: Channel) -> &broadcast::Sender<BusEvent> {
        match channel {
            Channel::Transactions => &self.inner.transactions,
            Channel::Control => &self.inner.control,
        }
    }

    /// Publish an event. Returns the number of subscribers it was queued for
    /// (zero when nobody listens, which is not an error).
    pub fn publish(&self, channel: Channel, event: BusEvent) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self.sender(channel).send(event).unwrap_or(0);
        trace!("Published on '{}' to {} subscriber(s)", channel.as_str(), delivered);
        delivered
    }

    /// Subscribe to a channel from now on.
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        Subscription {
            channel,
            inner: BroadcastStream::new(self.sender(channel).subscribe()),
            dropped: 0,
        }
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.sender(channel).receiver_count()
    }

    /// Total events published since creation, all channels.
    pub fn published_total(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazy, potentially infinite stream of events for one subscriber.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    channel: Channel,
    inner: BroadcastStream<BusEvent>,
    dropped: u64,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Events this subscriber missed because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Stream for Subscription {
    type Item = BusEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(n)))) => {
                    this.dropped += n;
                    warn!(
                        "Subscriber on '{}' lagged, dropped {} oldest event(s)",
                        this.channel.as_str(),
                        n
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{SettingKey, SettingName, SettingValue};
    use futures::StreamExt;
    use std::time::{Duration, Instant};

    fn change(version: u64) -> BusEvent {
        BusEvent::SettingChanged(Arc::new(SettingChange {
            key: SettingKey::global(SettingName::DelayMs),
            value: SettingValue::DelayMs(version),
            previous: None,
            version,
        }))
    }

    fn version_of(event: &BusEvent) -> u64 {
        match event {
            BusEvent::SettingChanged(c) => c.version,
            BusEvent::Transaction(_) => panic!("unexpected transaction"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Channel::Control, change(1)), 0);
        assert_eq!(bus.published_total(), 1);
    }

    #[tokio::test]
    async fn subscription_starts_at_point_of_subscription() {
        let bus = EventBus::new();
        bus.publish(Channel::Control, change(1));

        let mut sub = bus.subscribe(Channel::Control);
        bus.publish(Channel::Control, change(2));

        let event = sub.next().await.unwrap();
        assert_eq!(version_of(&event), 2);
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let bus = EventBus::new();
        let mut control = bus.subscribe(Channel::Control);
        let tx_sub = bus.subscribe(Channel::Transactions);

        assert_eq!(bus.publish(Channel::Control, change(7)), 1);
        assert_eq!(version_of(&control.next().await.unwrap()), 7);
        assert_eq!(bus.subscriber_count(Channel::Transactions), 1);
        drop(tx_sub);
        assert_eq!(bus.subscriber_count(Channel::Transactions), 0);
    }

    #[tokio::test]
    async fn stalled_subscriber_never_blocks_publish() {
        let bus = EventBus::with_capacity(8);
        let _stalled = bus.subscribe(Channel::Control);
        let mut reader = bus.subscribe(Channel::Control);

        let start = Instant::now();
        for version in 0..10_000 {
            bus.publish(Channel::Control, change(version));
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        // Drop-oldest: the reader sees the newest `capacity` events.
        let first = reader.next().await.unwrap();
        assert_eq!(version_of(&first), 10_000 - 8);
        assert_eq!(reader.dropped(), 10_000 - 8);
    }
}
