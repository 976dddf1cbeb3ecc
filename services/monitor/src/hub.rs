// Broadcast hub: filtered fan-out of opportunities and transactions to
// bounded subscriber mailboxes
use crate::ws::ServerMessage;
use chainpulse_common::{ArbitrageTransaction, MetricsCollector, MonitorError, Opportunity, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Opportunities,
    Transactions,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Opportunities => "opportunities",
            Channel::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "opportunities" => Ok(Channel::Opportunities),
            "transactions" => Ok(Channel::Transactions),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// Per-subscription filter. Absent fields match everything;
/// `min_swaps` only applies to the transactions channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_profit: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_swaps: Option<i32>,
}

impl SubscriptionFilter {
    fn matches_opportunity(&self, opportunity: &Opportunity) -> bool {
        if let Some(chain_id) = self.chain_id {
            if chain_id != opportunity.chain_id {
                return false;
            }
        }
        if let Some(min) = self.min_profit {
            if opportunity.profit_usd < min {
                return false;
            }
        }
        if let Some(max) = self.max_profit {
            if opportunity.profit_usd > max {
                return false;
            }
        }
        true
    }

    fn matches_transaction(&self, tx: &ArbitrageTransaction) -> bool {
        if let Some(chain_id) = self.chain_id {
            if chain_id != tx.chain_id {
                return false;
            }
        }
        // profit bounds against net profit; a transaction without profit
        // data fails any profit constraint
        if self.min_profit.is_some() || self.max_profit.is_some() {
            let Some(net) = tx.profit_net_usd else {
                return false;
            };
            if let Some(min) = self.min_profit {
                if net < min {
                    return false;
                }
            }
            if let Some(max) = self.max_profit {
                if net > max {
                    return false;
                }
            }
        }
        if let Some(min_swaps) = self.min_swaps {
            if tx.swap_count < min_swaps {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub channel: Channel,
    pub filter: SubscriptionFilter,
}

/// One connected consumer: a bounded mailbox with drop-oldest backpressure
/// and the subscription set used for routing.
pub struct Subscriber {
    pub id: Uuid,
    capacity: usize,
    mailbox: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Subscriber {
    fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity,
            mailbox: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Enqueue without blocking the publisher. A full mailbox discards its
    /// oldest message and bumps the drop counter.
    pub fn push(&self, message: ServerMessage) -> bool {
        let mut dropped_one = false;
        {
            let mut mailbox = self.mailbox.lock();
            if mailbox.len() >= self.capacity {
                mailbox.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                dropped_one = true;
            }
            mailbox.push_back(message);
        }
        self.notify.notify_one();
        dropped_one
    }

    /// Next message in arrival order; `None` once the subscriber has been
    /// unregistered and its mailbox drained.
    pub async fn recv(&self) -> Option<ServerMessage> {
        loop {
            if let Some(message) = self.mailbox.lock().pop_front() {
                return Some(message);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn subscribe(&self, channel: Channel, filter: SubscriptionFilter) {
        self.subscriptions.write().push(Subscription { channel, filter });
    }

    pub fn unsubscribe(&self, channel: Channel) {
        self.subscriptions.write().retain(|s| s.channel != channel);
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.mailbox.lock().is_empty()
    }

    fn matches_opportunity(&self, opportunity: &Opportunity) -> bool {
        self.subscriptions.read().iter().any(|s| {
            s.channel == Channel::Opportunities && s.filter.matches_opportunity(opportunity)
        })
    }

    fn matches_transaction(&self, tx: &ArbitrageTransaction) -> bool {
        self.subscriptions
            .read()
            .iter()
            .any(|s| s.channel == Channel::Transactions && s.filter.matches_transaction(tx))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Subscriber registry and fan-out entry point. Delivery is at-most-once per
/// subscriber per event: a subscriber with several matching subscriptions on
/// the same channel still receives a single copy.
pub struct BroadcastHub {
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    max_subscribers: usize,
    mailbox_capacity: usize,
    heartbeat_interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl BroadcastHub {
    pub fn new(
        max_subscribers: usize,
        mailbox_capacity: usize,
        heartbeat_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            subscribers: DashMap::new(),
            max_subscribers,
            mailbox_capacity,
            heartbeat_interval,
            metrics,
        }
    }

    pub fn register(&self) -> Result<Arc<Subscriber>> {
        if self.subscribers.len() >= self.max_subscribers {
            self.metrics.record_hub_rejected();
            return Err(MonitorError::Capacity(self.max_subscribers));
        }

        let subscriber = Arc::new(Subscriber::new(self.mailbox_capacity));
        self.subscribers.insert(subscriber.id, subscriber.clone());
        self.metrics.record_hub_subscribers(self.subscribers.len());
        info!(connection_id = %subscriber.id, "subscriber registered");
        Ok(subscriber)
    }

    pub fn unregister(&self, id: Uuid) {
        if let Some((_, subscriber)) = self.subscribers.remove(&id) {
            subscriber.close();
            debug!(
                connection_id = %id,
                dropped = subscriber.dropped_messages(),
                "subscriber unregistered"
            );
        }
        self.metrics.record_hub_subscribers(self.subscribers.len());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish_opportunity(&self, opportunity: &Opportunity) {
        let data = match serde_json::to_value(opportunity) {
            Ok(data) => data,
            Err(e) => {
                debug!(err = %e, "unserializable opportunity, not broadcast");
                return;
            }
        };
        let message = ServerMessage::Opportunity {
            timestamp: Utc::now(),
            data,
        };

        for entry in self.subscribers.iter() {
            if entry.value().matches_opportunity(opportunity) {
                if entry.value().push(message.clone()) {
                    self.metrics.record_hub_dropped(Channel::Opportunities.as_str());
                }
                self.metrics.record_hub_delivered(Channel::Opportunities.as_str());
            }
        }
    }

    pub fn publish_transaction(&self, tx: &ArbitrageTransaction) {
        let data = match serde_json::to_value(tx) {
            Ok(data) => data,
            Err(e) => {
                debug!(err = %e, "unserializable transaction, not broadcast");
                return;
            }
        };
        let message = ServerMessage::Transaction {
            timestamp: Utc::now(),
            data,
        };

        for entry in self.subscribers.iter() {
            if entry.value().matches_transaction(tx) {
                if entry.value().push(message.clone()) {
                    self.metrics.record_hub_dropped(Channel::Transactions.as_str());
                }
                self.metrics.record_hub_delivered(Channel::Transactions.as_str());
            }
        }
    }

    /// Periodic heartbeat to every connected subscriber, until shutdown.
    pub async fn run_heartbeat(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let message = ServerMessage::Heartbeat { timestamp: Utc::now() };
                    for entry in self.subscribers.iter() {
                        entry.value().push(message.clone());
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
