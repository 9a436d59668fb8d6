// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Bus
//!
//! [`EventBus`] publishes events to the topic exchange and subscribes to them by routing
//! key. Each key gets its own queue, named after the key, created on first use.
//!
//! At most one consumer per key is active in the process. The bus keeps a registry of the
//! consumer handle behind each key; subscribing to a key that already has a consumer
//! cancels the old one before the new one is registered, so the previous subscriber's
//! stream ends.
//!
//! Keys that collide with queues the bus does not own, such as the router's work queue,
//! can be reserved. Publishing or subscribing to a reserved key fails before anything is
//! declared.

use crate::{
    connection::Connection,
    consumer::{ConsumerHandle, EventReceiver},
    errors::AmqpError,
    event::Event,
    exchange::{Exchange, ExchangeType},
};
use opentelemetry::Context;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An open subscription to one routing key.
pub struct Subscription {
    pub key: String,
    /// Identifies this registration for [`EventBus::release`].
    pub registration: Uuid,
    pub events: EventReceiver,
}

pub struct EventBus {
    conn: Arc<Connection>,
    exchange: Exchange,
    reserved: HashSet<String>,
    consumers: Mutex<HashMap<String, ConsumerHandle>>,
}

impl EventBus {
    /// Declares the bus exchange and returns a bus routing through it.
    ///
    /// # Parameters
    /// * `conn` - The shared broker connection
    /// * `exchange` - Name of the topic exchange
    /// * `kind` - Whether unroutable events are kept in a buffer exchange
    ///
    /// # Returns
    /// The bus, shared, or the declaration error
    pub async fn new(
        conn: Arc<Connection>,
        exchange: &str,
        kind: ExchangeType,
    ) -> Result<Arc<EventBus>, AmqpError> {
        EventBus::with_reserved(conn, exchange, kind, &[]).await
    }

    /// Like [`EventBus::new`], but refuses to publish or subscribe to any of `reserved`.
    pub async fn with_reserved(
        conn: Arc<Connection>,
        exchange: &str,
        kind: ExchangeType,
        reserved: &[&str],
    ) -> Result<Arc<EventBus>, AmqpError> {
        let exchange = Exchange::new(conn.clone(), exchange, kind).await?;

        Ok(Arc::new(EventBus {
            conn,
            exchange,
            reserved: reserved.iter().map(|key| (*key).to_owned()).collect(),
            consumers: Mutex::new(HashMap::new()),
        }))
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    fn check_key(&self, key: &str) -> Result<(), AmqpError> {
        if self.reserved.contains(key) {
            warn!(key, "refusing a reserved routing key");
            return Err(AmqpError::ReservedKey(key.to_owned()));
        }

        Ok(())
    }

    /// Publishes `event`, routed by its key.
    ///
    /// The queue for the key is derived first so an event published before anyone
    /// subscribed waits in it. If the derivation fails nothing is sent.
    pub async fn publish(&self, ctx: &Context, event: &Event) -> Result<(), AmqpError> {
        self.check_key(&event.key)?;
        self.exchange.derive_queue(&event.key).await?;
        self.exchange.send(ctx, event).await
    }

    /// Subscribes to `key`, replacing any consumer already registered for it.
    ///
    /// The registry stays locked for the whole cancel, derive and consume sequence, so
    /// concurrent subscribes for the same key run one after the other.
    pub async fn subscribe(&self, key: &str) -> Result<Subscription, AmqpError> {
        self.check_key(key)?;
        let mut consumers = self.consumers.lock().await;

        if let Some(previous) = consumers.get(key) {
            debug!(key, "replacing the active consumer");
            previous.cancel().await?;
            consumers.remove(key);
        }

        let queue = self.exchange.derive_queue(key).await?;
        let (handle, events) = queue.consume().await?;
        let registration = handle.id();
        consumers.insert(key.to_owned(), handle);

        info!(key, registration = registration.to_string(), "subscribed");

        Ok(Subscription {
            key: key.to_owned(),
            registration,
            events,
        })
    }

    /// Cancels the consumer for `key` if `registration` is still the active one.
    ///
    /// # Returns
    /// `true` when the registration was active and has been cancelled
    pub async fn release(&self, key: &str, registration: Uuid) -> Result<bool, AmqpError> {
        let mut consumers = self.consumers.lock().await;

        match consumers.get(key) {
            Some(handle) if handle.id() == registration => handle.cancel().await?,
            _ => {
                debug!(key, "registration is no longer active");
                return Ok(false);
            }
        }

        consumers.remove(key);
        info!(key, registration = registration.to_string(), "released");

        Ok(true)
    }

    /// Keys with a consumer that can still receive deliveries, sorted.
    pub async fn active_consumers(&self) -> Vec<String> {
        let consumers = self.consumers.lock().await;

        let mut keys: Vec<String> = consumers
            .iter()
            .filter(|(_, handle)| handle.is_active())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();

        keys
    }

    /// Cancels every registered consumer.
    pub async fn shutdown(&self) {
        let mut consumers = self.consumers.lock().await;

        for (key, handle) in consumers.drain() {
            if let Err(err) = handle.cancel().await {
                error!(error = err.to_string(), key, "failure to cancel consumer");
            }
        }
    }
}
