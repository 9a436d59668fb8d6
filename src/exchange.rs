// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Exchange
//!
//! This module declares the topic exchange events are routed through and derives the
//! per-key queues bound to it. Every queue derived here is named after its routing key
//! and bound with that same key.

use crate::{
    connection::Connection,
    errors::AmqpError,
    event::Event,
    queue::{Queue, QueueDefinition},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    ExchangeKind,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// Argument naming the exchange that receives messages no queue is bound for
pub const AMQP_ARGS_ALTERNATE_EXCHANGE: &str = "alternate-exchange";
/// Suffix of the buffer exchange used by [`ExchangeType::Alternate`]
pub const BUFFER_EXCHANGE_SUFFIX: &str = "-buffer";

/// Selects how the exchange handles unroutable messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeType {
    /// Unroutable messages are dropped by the broker.
    #[default]
    Default,
    /// Unroutable messages go to `<name>-buffer`. That exchange must be provisioned
    /// separately; it is not declared here.
    Alternate,
}

/// Declaration parameters of an exchange.
///
/// Events are always routed by topic, so the kind is fixed; what varies is durability
/// and the declaration arguments.
#[derive(Debug, Clone)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) internal: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeDefinition {
    /// A durable, not auto-deleted, not internal topic exchange.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            delete: false,
            durable: true,
            internal: false,
            params: BTreeMap::default(),
        }
    }

    /// Routes unroutable messages to `<name>-buffer`.
    pub fn alternate(mut self) -> Self {
        self.params.insert(
            ShortString::from(AMQP_ARGS_ALTERNATE_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.buffer_name())),
        );
        self
    }

    pub fn buffer_name(&self) -> String {
        format!("{}{}", self.name, BUFFER_EXCHANGE_SUFFIX)
    }
}

/// A declared topic exchange.
#[derive(Clone)]
pub struct Exchange {
    conn: Arc<Connection>,
    name: String,
}

impl Exchange {
    /// Declares the exchange `name` and returns a handle to it.
    ///
    /// # Parameters
    /// * `conn` - The shared broker connection
    /// * `name` - Exchange name
    /// * `kind` - Whether unroutable messages are kept in a buffer exchange
    pub async fn new(conn: Arc<Connection>, name: &str, kind: ExchangeType) -> Result<Exchange, AmqpError> {
        let mut def = ExchangeDefinition::new(name);
        if kind == ExchangeType::Alternate {
            def = def.alternate();
        }

        Exchange::declare(conn, &def).await
    }

    pub async fn declare(conn: Arc<Connection>, def: &ExchangeDefinition) -> Result<Exchange, AmqpError> {
        debug!("creating exchange: {}", def.name);

        conn.channel()
            .await?
            .exchange_declare(
                &def.name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: false,
                },
                FieldTable::from(def.params.clone()),
            )
            .await?;

        debug!("exchange: {} was created", def.name);

        Ok(Exchange {
            conn,
            name: def.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds `queue` to this exchange with `key` as the routing pattern.
    pub async fn bind(&self, queue: &Queue, key: &str) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue.name(),
            self.name,
            key
        );

        self.conn
            .channel()
            .await?
            .queue_bind(
                queue.name(),
                &self.name,
                key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
    }

    /// Sends `event` through this exchange, routed by its key.
    pub async fn send(&self, ctx: &Context, event: &Event) -> Result<(), AmqpError> {
        self.conn.send(ctx, &self.name, event).await
    }

    /// Declares the queue `name` and binds it with the key `name`.
    ///
    /// Both steps are idempotent on the broker. They are not atomic: when binding fails
    /// the queue may exist unbound, and the caller should retry the whole derivation.
    pub async fn derive_queue(&self, name: &str) -> Result<Queue, AmqpError> {
        let queue = Queue::declare(self.conn.clone(), &QueueDefinition::keyed(name)).await?;
        self.bind(&queue, name).await?;

        Ok(queue)
    }
}
