// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management
//!
//! This module defines queues, declares them on the broker and opens consumption
//! streams on them. Queues derived for routing keys are durable, exclusive to the
//! declaring connection and deleted by the broker once their last consumer goes away.

use crate::{
    channel::{AmqpChannel, DeliveryStream},
    connection::Connection,
    consumer::{self, ConsumerHandle, EventReceiver},
    errors::AmqpError,
    event::Event,
    publisher::{PublishMessage, DEFAULT_EXCHANGE},
};
use lapin::{
    options::{BasicConsumeOptions, QueueDeclareOptions},
    types::FieldTable,
};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::debug;

/// Definition of a queue with its declaration flags.
///
/// Implements the builder pattern; every flag starts off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// The definition used for per-key queues: durable, exclusive and auto-deleted.
    pub fn keyed(name: &str) -> QueueDefinition {
        QueueDefinition::new(name).durable().exclusive().delete()
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete once its last consumer is gone.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the declaring connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// A declared queue.
#[derive(Clone)]
pub struct Queue {
    conn: Arc<Connection>,
    name: String,
}

impl Queue {
    /// Declares the queue described by `def`.
    ///
    /// An empty name asks the broker to generate one; the returned queue carries the
    /// name the broker reported.
    pub async fn declare(conn: Arc<Connection>, def: &QueueDefinition) -> Result<Queue, AmqpError> {
        debug!("creating queue: {}", def.name);

        let info = conn
            .channel()
            .await?
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        debug!("queue: {} was created", info.name);

        Ok(Queue {
            conn,
            name: info.name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts consuming events from the queue.
    ///
    /// Deliveries are auto-acknowledged: a message counts as delivered as soon as the
    /// broker hands it over. Each body is decoded into an [`Event`] by a background task
    /// and pushed onto the returned receiver. Bodies that fail to decode are logged and
    /// skipped without ending the stream.
    ///
    /// The consumer tag is the queue name.
    pub async fn consume(&self) -> Result<(ConsumerHandle, EventReceiver), AmqpError> {
        let (channel, deliveries) = self.open_stream(&self.name).await?;
        let (task, events) = consumer::forward(self.name.clone(), deliveries, consumer::decode_event);

        Ok((ConsumerHandle::new(&self.name, channel, task), events))
    }

    /// Registers an auto-ack consumer under `tag` and returns the raw delivery stream
    /// together with the channel it lives on. An empty tag lets the broker pick one.
    pub(crate) async fn open_stream(
        &self,
        tag: &str,
    ) -> Result<(Arc<dyn AmqpChannel>, DeliveryStream), AmqpError> {
        let channel = self.conn.channel().await?;

        let deliveries = channel
            .basic_consume(
                &self.name,
                tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: true,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        debug!(queue = self.name.as_str(), tag, "consumer registered");

        Ok((channel, deliveries))
    }

    /// Sends `event` straight to this queue through the default exchange, bypassing any
    /// topic routing.
    pub async fn send(&self, ctx: &Context, event: &Event) -> Result<(), AmqpError> {
        self.conn
            .publish(ctx, &PublishMessage::event(DEFAULT_EXCHANGE, &self.name, event))
            .await
    }
}
