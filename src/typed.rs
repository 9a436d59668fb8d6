// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed JSON Bus
//!
//! A bus for in-process message types that travel as JSON instead of protobuf. It shares
//! the [`Connection`] and the topic exchange with [`crate::bus::EventBus`], but every
//! subscription gets its own throwaway queue, so any number of subscribers may listen to
//! the same topic.

use crate::{
    channel::Delivery,
    connection::Connection,
    consumer,
    errors::AmqpError,
    exchange::{Exchange, ExchangeType},
    publisher::PublishMessage,
    queue::{Queue, QueueDefinition},
};
use opentelemetry::Context;
use serde::{de::DeserializeOwned, Serialize};
use std::{marker::PhantomData, sync::Arc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;
use uuid::Uuid;

pub struct TypedBus<T> {
    conn: Arc<Connection>,
    exchange: Exchange,
    _msg: PhantomData<fn() -> T>,
}

impl<T> TypedBus<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Declares the exchange `exchange` (a no-op when it already exists) and returns a bus
    /// publishing through it.
    pub async fn new(conn: Arc<Connection>, exchange: &str) -> Result<TypedBus<T>, AmqpError> {
        let exchange = Exchange::new(conn.clone(), exchange, ExchangeType::Default).await?;

        Ok(TypedBus {
            conn,
            exchange,
            _msg: PhantomData,
        })
    }

    /// JSON-encodes `msg` and publishes it with `topic` as routing key.
    pub async fn publish(&self, ctx: &Context, msg: &T, topic: &str) -> Result<(), AmqpError> {
        let msg = PublishMessage::json(self.exchange.name(), topic, msg)?;
        self.conn.publish(ctx, &msg).await
    }

    /// Subscribes to `topic` through a fresh queue named `<uuid>-<topic>`.
    ///
    /// The queue is exclusive and auto-deleted. Messages are auto-acknowledged, and bodies
    /// that are not a valid `T` are logged and skipped.
    pub async fn subscribe(&self, topic: &str) -> Result<UnboundedReceiver<T>, AmqpError> {
        let name = format!("{}-{}", Uuid::new_v4(), topic);
        let def = QueueDefinition::new(&name).exclusive().delete();

        let queue = Queue::declare(self.conn.clone(), &def).await?;
        self.exchange.bind(&queue, topic).await?;

        let (_channel, deliveries) = queue.open_stream("").await?;
        let (_task, messages) = consumer::forward(name, deliveries, decode_json::<T>);

        debug!(topic, queue = queue.name(), "typed subscription opened");

        Ok(messages)
    }
}

fn decode_json<T: DeserializeOwned>(delivery: &Delivery) -> Result<T, AmqpError> {
    serde_json::from_slice(&delivery.data).map_err(|err| {
        debug!(error = err.to_string(), "invalid json body");
        AmqpError::ParsePayloadError
    })
}
