// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Managed Broker Connection
//!
//! [`Connection`] owns the broker session and one channel shared by every publisher and
//! subscriber in the process. The channel is checked on each acquisition and replaced
//! transparently when the broker has closed it, with the same QoS re-applied.

use crate::{
    channel::{AmqpChannel, AmqpConnection},
    configs::RabbitMQConfigs,
    errors::AmqpError,
    event::Event,
    publisher::PublishMessage,
};
use lapin::options::{BasicPublishOptions, BasicQosOptions};
use opentelemetry::Context;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Prefetch settings applied to every channel the connection opens.
///
/// `prefetch_size` is kept for completeness but the AMQP client always sends zero
/// (no byte limit), which is also the only value RabbitMQ accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QoS {
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    pub global: bool,
}

impl Default for QoS {
    fn default() -> Self {
        QoS {
            prefetch_count: 1,
            prefetch_size: 0,
            global: false,
        }
    }
}

impl From<&RabbitMQConfigs> for QoS {
    fn from(cfg: &RabbitMQConfigs) -> Self {
        QoS {
            prefetch_count: cfg.prefetch_count,
            prefetch_size: cfg.prefetch_size,
            global: cfg.prefetch_global,
        }
    }
}

pub struct Connection {
    conn: Arc<dyn AmqpConnection>,
    channel: Mutex<Arc<dyn AmqpChannel>>,
    qos: QoS,
}

impl Connection {
    /// Wraps an open session and opens its first channel.
    ///
    /// Fails when the first channel cannot be opened or configured; at startup this is
    /// fatal for the process.
    pub async fn new(conn: Arc<dyn AmqpConnection>, qos: QoS) -> Result<Arc<Connection>, AmqpError> {
        let channel = open_channel(conn.as_ref(), qos).await?;

        Ok(Arc::new(Connection {
            conn,
            channel: Mutex::new(channel),
            qos,
        }))
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns the current channel, opening a fresh one if the broker closed it.
    ///
    /// Concurrent callers observing a closed channel are serialized, so only one of them
    /// recreates it and the rest get the new channel.
    pub async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        let mut current = self.channel.lock().await;
        if current.is_open() {
            return Ok(current.clone());
        }

        warn!("amqp channel is closed, opening a new one");
        let channel = open_channel(self.conn.as_ref(), self.qos).await?;
        *current = channel.clone();

        Ok(channel)
    }

    /// Publishes `msg` on the current channel.
    ///
    /// Delivery is neither mandatory nor immediate: a message no queue is bound for is
    /// silently dropped by the broker.
    pub async fn publish(&self, ctx: &Context, msg: &PublishMessage<'_>) -> Result<(), AmqpError> {
        let channel = self.channel().await?;

        channel
            .basic_publish(
                msg.to,
                msg.key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &msg.data,
                msg.properties(ctx),
            )
            .await
    }

    /// Sends `event` to `exchange`, routed by the event's key.
    pub async fn send(&self, ctx: &Context, exchange: &str, event: &Event) -> Result<(), AmqpError> {
        debug!(exchange, key = event.key.as_str(), "sending event");
        self.publish(ctx, &PublishMessage::event(exchange, &event.key, event))
            .await
    }

    pub async fn close(&self) -> Result<(), AmqpError> {
        let channel = self.channel.lock().await.clone();
        if channel.is_open() {
            channel.close().await?;
        }

        if self.conn.is_open() {
            self.conn.close().await?;
        }

        Ok(())
    }
}

async fn open_channel(conn: &dyn AmqpConnection, qos: QoS) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
    let channel = conn.create_channel().await?;

    channel
        .basic_qos(qos.prefetch_count, BasicQosOptions { global: qos.global })
        .await?;

    Ok(channel)
}
