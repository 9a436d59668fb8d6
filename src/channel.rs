// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Seam
//!
//! This module defines the two traits the rest of the crate talks to the broker
//! through, [`AmqpConnection`] and [`AmqpChannel`], and implements them for lapin's
//! `Connection` and `Channel`. It also provides [`dial`], which opens the broker session
//! from configuration.
//!
//! Keeping the broker behind these traits lets the bus, queue and exchange logic run
//! against mocks and an in-memory broker in tests.

use crate::{configs::Configs, errors::AmqpError};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, ConnectionProperties, ExchangeKind,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Reply code sent when closing channels and connections.
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// A message handed over by the broker.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

/// What the broker reports back after a queue declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Stream of deliveries for one consumer registration. It ends when the registration
/// is cancelled or its channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// A broker session able to hand out channels.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A publish/consume conduit on a broker session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn basic_qos(&self, prefetch_count: u16, options: BasicQosOptions)
        -> Result<(), AmqpError>;

    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_cancel(
        &self,
        consumer_tag: &str,
        options: BasicCancelOptions,
    ) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens a broker session using the `rabbitmq` and `app` sections of the configs.
///
/// The connection is named after the application so it can be told apart in the
/// broker's management UI. Failing here is meant to be fatal for the process.
///
/// # Example
/// ```ignore
/// let amqp = dial(&configs).await?;
/// let conn = Connection::new(amqp, QoS::from(&configs.rabbitmq)).await?;
/// let bus = EventBus::new(conn, &configs.rabbitmq.exchange, ExchangeType::Default).await?;
/// ```
pub async fn dial(cfg: &Configs) -> Result<Arc<lapin::Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app.name.clone()));

    match lapin::Connection::connect(&cfg.rabbitmq.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }
}

#[async_trait]
impl AmqpConnection for lapin::Connection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match lapin::Connection::create_channel(self).await {
            Ok(channel) => {
                debug!("channel created");
                Ok(Arc::new(channel))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        lapin::Connection::close(self, AMQP_REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error closing the connection");
                AmqpError::ConnectionError
            })
    }
}

#[async_trait]
impl AmqpChannel for lapin::Channel {
    fn is_open(&self) -> bool {
        self.status().connected()
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), AmqpError> {
        lapin::Channel::basic_qos(self, prefetch_count, options)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        lapin::Channel::exchange_declare(self, name, kind, options, arguments)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), exchange = name, "error to declare the exchange");
                AmqpError::DeclareExchangeError(name.to_owned())
            })
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<QueueInfo, AmqpError> {
        match lapin::Channel::queue_declare(self, name, options, arguments).await {
            Ok(queue) => Ok(QueueInfo {
                name: queue.name().to_string(),
                message_count: queue.message_count(),
                consumer_count: queue.consumer_count(),
            }),
            Err(err) => {
                error!(error = err.to_string(), queue = name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        lapin::Channel::queue_bind(self, queue, exchange, routing_key, options, arguments)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(exchange.to_owned(), queue.to_owned())
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match lapin::Channel::basic_publish(
            self,
            exchange,
            routing_key,
            options,
            payload,
            properties,
        )
        .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer =
            match lapin::Channel::basic_consume(self, queue, consumer_tag, options, arguments)
                .await
            {
                Ok(c) => c,
                Err(err) => {
                    error!(error = err.to_string(), "error to create the consumer");
                    return Err(AmqpError::BindingConsumerError(queue.to_owned()));
                }
            };

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Delivery {
                    exchange: delivery.exchange.to_string(),
                    routing_key: delivery.routing_key.to_string(),
                    properties: delivery.properties,
                    data: delivery.data,
                }),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn basic_cancel(
        &self,
        consumer_tag: &str,
        options: BasicCancelOptions,
    ) -> Result<(), AmqpError> {
        lapin::Channel::basic_cancel(self, consumer_tag, options)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), consumer_tag, "error to cancel the consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned())
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        lapin::Channel::close(self, AMQP_REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error closing the channel");
                AmqpError::ChannelError
            })
    }
}
